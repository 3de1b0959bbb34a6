//! Flush worker thread, its wake signal and flush counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{error, info};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct SignalState {
    count: usize,
    shutdown: bool,
}

/// Counting semaphore the flush worker blocks on.
///
/// Every post is one wake; posts made while the worker is flushing are
/// remembered so no update raised mid-flush is lost.
#[derive(Debug, Default)]
pub struct WakeSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl WakeSignal {
    /// Creates a signal with no pending wakes.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds one wake and unblocks a waiter.
    pub fn post(&self) {
        self.lock().count += 1;
        self.cond.notify_one();
    }

    /// Blocks until a wake is available and consumes it.
    ///
    /// Returns `false` once [`shutdown`](Self::shutdown) has been called and
    /// every wake posted before it has been consumed.
    pub fn wait(&self) -> bool {
        let mut state = self.lock();
        loop {
            if state.count > 0 {
                state.count -= 1;
                return true;
            }
            if state.shutdown {
                return false;
            }
            state = self
                .cond
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Wakes not yet consumed.
    pub fn pending(&self) -> usize {
        self.lock().count
    }

    /// Releases every waiter for good.
    pub fn shutdown(&self) {
        self.lock().shutdown = true;
        self.cond.notify_all();
    }
}

/// Flush counters. Also used as the result of a single flush call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Passes over a non-empty dirty mask.
    pub passes: u64,
    /// Channel frames written successfully.
    pub writes: u64,
    /// Channel frames that failed on the bus and were dropped.
    pub failures: u64,
}

/// Running totals shared between the worker and callers.
#[derive(Debug, Default)]
pub struct FlushStats {
    passes: AtomicU64,
    writes: AtomicU64,
    failures: AtomicU64,
}

impl FlushStats {
    /// Adds one flush call's counts.
    pub fn record(&self, report: &FlushReport) {
        self.passes.fetch_add(report.passes, Ordering::Relaxed);
        self.writes.fetch_add(report.writes, Ordering::Relaxed);
        self.failures.fetch_add(report.failures, Ordering::Relaxed);
    }

    /// Totals so far.
    pub fn snapshot(&self) -> FlushReport {
        FlushReport {
            passes: self.passes.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

/// Starts the flush worker: one `flush` call per consumed wake until the
/// signal shuts down and its pending wakes are drained.
pub fn spawn<F>(name: &str, stack_size: usize, signal: Arc<WakeSignal>, mut flush: F) -> Result<JoinHandle<()>>
where
    F: FnMut() + Send + 'static,
{
    let thread_name = name.to_string();
    thread::Builder::new()
        .name(thread_name.clone())
        .stack_size(stack_size)
        .spawn(move || {
            info!("[{}] Flush worker started", thread_name);
            while signal.wait() {
                flush();
            }
            info!("[{}] Flush worker stopped", thread_name);
        })
        .map_err(|e| {
            error!("[{}] Failed to spawn flush worker: {}", name, e);
            Error::WorkerUnavailable
        })
}
