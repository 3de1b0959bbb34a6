//! PCA9685 bring-up and the cached, flushed duty-cycle driver.

use std::sync::{Arc, Condvar, Mutex, PoisonError, TryLockError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use embedded_hal::delay::DelayNs;
use log::{debug, error, info, trace, warn};

use crate::bus::{check_address, SharedBus};
use crate::config::{FlushPolicy, OutputDrive, Pca9685Config};
use crate::error::{Error, InvalidArgument, Result};
use crate::traits::I2cMaster;

use super::cache::ChannelCache;
use super::channel::PwmChannel;
use super::registers::{
    channel_frame, compute_prescaler, register_frame, Mode1, Mode2, MODE1, MODE2, PRE_SCALE,
};
use super::worker::{self, FlushReport, FlushStats, WakeSignal};
use super::{NUM_CHANNELS, SETTLE_DELAY_MS};

/// An unconfigured PCA9685.
///
/// Turn it into a usable [`Pca9685Driver`] with [`initialize`](Self::initialize).
/// No channel handle can exist before that succeeds.
pub struct Pca9685<M> {
    bus: Arc<SharedBus<M>>,
    config: Pca9685Config,
}

impl<M: I2cMaster + 'static> Pca9685<M> {
    /// Binds a chip at `config.address` to a shared bus.
    pub fn new(bus: Arc<SharedBus<M>>, config: Pca9685Config) -> Self {
        Self { bus, config }
    }

    /// Configuration the chip will be brought up with.
    pub fn config(&self) -> &Pca9685Config {
        &self.config
    }

    /// Runs the bring-up sequence and starts the flush worker if configured.
    ///
    /// 1. Initialize the bus (no-op if already done).
    /// 2. Presence check: read MODE1. No answer is [`Error::DeviceAbsent`].
    /// 3. Reset, wait, sleep, write the prescaler, reset, wait.
    /// 4. Wake with auto-increment, then program MODE2.
    ///
    /// Any failure aborts bring-up and nothing is handed out.
    pub fn initialize(self, delay: &mut impl DelayNs) -> Result<Pca9685Driver<M>> {
        let config = self.config;
        let address = config.address;
        check_address(address)?;
        let prescaler = compute_prescaler(config.oscillator_hz, config.frequency_hz)?;

        self.bus.initialize()?;

        info!("[PCA9685:{:02x}] Verifying device is present", address);
        let mut mode1 = [0u8; 1];
        match self.bus.write_read(address, &[MODE1], &mut mode1) {
            Ok(()) => debug!("[PCA9685:{:02x}] MODE1 = {:02x}", address, mode1[0]),
            Err(e) if e.is_bus_fault() => {
                error!("[PCA9685:{:02x}] Device not responding: {}", address, e);
                if config.scan_on_absent {
                    match self.bus.scan() {
                        Ok(report) => warn!("[PCA9685:{:02x}] Bus scan:\n{}", address, report),
                        Err(e) => warn!("[PCA9685:{:02x}] Bus scan failed: {}", address, e),
                    }
                }
                return Err(Error::DeviceAbsent { address });
            }
            Err(e) => return Err(e),
        }

        let write = |register: u8, value: u8| -> Result<()> {
            self.bus
                .write(address, &register_frame(register, value))
                .map_err(|e| {
                    error!(
                        "[PCA9685:{:02x}] Write {:02x} <- {:02x} failed: {}",
                        address, register, value, e
                    );
                    e
                })
        };

        info!("[PCA9685:{:02x}] Resetting", address);
        write(MODE1, Mode1::reset().bits())?;
        delay.delay_ms(SETTLE_DELAY_MS);

        info!(
            "[PCA9685:{:02x}] Sleeping to set prescaler {} ({} Hz)",
            address, prescaler, config.frequency_hz
        );
        write(MODE1, Mode1::sleep().bits())?;
        write(PRE_SCALE, prescaler)?;
        write(MODE1, Mode1::reset().bits())?;
        delay.delay_ms(SETTLE_DELAY_MS);

        info!("[PCA9685:{:02x}] Enabling auto increment", address);
        write(MODE1, Mode1::running().bits())?;

        let mode2 = Mode2 {
            invert: config.invert,
            update_on_ack: config.update_on_ack,
            totem_pole: config.output_drive == OutputDrive::PushPull,
            output_not_enabled: 0,
        };
        write(MODE2, mode2.bits())?;

        let shared = Arc::new(Shared {
            bus: self.bus,
            address,
            prescaler,
            policy: config.flush_policy,
            cache: ChannelCache::new(),
            signal: Arc::new(WakeSignal::new()),
            flush_lock: Mutex::new(()),
            idle_lock: Mutex::new(()),
            idle: Condvar::new(),
            stats: FlushStats::default(),
        });

        let worker = match config.flush_policy {
            FlushPolicy::Worker => {
                let flusher = Arc::clone(&shared);
                Some(worker::spawn(
                    config.worker_name.as_str(),
                    config.worker_stack_size,
                    Arc::clone(&shared.signal),
                    move || {
                        flusher.flush();
                    },
                )?)
            }
            FlushPolicy::Inline | FlushPolicy::Deferred => None,
        };

        info!(
            "[PCA9685:{:02x}] Ready ({:?} flush)",
            address, config.flush_policy
        );
        Ok(Pca9685Driver {
            core: Arc::new(Core {
                shared,
                worker,
            }),
        })
    }
}

/// State shared between callers and the flush worker.
pub(crate) struct Shared<M> {
    bus: Arc<SharedBus<M>>,
    address: u8,
    prescaler: u8,
    policy: FlushPolicy,
    cache: ChannelCache,
    signal: Arc<WakeSignal>,
    // Single flusher at a time
    flush_lock: Mutex<()>,
    // Notified after every flush; waiters check `is_idle` under `idle_lock`
    idle_lock: Mutex<()>,
    idle: Condvar,
    stats: FlushStats,
}

impl<M: I2cMaster> Shared<M> {
    fn flush(&self) -> FlushReport {
        let report = self.flush_dirty();
        self.stats.record(&report);
        // Taking the lock orders this wake after a waiter's idle check.
        drop(self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner));
        self.idle.notify_all();
        report
    }

    fn flush_dirty(&self) -> FlushReport {
        let _flushing = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut report = FlushReport::default();
        loop {
            let batch = self.cache.take_dirty();
            if batch.is_empty() {
                break;
            }
            report.passes += 1;
            for (channel, duty) in batch.iter() {
                match self.write_channel(channel, duty) {
                    Ok(()) => report.writes += 1,
                    Err(e) => {
                        // Not re-raised: the next set_duty on this channel retries.
                        warn!(
                            "[PCA9685:{:02x}] Channel {} update to {} dropped: {}",
                            self.address, channel, duty, e
                        );
                        report.failures += 1;
                    }
                }
            }
        }
        report
    }

    fn write_channel(&self, channel: usize, duty: u32) -> Result<()> {
        let frame = channel_frame(channel, duty)?;
        trace!(
            "[PCA9685:{:02x}:{}] duty {} -> {:02x?}",
            self.address,
            channel,
            duty,
            &frame[1..]
        );
        self.bus.write(self.address, &frame)
    }

    fn notify(&self) {
        match self.policy {
            FlushPolicy::Worker => self.signal.post(),
            FlushPolicy::Inline => {
                self.flush();
            }
            FlushPolicy::Deferred => {}
        }
    }

    fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.is_idle() {
                return true;
            }
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                return false;
            };
            guard = self
                .idle
                .wait_timeout(guard, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn is_idle(&self) -> bool {
        if self.cache.dirty_mask() != 0 || self.signal.pending() != 0 {
            return false;
        }
        // A flusher holds the lock between capturing the mask and its last write.
        !matches!(self.flush_lock.try_lock(), Err(TryLockError::WouldBlock))
    }
}

/// Owns the worker; stops it when the last driver or channel handle goes away.
pub(crate) struct Core<M> {
    shared: Arc<Shared<M>>,
    worker: Option<JoinHandle<()>>,
}

impl<M> Drop for Core<M> {
    fn drop(&mut self) {
        // The worker drains every posted wake before it exits.
        self.shared.signal.shutdown();
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("[PCA9685:{:02x}] Flush worker panicked", self.shared.address);
            }
        }
        let dirty = self.shared.cache.dirty_mask();
        if dirty != 0 {
            warn!(
                "[PCA9685:{:02x}] Dropped with unflushed channels (mask {:04x})",
                self.shared.address, dirty
            );
        }
    }
}

impl<M: I2cMaster> Core<M> {
    pub(crate) fn set_duty(&self, channel: usize, duty: u32) -> Result<()> {
        if channel >= NUM_CHANNELS {
            return Err(InvalidArgument::Channel(channel).into());
        }
        self.shared.cache.store(channel, duty);
        self.shared.notify();
        Ok(())
    }

    pub(crate) fn get_duty(&self, channel: usize) -> Result<u32> {
        if channel >= NUM_CHANNELS {
            return Err(InvalidArgument::Channel(channel).into());
        }
        Ok(self.shared.cache.get(channel))
    }
}

/// An initialized PCA9685.
///
/// `set_duty` only updates the cache and marks the channel dirty; the bus
/// write happens according to the configured [`FlushPolicy`]. Duty values
/// are in counts, `0..=4096`; larger values are clamped to fully on.
///
/// # Thread Safety
///
/// The driver and its [`PwmChannel`] handles are `Send + Sync` and can be
/// used from any number of threads. Clones share the same chip.
pub struct Pca9685Driver<M> {
    core: Arc<Core<M>>,
}

impl<M> Clone for Pca9685Driver<M> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<M: I2cMaster> Pca9685Driver<M> {
    /// 7-bit bus address.
    pub fn address(&self) -> u8 {
        self.core.shared.address
    }

    /// Prescaler programmed during bring-up.
    pub fn prescaler(&self) -> u8 {
        self.core.shared.prescaler
    }

    /// Active flush policy.
    pub fn flush_policy(&self) -> FlushPolicy {
        self.core.shared.policy
    }

    /// Caches a duty value for one channel and schedules its write.
    pub fn set_duty(&self, channel: usize, duty: u32) -> Result<()> {
        self.core.set_duty(channel, duty)
    }

    /// Last cached duty for one channel. Not read back from the chip.
    pub fn get_duty(&self, channel: usize) -> Result<u32> {
        self.core.get_duty(channel)
    }

    /// Caches the same duty for every channel and schedules one flush.
    pub fn set_all(&self, duty: u32) {
        self.core.shared.cache.store_all(duty);
        self.core.shared.notify();
    }

    /// Every cached duty value.
    pub fn duties(&self) -> [u32; NUM_CHANNELS] {
        self.core.shared.cache.snapshot()
    }

    /// Writes every dirty channel now, on the calling thread.
    ///
    /// Failed channel writes are logged and counted in the returned report;
    /// their dirty bits are not restored.
    pub fn flush(&self) -> FlushReport {
        self.core.shared.flush()
    }

    /// Returns true if some channel has not been written since its last update.
    pub fn is_dirty(&self) -> bool {
        self.core.shared.cache.dirty_mask() != 0
    }

    /// Waits until no update is pending or in flight.
    ///
    /// Returns `false` on timeout. Under [`FlushPolicy::Deferred`] this only
    /// succeeds once someone called [`flush`](Self::flush).
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.core.shared.wait_idle(timeout)
    }

    /// Totals since bring-up.
    pub fn stats(&self) -> FlushReport {
        self.core.shared.stats.snapshot()
    }

    /// Handle for one channel.
    pub fn channel(&self, index: usize) -> Result<PwmChannel<M>> {
        if index >= NUM_CHANNELS {
            return Err(InvalidArgument::Channel(index).into());
        }
        Ok(PwmChannel::new(Arc::clone(&self.core), index))
    }

    /// Handles for all 16 channels.
    pub fn channels(&self) -> [PwmChannel<M>; NUM_CHANNELS] {
        core::array::from_fn(|index| PwmChannel::new(Arc::clone(&self.core), index))
    }
}
