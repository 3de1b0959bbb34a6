//! Duty cache and dirty mask.
//!
//! The cached values and the dirty mask live under one lock, so a reader
//! never sees a dirty bit without its value and the flusher's
//! capture-and-clear is atomic with respect to writers.

use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{MAX_PWM_COUNTS, NUM_CHANNELS};

/// Mask with every channel bit set.
pub const ALL_CHANNELS: u16 = 0xFFFF;

#[derive(Debug, Default)]
struct CacheState {
    duty: [u32; NUM_CHANNELS],
    dirty: u16,
}

/// Last requested duty per channel plus the set of channels not yet written.
#[derive(Debug, Default)]
pub struct ChannelCache {
    state: Mutex<CacheState>,
}

/// Channels captured by [`ChannelCache::take_dirty`], with their values at
/// capture time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirtyBatch {
    mask: u16,
    duty: [u32; NUM_CHANNELS],
}

impl DirtyBatch {
    /// Returns true if nothing was dirty.
    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }

    /// Number of channels in the batch.
    pub fn len(&self) -> usize {
        self.mask.count_ones() as usize
    }

    /// Captured bitmask.
    pub fn mask(&self) -> u16 {
        self.mask
    }

    /// `(channel, duty)` pairs in ascending channel order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        (0..NUM_CHANNELS)
            .filter(move |c| self.mask & (1 << c) != 0)
            .map(move |c| (c, self.duty[c]))
    }
}

impl ChannelCache {
    /// Creates a cache with every channel at 0 and nothing dirty.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `duty` (clamped to 4096) and marks the channel dirty.
    ///
    /// Storing the value already cached still marks the channel dirty, but a
    /// channel is written at most once per flush however often it was set.
    /// `channel` must already be validated.
    pub fn store(&self, channel: usize, duty: u32) {
        let mut state = self.lock();
        state.duty[channel] = duty.min(MAX_PWM_COUNTS);
        state.dirty |= 1 << channel;
    }

    /// Stores the same duty in every channel and marks them all dirty.
    pub fn store_all(&self, duty: u32) {
        let mut state = self.lock();
        state.duty = [duty.min(MAX_PWM_COUNTS); NUM_CHANNELS];
        state.dirty = ALL_CHANNELS;
    }

    /// Last stored duty for `channel`.
    pub fn get(&self, channel: usize) -> u32 {
        self.lock().duty[channel]
    }

    /// Every cached duty value.
    pub fn snapshot(&self) -> [u32; NUM_CHANNELS] {
        self.lock().duty
    }

    /// Current dirty mask.
    pub fn dirty_mask(&self) -> u16 {
        self.lock().dirty
    }

    /// Captures the dirty channels and clears the mask in one step.
    pub fn take_dirty(&self) -> DirtyBatch {
        let mut state = self.lock();
        let batch = DirtyBatch {
            mask: state.dirty,
            duty: state.duty,
        };
        state.dirty = 0;
        batch
    }
}
