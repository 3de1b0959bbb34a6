//! Per-channel handle.

use std::sync::Arc;

use crate::error::{Error, InvalidArgument, Result};
use crate::traits::{I2cMaster, PwmOutput};

use super::device::Core;
use super::MAX_PWM_COUNTS;

/// One output of an initialized PCA9685.
///
/// All 16 channels share the chip's single period of 4096 counts, so the
/// period accessors are constant and [`set_period`](PwmOutput::set_period)
/// only accepts 4096. `get_duty` returns the cached value; the chip is never
/// read back.
pub struct PwmChannel<M> {
    core: Arc<Core<M>>,
    index: usize,
}

impl<M> PwmChannel<M> {
    pub(crate) fn new(core: Arc<Core<M>>, index: usize) -> Self {
        Self { core, index }
    }

    /// Channel number on the chip, `0..16`.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<M> Clone for PwmChannel<M> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.core), self.index)
    }
}

impl<M> core::fmt::Debug for PwmChannel<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PwmChannel").field("index", &self.index).finish()
    }
}

impl<M: I2cMaster> PwmOutput for PwmChannel<M> {
    fn set_duty(&mut self, counts: u32) -> Result<()> {
        self.core.set_duty(self.index, counts)
    }

    fn get_duty(&self) -> u32 {
        // index is validated at construction
        self.core.get_duty(self.index).unwrap_or(0)
    }

    fn get_period(&self) -> u32 {
        MAX_PWM_COUNTS
    }

    fn get_period_min(&self) -> u32 {
        MAX_PWM_COUNTS
    }

    fn get_period_max(&self) -> u32 {
        MAX_PWM_COUNTS
    }

    fn set_period(&mut self, counts: u32) -> Result<()> {
        if counts != MAX_PWM_COUNTS {
            return Err(InvalidArgument::Period(counts).into());
        }
        Ok(())
    }
}

impl<M> embedded_hal::pwm::ErrorType for PwmChannel<M> {
    type Error = Error;
}

impl<M: I2cMaster> embedded_hal::pwm::SetDutyCycle for PwmChannel<M> {
    fn max_duty_cycle(&self) -> u16 {
        MAX_PWM_COUNTS as u16
    }

    fn set_duty_cycle(&mut self, duty: u16) -> Result<()> {
        self.core.set_duty(self.index, u32::from(duty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::SharedBus;
    use crate::config::{BusConfig, FlushPolicy, Pca9685Config};
    use crate::hal::mock::{MockDelay, MockI2c};
    use crate::pca9685::{Pca9685, Pca9685Driver};
    use embedded_hal::pwm::SetDutyCycle;

    fn driver() -> (MockI2c, Pca9685Driver<MockI2c>) {
        let mock = MockI2c::new();
        mock.add_device(0x40);
        let bus = Arc::new(SharedBus::new(mock.clone(), BusConfig::default()));
        let config = Pca9685Config::default().with_flush_policy(FlushPolicy::Deferred);
        let driver = Pca9685::new(bus, config)
            .initialize(&mut MockDelay::new())
            .unwrap();
        mock.clear_log();
        (mock, driver)
    }

    #[test]
    fn period_is_fixed() {
        let (_mock, driver) = driver();
        let mut ch = driver.channel(0).unwrap();
        assert_eq!(ch.get_period(), 4096);
        assert_eq!(ch.get_period_min(), 4096);
        assert_eq!(ch.get_period_max(), 4096);
        assert_eq!(ch.set_period(4096), Ok(()));
        assert_eq!(
            ch.set_period(1000),
            Err(Error::InvalidArgument(InvalidArgument::Period(1000)))
        );
    }

    #[test]
    fn duty_goes_through_cache() {
        let (mock, driver) = driver();
        let mut ch = driver.channel(7).unwrap();
        ch.set_duty(1024).unwrap();
        assert_eq!(ch.get_duty(), 1024);
        assert_eq!(driver.get_duty(7), Ok(1024));
        assert!((ch.duty_fraction() - 0.25).abs() < f32::EPSILON);
        assert!(mock.transactions().is_empty());
    }

    #[test]
    fn embedded_hal_percent() {
        let (_mock, driver) = driver();
        let mut ch = driver.channel(1).unwrap();
        ch.set_duty_cycle_percent(50).unwrap();
        assert_eq!(ch.get_duty(), 2048);
        ch.set_duty_cycle_fully_on().unwrap();
        assert_eq!(ch.get_duty(), 4096);
    }

    #[test]
    fn channels_cover_all_indices() {
        let (_mock, driver) = driver();
        let channels = driver.channels();
        for (i, ch) in channels.iter().enumerate() {
            assert_eq!(ch.index(), i);
        }
    }
}
