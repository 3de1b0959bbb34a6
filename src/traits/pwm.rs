//! Generic PWM output capability.
//!
//! Consumers (servo mappers, LED dimmers, output tables) drive outputs through
//! this trait without knowing whether the channel lives on an on-chip timer or
//! on an I2C expander.

use crate::error::Result;

/// A single PWM output measured in device counts.
///
/// Duty and period share the same unit. A duty equal to the period means
/// "fully on", zero means "fully off".
///
/// # Example Implementation
///
/// ```rust,ignore
/// use rs_iobus::traits::PwmOutput;
///
/// struct Ledc { duty: u32 }
///
/// impl PwmOutput for Ledc {
///     fn set_duty(&mut self, counts: u32) -> rs_iobus::Result<()> {
///         self.duty = counts.min(1023);
///         Ok(())
///     }
///     fn get_duty(&self) -> u32 { self.duty }
///     fn get_period(&self) -> u32 { 1023 }
///     fn get_period_min(&self) -> u32 { 1023 }
///     fn get_period_max(&self) -> u32 { 1023 }
///     fn set_period(&mut self, counts: u32) -> rs_iobus::Result<()> { Ok(()) }
/// }
/// ```
pub trait PwmOutput {
    /// Requests a new duty cycle.
    fn set_duty(&mut self, counts: u32) -> Result<()>;

    /// Returns the last requested duty cycle.
    fn get_duty(&self) -> u32;

    /// Current period in counts.
    fn get_period(&self) -> u32;

    /// Smallest supported period.
    fn get_period_min(&self) -> u32;

    /// Largest supported period.
    fn get_period_max(&self) -> u32;

    /// Changes the period.
    fn set_period(&mut self, counts: u32) -> Result<()>;

    /// Duty cycle as a fraction of the period, `0.0..=1.0`.
    fn duty_fraction(&self) -> f32 {
        let period = self.get_period();
        if period == 0 {
            return 0.0;
        }
        (self.get_duty() as f32 / period as f32).clamp(0.0, 1.0)
    }
}
