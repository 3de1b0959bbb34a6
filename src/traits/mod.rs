//! Trait definitions for the hardware seams.
//!
//! - `bus`: [`I2cMaster`], the backend that executes lowered bus command lists
//! - `pwm`: [`PwmOutput`], the per-channel PWM capability exposed to consumers
//!
//! For desktop testing use the mock backend from [`crate::hal::mock`]. For
//! ESP32 hardware use `hal::esp32` (requires the `esp32` feature).

pub mod bus;
pub mod pwm;

pub use bus::*;
pub use pwm::*;
