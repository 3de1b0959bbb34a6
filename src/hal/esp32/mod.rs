//! ESP32 hardware abstraction layer for the I/O board.
//!
//! # Hardware Configuration
//!
//! - **MCU**: ESP32 (ESP-IDF, std)
//! - **Bus**: I2C controller 0, 100 kHz, internal pull-ups
//! - **PWM expander**: PCA9685 at 0x40
//!
//! # Pin Assignments
//!
//! See the [`pins`] module.

mod i2c;

pub use i2c::Esp32I2cMaster;

/// Pin assignments for the I/O board.
pub mod pins {
    // =========================================================================
    // I2C
    // =========================================================================

    /// I2C controller port
    pub const I2C_PORT: i32 = 0;

    /// I2C data line
    pub const I2C_SDA: i32 = 19;

    /// I2C clock line
    pub const I2C_SCL: i32 = 21;

    // =========================================================================
    // PCA9685
    // =========================================================================

    /// Default PCA9685 address (A0-A5 strapped low)
    pub const PCA9685_ADDR: u8 = 0x40;
}
