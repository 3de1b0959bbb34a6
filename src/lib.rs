//! # rs-iobus
//!
//! I/O core for ESP32 accessory boards: one shared two-wire bus, a
//! descriptor-style character device on top of it, and a PCA9685 16-channel
//! PWM expander driver with cached, batched channel updates.
//!
//! ## Features
//!
//! - **Serialized bus access**: every device on the bus shares one [`SharedBus`]
//! - **Explicit framing**: repeated starts and final-byte NACK decided once, for every backend
//! - **Character device**: open / bind-address / read / write / atomic-transfer / close
//! - **PCA9685 driver**: phase-staggered outputs, dirty-mask caching, worker, inline or deferred flushing
//! - **Desktop testing**: simulated bus with register-file devices and a transaction log
//!
//! ## Architecture
//!
//! - `traits` - Bus master and PWM output abstractions
//! - `bus` - Transaction engine shared by all devices
//! - `chardev` - Descriptor-oriented device over the bus
//! - `pca9685` - Register protocol, channel cache, flush worker and channel handles
//! - `hal` - Concrete implementations (mock for testing, esp32 for hardware)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_iobus::{
//!     BusCharDevice, BusConfig, Config, ControlRequest, FlushPolicy, Pca9685, SharedBus,
//!     hal::{MockDelay, MockI2c},
//!     traits::PwmOutput,
//! };
//!
//! let config = Config::default();
//! let mock = MockI2c::new();
//! mock.add_device(0x40);
//!
//! // One bus, shared by the char device and the PWM driver
//! let bus = Arc::new(SharedBus::new(mock.clone(), config.bus.clone()));
//! let dev = BusCharDevice::new(Arc::clone(&bus), &config.char_device);
//!
//! let pwm = Pca9685::new(Arc::clone(&bus), config.pca9685.with_flush_policy(FlushPolicy::Inline))
//!     .initialize(&mut MockDelay::new())
//!     .unwrap();
//! pwm.channel(0).unwrap().set_duty(4096).unwrap();
//!
//! // Read LED0_ON_H back through the char device
//! let fd = dev.open("/dev/i2c/0").unwrap();
//! dev.control_request(fd, ControlRequest::BindAddress(0x40)).unwrap();
//! dev.write(fd, &[0x07]).unwrap();
//! let mut on_h = [0u8; 1];
//! dev.read(fd, &mut on_h).unwrap();
//! assert_eq!(on_h, [0x10]);
//! ```

#![warn(missing_docs)]

/// Shared bus transaction engine.
pub mod bus;
/// Descriptor-oriented character device.
pub mod chardev;
/// Shared configuration for desktop and ESP32.
pub mod config;
/// Crate error types.
pub mod error;
/// Hardware abstraction layer with mock implementations for testing.
pub mod hal;
/// PCA9685 PWM expander driver.
pub mod pca9685;
/// Core traits for hardware abstraction.
pub mod traits;

// Re-exports for convenience
pub use bus::{BusSession, Framing, ProbeResult, ScanReport, Segment, SharedBus};
pub use chardev::{BusCharDevice, ControlRequest, Fd, Message};
pub use config::{
    BusConfig, CharDeviceConfig, Config, FlushPolicy, OutputDrive, Pca9685Config,
};
pub use error::{BusFault, Error, InvalidArgument, Result};
pub use pca9685::{FlushReport, Pca9685, Pca9685Driver, PwmChannel};
pub use traits::{Ack, Command, Direction, I2cMaster, PwmOutput};
