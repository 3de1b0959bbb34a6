//! PCA9685 16-channel, 12-bit PWM expander.
//!
//! Duty updates are cached per channel and written to the chip by a flush
//! pass, so callers never wait on the bus in steady state:
//!
//! ```text
//! set_duty(c, d) ──► cache[c] = d, dirty |= 1<<c ──► wake
//!                                                     │
//!        flush: take dirty mask ◄─────────────────────┘
//!               write LEDc registers, ascending c
//!               repeat until the mask stays clear
//! ```
//!
//! Who runs the flush is chosen by [`FlushPolicy`](crate::config::FlushPolicy).
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_iobus::bus::SharedBus;
//! use rs_iobus::config::{FlushPolicy, Pca9685Config};
//! use rs_iobus::hal::{MockDelay, MockI2c};
//! use rs_iobus::pca9685::Pca9685;
//! use rs_iobus::traits::PwmOutput;
//! use rs_iobus::BusConfig;
//!
//! let mock = MockI2c::new();
//! mock.add_device(0x40);
//! let bus = Arc::new(SharedBus::new(mock.clone(), BusConfig::default()));
//!
//! let config = Pca9685Config::default().with_flush_policy(FlushPolicy::Deferred);
//! let driver = Pca9685::new(bus, config)
//!     .initialize(&mut MockDelay::new())
//!     .unwrap();
//!
//! let mut led = driver.channel(3).unwrap();
//! led.set_duty(2048).unwrap();
//! driver.flush();
//! assert_eq!(led.get_duty(), 2048);
//! ```

mod cache;
mod channel;
mod device;
pub mod registers;
mod worker;

pub use cache::{ChannelCache, DirtyBatch, ALL_CHANNELS};
pub use channel::PwmChannel;
pub use device::{Pca9685, Pca9685Driver};
pub use worker::{FlushReport, FlushStats, WakeSignal};

/// Outputs per chip.
pub const NUM_CHANNELS: usize = 16;

/// PWM period in counts; also the "fully on" duty value.
pub const MAX_PWM_COUNTS: u32 = 4096;

/// Oscillator settle time after a restart, in milliseconds.
pub const SETTLE_DELAY_MS: u32 = 50;
