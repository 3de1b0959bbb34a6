//! Bus master abstraction for the two-wire (I2C) bus.
//!
//! A backend receives a fully lowered command list, the same shape the
//! ESP-IDF `i2c_cmd_link` API takes: start conditions, address bytes, data
//! phases with explicit ACK/NACK policy, and a final stop. Framing decisions
//! (repeated starts, which byte gets NACKed) are made once in
//! [`crate::bus`], so every backend executes identical wire sequences.
//!
//! # Example
//!
//! ```rust
//! use rs_iobus::traits::{Ack, Command, Direction, I2cMaster};
//! use rs_iobus::hal::MockI2c;
//! use rs_iobus::BusConfig;
//! use std::time::Duration;
//!
//! let mut bus = MockI2c::new();
//! bus.add_device(0x40);
//! bus.configure(&BusConfig::default()).unwrap();
//!
//! let mut commands = [
//!     Command::Start,
//!     Command::Address { address: 0x40, direction: Direction::Write },
//!     Command::Write(&[0x00, 0x11]),
//!     Command::Stop,
//! ];
//! bus.run(&mut commands, Duration::from_millis(10)).unwrap();
//! assert_eq!(bus.register(0x40, 0x00), 0x11);
//! ```

use core::time::Duration;

use crate::config::BusConfig;
use crate::error::BusFault;

/// Direction bit carried in the address byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Master transmits (R/W bit = 0).
    Write,
    /// Master receives (R/W bit = 1).
    Read,
}

impl Direction {
    /// Builds the address byte sent after a (repeated) start.
    #[inline]
    pub const fn address_byte(self, address: u8) -> u8 {
        match self {
            Direction::Write => address << 1,
            Direction::Read => (address << 1) | 1,
        }
    }
}

/// Acknowledge policy for bytes received by the master.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ack {
    /// Acknowledge: the master wants more bytes.
    Ack,
    /// Not-acknowledge: this is the final byte of the read.
    Nack,
}

/// One primitive step of a bus transaction.
#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    /// Start condition. A start that follows other commands is a repeated start.
    Start,
    /// Address byte with direction bit; the target must acknowledge it.
    Address {
        /// 7-bit target address.
        address: u8,
        /// Direction of the following data phase.
        direction: Direction,
    },
    /// Bytes transmitted by the master, each acknowledged by the target.
    Write(&'a [u8]),
    /// Bytes received by the master, all answered with `ack`.
    Read {
        /// Destination buffer.
        buffer: &'a mut [u8],
        /// Answer sent after each byte of this phase.
        ack: Ack,
    },
    /// Stop condition, releases the bus.
    Stop,
}

/// A bus master that can execute lowered command lists.
///
/// Implementations must either complete the whole list or return an error;
/// they never retry on their own.
pub trait I2cMaster: Send {
    /// Applies pins and clock speed. Called exactly once, before any [`run`](Self::run).
    fn configure(&mut self, config: &BusConfig) -> Result<(), BusFault>;

    /// Executes one transaction, blocking for at most `timeout`.
    fn run(&mut self, commands: &mut [Command<'_>], timeout: Duration) -> Result<(), BusFault>;
}

impl<T: I2cMaster + ?Sized> I2cMaster for Box<T> {
    fn configure(&mut self, config: &BusConfig) -> Result<(), BusFault> {
        (**self).configure(config)
    }

    fn run(&mut self, commands: &mut [Command<'_>], timeout: Duration) -> Result<(), BusFault> {
        (**self).run(commands, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_byte_carries_direction_bit() {
        assert_eq!(Direction::Write.address_byte(0x40), 0x80);
        assert_eq!(Direction::Read.address_byte(0x40), 0x81);
        assert_eq!(Direction::Write.address_byte(0x7f), 0xfe);
        assert_eq!(Direction::Read.address_byte(0x7f), 0xff);
    }
}
