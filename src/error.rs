//! Error types shared by the bus layer, the character device and the PWM driver.
//!
//! Errors fall into four groups:
//!
//! | Variant | Meaning | Typical reaction |
//! |---------|---------|------------------|
//! | [`Error::Bus`] | NACK, timeout or lost arbitration on the wire | log, caller decides on retry |
//! | [`Error::DeviceAbsent`] | presence check failed during bring-up | abort bring-up of that device |
//! | [`Error::InvalidDescriptor`] | unbound, closed or unknown descriptor | programmer error |
//! | [`Error::InvalidArgument`] | out of range channel, frequency, period or address | programmer error |
//!
//! A [`BusFault`] never describes a caller mistake, so "device genuinely
//! absent" can always be told apart from "descriptor never bound".

use crate::chardev::Fd;

/// Result alias used across the crate.
pub type Result<T> = core::result::Result<T, Error>;

/// Failure reported by an [`I2cMaster`](crate::traits::I2cMaster) backend.
///
/// No retries happen below this level; a failed transaction must be assumed
/// to have had no effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BusFault {
    /// The target did not acknowledge its address or a data byte.
    #[error("no acknowledgment from device at address 0x{address:02x}")]
    Nack {
        /// 7-bit address of the target.
        address: u8,
    },

    /// The transaction (or a clock stretch) exceeded the bus timeout.
    #[error("bus transaction timed out")]
    Timeout,

    /// Another master took the bus.
    #[error("bus arbitration lost")]
    ArbitrationLost,

    /// Driver-specific failure code (e.g. an `esp_err_t`).
    #[error("bus driver error {0}")]
    Driver(i32),
}

/// What was wrong with an argument rejected by [`Error::InvalidArgument`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidArgument {
    /// Channel index outside `0..16`.
    Channel(usize),
    /// Output frequency the prescaler cannot produce.
    Frequency(u32),
    /// Period other than the fixed PWM period.
    Period(u32),
    /// Bus address outside the 7-bit range.
    Address(u8),
    /// An empty transaction or message list.
    EmptyTransaction,
}

impl core::fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InvalidArgument::Channel(c) => write!(f, "channel {} out of range 0..16", c),
            InvalidArgument::Frequency(hz) => write!(f, "unsupported PWM frequency {} Hz", hz),
            InvalidArgument::Period(p) => write!(f, "unsupported PWM period {} counts", p),
            InvalidArgument::Address(a) => write!(f, "bus address 0x{:02x} is not 7-bit", a),
            InvalidArgument::EmptyTransaction => write!(f, "empty transaction"),
        }
    }
}

/// Crate-wide error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Wire-level failure.
    #[error("bus fault: {0}")]
    Bus(#[from] BusFault),

    /// The device did not answer the presence check.
    #[error("no device responding at address 0x{address:02x}")]
    DeviceAbsent {
        /// 7-bit address that was probed.
        address: u8,
    },

    /// Descriptor is unknown, closed, or has no bound address.
    #[error("invalid descriptor {0}")]
    InvalidDescriptor(Fd),

    /// Caller supplied an out of range value.
    #[error("invalid argument: {0}")]
    InvalidArgument(InvalidArgument),

    /// A transaction was attempted before [`SharedBus::initialize`](crate::bus::SharedBus::initialize).
    #[error("bus used before initialization")]
    BusNotInitialized,

    /// Every descriptor slot has been handed out.
    #[error("descriptor table full")]
    DescriptorTableFull,

    /// The flush worker thread could not be started.
    #[error("flush worker could not be spawned")]
    WorkerUnavailable,
}

impl Error {
    /// Returns true for faults raised by the wire rather than by the caller.
    pub fn is_bus_fault(&self) -> bool {
        matches!(self, Error::Bus(_) | Error::DeviceAbsent { .. })
    }
}

impl From<InvalidArgument> for Error {
    fn from(arg: InvalidArgument) -> Self {
        Error::InvalidArgument(arg)
    }
}

impl embedded_hal::pwm::Error for Error {
    fn kind(&self) -> embedded_hal::pwm::ErrorKind {
        embedded_hal::pwm::ErrorKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_fault_converts_with_question_mark() {
        fn inner() -> Result<()> {
            Err(BusFault::Timeout)?;
            Ok(())
        }
        assert_eq!(inner(), Err(Error::Bus(BusFault::Timeout)));
    }

    #[test]
    fn caller_errors_are_not_bus_faults() {
        assert!(Error::Bus(BusFault::Nack { address: 0x40 }).is_bus_fault());
        assert!(Error::DeviceAbsent { address: 0x40 }.is_bus_fault());
        assert!(!Error::InvalidDescriptor(Fd(3)).is_bus_fault());
        assert!(!Error::InvalidArgument(InvalidArgument::Channel(16)).is_bus_fault());
    }

    #[test]
    fn display_includes_hex_address() {
        let msg = Error::DeviceAbsent { address: 0x40 }.to_string();
        assert!(msg.contains("0x40"));
        let msg = Error::Bus(BusFault::Nack { address: 0x3c }).to_string();
        assert!(msg.contains("0x3c"));
    }
}
