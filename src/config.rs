//! Bring-up configuration for the bus, the character device and the PCA9685.
//!
//! Uses `heapless::String` for bounded strings so the same structs can be
//! stored in NVS blobs or built at compile time.
//!
//! # Example
//!
//! ```rust
//! use rs_iobus::config::{BusConfig, Config, FlushPolicy, Pca9685Config};
//!
//! // Use defaults
//! let config = Config::default();
//! assert_eq!(config.pca9685.address, 0x40);
//!
//! // Or customize
//! let config = Config::default()
//!     .with_bus(BusConfig::default().with_pins(21, 22).with_clock_hz(400_000))
//!     .with_pca9685(
//!         Pca9685Config::default()
//!             .with_address(0x41)
//!             .with_frequency_hz(50)
//!             .with_flush_policy(FlushPolicy::Inline),
//!     );
//! assert_eq!(config.bus.sda_pin, 21);
//! ```

use core::time::Duration;

use heapless::String as HString;

/// Maximum length for short config strings (paths, thread names)
pub const MAX_SHORT_STRING: usize = 32;

/// Type alias for short config strings
pub type ShortString = HString<MAX_SHORT_STRING>;

/// Create a ShortString from a &str, truncating if too long
pub fn short_string(s: &str) -> ShortString {
    let mut hs = ShortString::new();
    for c in s.chars() {
        if hs.push(c).is_err() {
            break;
        }
    }
    hs
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete I/O core configuration
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Physical bus settings
    pub bus: BusConfig,
    /// Character device settings
    pub char_device: CharDeviceConfig,
    /// PWM expander settings
    pub pca9685: Pca9685Config,
}

impl Config {
    /// Set bus configuration
    pub fn with_bus(mut self, bus: BusConfig) -> Self {
        self.bus = bus;
        self
    }

    /// Set character device configuration
    pub fn with_char_device(mut self, char_device: CharDeviceConfig) -> Self {
        self.char_device = char_device;
        self
    }

    /// Set PCA9685 configuration
    pub fn with_pca9685(mut self, pca9685: Pca9685Config) -> Self {
        self.pca9685 = pca9685;
        self
    }
}

// ============================================================================
// Bus Config
// ============================================================================

/// Bus master configuration, supplied once at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BusConfig {
    /// GPIO used for SDA
    pub sda_pin: i32,
    /// GPIO used for SCL
    pub scl_pin: i32,
    /// Bus clock in Hz
    pub clock_hz: u32,
    /// Per-transaction timeout in milliseconds
    pub timeout_ms: u32,
    /// Enable the internal pull-ups on SDA/SCL
    pub internal_pullups: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            sda_pin: 19,
            scl_pin: 21,
            clock_hz: 100_000,
            timeout_ms: 10,
            internal_pullups: true,
        }
    }
}

impl BusConfig {
    /// Set the SDA and SCL pins
    pub fn with_pins(mut self, sda: i32, scl: i32) -> Self {
        self.sda_pin = sda;
        self.scl_pin = scl;
        self
    }

    /// Set the bus clock
    pub fn with_clock_hz(mut self, hz: u32) -> Self {
        self.clock_hz = hz;
        self
    }

    /// Set the transaction timeout
    pub fn with_timeout_ms(mut self, ms: u32) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Enable or disable internal pull-ups
    pub fn with_internal_pullups(mut self, enabled: bool) -> Self {
        self.internal_pullups = enabled;
        self
    }

    /// Transaction timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.timeout_ms))
    }
}

// ============================================================================
// Character Device Config
// ============================================================================

/// Descriptor-oriented bus device configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharDeviceConfig {
    /// Path the device is mounted at
    pub path: ShortString,
    /// Number of descriptors that may be open at the same time
    pub max_descriptors: usize,
}

impl Default for CharDeviceConfig {
    fn default() -> Self {
        Self {
            path: short_string("/dev/i2c"),
            max_descriptors: 16,
        }
    }
}

impl CharDeviceConfig {
    /// Set the mount path
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = short_string(path);
        self
    }

    /// Set the descriptor table size
    pub fn with_max_descriptors(mut self, max: usize) -> Self {
        self.max_descriptors = max;
        self
    }
}

// ============================================================================
// PCA9685 Config
// ============================================================================

/// How duty-cycle updates reach the chip.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum FlushPolicy {
    /// A dedicated worker thread flushes on every wake signal.
    #[default]
    Worker,
    /// The caller of `set_duty` flushes on its own context.
    Inline,
    /// Nothing flushes until `flush()` is called (periodic trigger).
    Deferred,
}

/// Output stage of the PCA9685 pins (MODE2 OUTDRV).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum OutputDrive {
    /// Open-drain outputs
    OpenDrain,
    /// Totem-pole outputs
    #[default]
    PushPull,
}

/// PCA9685 expander configuration, supplied once at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pca9685Config {
    /// 7-bit bus address
    pub address: u8,
    /// Desired PWM output frequency in Hz
    pub frequency_hz: u32,
    /// Oscillator feeding the prescaler, in Hz
    pub oscillator_hz: u32,
    /// Update delivery model
    pub flush_policy: FlushPolicy,
    /// Output stage
    pub output_drive: OutputDrive,
    /// Invert output logic
    pub invert: bool,
    /// Latch outputs on ACK instead of STOP
    pub update_on_ack: bool,
    /// Log a bus scan when the presence check fails
    pub scan_on_absent: bool,
    /// Worker thread name
    pub worker_name: ShortString,
    /// Worker thread stack size in bytes
    pub worker_stack_size: usize,
}

impl Default for Pca9685Config {
    fn default() -> Self {
        Self {
            address: 0x40,
            frequency_hz: 1000,
            oscillator_hz: 25_000_000,
            flush_policy: FlushPolicy::Worker,
            output_drive: OutputDrive::PushPull,
            invert: false,
            update_on_ack: false,
            scan_on_absent: true,
            worker_name: short_string("pca9685"),
            worker_stack_size: 4096,
        }
    }
}

impl Pca9685Config {
    /// Set the bus address
    pub fn with_address(mut self, address: u8) -> Self {
        self.address = address;
        self
    }

    /// Set the output frequency
    pub fn with_frequency_hz(mut self, hz: u32) -> Self {
        self.frequency_hz = hz;
        self
    }

    /// Set the oscillator frequency (external clock boards)
    pub fn with_oscillator_hz(mut self, hz: u32) -> Self {
        self.oscillator_hz = hz;
        self
    }

    /// Set the flush policy
    pub fn with_flush_policy(mut self, policy: FlushPolicy) -> Self {
        self.flush_policy = policy;
        self
    }

    /// Set the output stage
    pub fn with_output_drive(mut self, drive: OutputDrive) -> Self {
        self.output_drive = drive;
        self
    }

    /// Invert output logic
    pub fn with_invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    /// Latch outputs on ACK
    pub fn with_update_on_ack(mut self, on_ack: bool) -> Self {
        self.update_on_ack = on_ack;
        self
    }

    /// Enable or disable the diagnostic bus scan
    pub fn with_scan_on_absent(mut self, scan: bool) -> Self {
        self.scan_on_absent = scan;
        self
    }

    /// Set worker thread name and stack size
    pub fn with_worker(mut self, name: &str, stack_size: usize) -> Self {
        self.worker_name = short_string(name);
        self.worker_stack_size = stack_size;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.bus.sda_pin, 19);
        assert_eq!(config.bus.scl_pin, 21);
        assert_eq!(config.bus.clock_hz, 100_000);
        assert_eq!(config.char_device.path.as_str(), "/dev/i2c");
        assert_eq!(config.pca9685.address, 0x40);
        assert_eq!(config.pca9685.oscillator_hz, 25_000_000);
        assert_eq!(config.pca9685.flush_policy, FlushPolicy::Worker);
    }

    #[test]
    fn bus_timeout_duration() {
        let bus = BusConfig::default().with_timeout_ms(25);
        assert_eq!(bus.timeout(), Duration::from_millis(25));
    }

    #[test]
    fn short_string_truncation() {
        let long_input = "a".repeat(100);
        let s = short_string(&long_input);
        assert_eq!(s.len(), MAX_SHORT_STRING);
    }

    #[test]
    fn short_string_keeps_char_boundaries() {
        let input = "é".repeat(40);
        let s = short_string(&input);
        assert!(s.len() <= MAX_SHORT_STRING);
        assert!(s.chars().all(|c| c == 'é'));
    }

    #[test]
    fn builder_pattern() {
        let config = Config::default()
            .with_char_device(
                CharDeviceConfig::default()
                    .with_path("/dev/bus0")
                    .with_max_descriptors(4),
            )
            .with_pca9685(
                Pca9685Config::default()
                    .with_frequency_hz(50)
                    .with_output_drive(OutputDrive::OpenDrain)
                    .with_invert(true)
                    .with_worker("pwm", 2048),
            );

        assert_eq!(config.char_device.path.as_str(), "/dev/bus0");
        assert_eq!(config.char_device.max_descriptors, 4);
        assert_eq!(config.pca9685.frequency_hz, 50);
        assert_eq!(config.pca9685.output_drive, OutputDrive::OpenDrain);
        assert!(config.pca9685.invert);
        assert_eq!(config.pca9685.worker_name.as_str(), "pwm");
        assert_eq!(config.pca9685.worker_stack_size, 2048);
    }
}
