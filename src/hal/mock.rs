//! Mock implementations for testing without hardware.
//!
//! This module provides test doubles for the hardware traits, enabling
//! development and testing on desktop without a physical bus.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockI2c`] | [`I2cMaster`] | Simulated bus with register-file devices and a transaction log |
//! | [`MockDelay`] | [`DelayNs`] | Records requested delays without sleeping |
//! | [`StdDelay`] | [`DelayNs`] | Sleeps the calling thread (desktop runs) |
//!
//! # Example
//!
//! ```rust
//! use rs_iobus::hal::mock::{Frame, MockI2c};
//! use rs_iobus::bus::SharedBus;
//! use rs_iobus::traits::Direction;
//! use rs_iobus::BusConfig;
//!
//! let mock = MockI2c::new();
//! mock.add_device(0x40);
//!
//! let bus = SharedBus::new(mock.clone(), BusConfig::default());
//! bus.initialize().unwrap();
//! bus.write(0x40, &[0x00, 0x11]).unwrap();
//!
//! // Device register file was updated
//! assert_eq!(mock.register(0x40, 0x00), 0x11);
//!
//! // And the wire traffic was recorded
//! let log = mock.transactions();
//! assert_eq!(log.len(), 1);
//! assert_eq!(log[0].frames[1], Frame::Address(0x40, Direction::Write));
//! ```
//!
//! [`I2cMaster`]: crate::traits::I2cMaster
//! [`DelayNs`]: embedded_hal::delay::DelayNs

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use embedded_hal::delay::DelayNs;

use crate::config::BusConfig;
use crate::error::BusFault;
use crate::traits::{Ack, Command, Direction, I2cMaster};

/// `ESP_ERR_INVALID_STATE`, returned when the driver is used unconfigured.
const ERR_INVALID_STATE: i32 = 0x103;

// ============================================================================
// Recorded traffic
// ============================================================================

/// One recorded wire event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Start or repeated start condition
    Start,
    /// Address byte
    Address(u8, Direction),
    /// Bytes sent by the master
    Write(Vec<u8>),
    /// Number of bytes received and the answer given after each
    Read(usize, Ack),
    /// Stop condition
    Stop,
}

/// One recorded transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    /// Frames in the order they were issued
    pub frames: Vec<Frame>,
    /// Outcome reported to the caller
    pub result: Result<(), BusFault>,
}

impl Transaction {
    /// First addressed target.
    pub fn address(&self) -> Option<u8> {
        self.frames.iter().find_map(|f| match f {
            Frame::Address(a, _) => Some(*a),
            _ => None,
        })
    }

    /// All bytes written by the master, concatenated.
    pub fn written(&self) -> Vec<u8> {
        self.frames
            .iter()
            .filter_map(|f| match f {
                Frame::Write(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    /// Number of start conditions (1 + repeated starts).
    pub fn starts(&self) -> usize {
        self.frames.iter().filter(|f| **f == Frame::Start).count()
    }

    /// Returns true if any frame receives data.
    pub fn is_read(&self) -> bool {
        self.frames.iter().any(|f| matches!(f, Frame::Read(..)))
    }
}

// ============================================================================
// Simulated bus
// ============================================================================

#[derive(Debug)]
struct MockDevice {
    registers: [u8; 256],
    pointer: u8,
}

impl MockDevice {
    fn new() -> Self {
        Self {
            registers: [0; 256],
            pointer: 0,
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    devices: BTreeMap<u8, MockDevice>,
    log: Vec<Transaction>,
    configured: Option<BusConfig>,
    configure_count: usize,
    faults: VecDeque<BusFault>,
    failing_registers: BTreeSet<(u8, u8)>,
    timeouts: Vec<Duration>,
    hold: Duration,
}

/// Simulated two-wire bus.
///
/// Each device is a 256-byte register file behind an auto-incrementing
/// register pointer: the first byte written after an address+write phase
/// selects the register, following bytes are stored one register after the
/// other, and reads return bytes starting at the pointer.
///
/// Clones share the same state, so a test can keep a handle while the bus
/// itself is moved into a [`SharedBus`](crate::bus::SharedBus).
///
/// Calls to [`I2cMaster::run`] that overlap in time are counted (see
/// [`overlaps`](Self::overlaps)); with [`set_hold`](Self::set_hold) each call
/// stays on the wire long enough for a missing bus lock to show up.
#[derive(Clone, Debug, Default)]
pub struct MockI2c {
    state: Arc<Mutex<MockState>>,
    // Tracked outside `state` so its lock cannot serialize callers
    active: Arc<AtomicUsize>,
    overlaps: Arc<AtomicUsize>,
}

impl MockI2c {
    /// Creates an empty bus with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attaches a device at `address`.
    pub fn add_device(&self, address: u8) {
        self.lock().devices.entry(address).or_insert_with(MockDevice::new);
    }

    /// Detaches the device at `address`; it will stop acknowledging.
    pub fn remove_device(&self, address: u8) {
        self.lock().devices.remove(&address);
    }

    /// Reads a register without bus traffic. Missing devices read as 0.
    pub fn register(&self, address: u8, reg: u8) -> u8 {
        self.lock()
            .devices
            .get(&address)
            .map(|d| d.registers[usize::from(reg)])
            .unwrap_or(0)
    }

    /// Reads `N` consecutive registers without bus traffic.
    pub fn registers<const N: usize>(&self, address: u8, first: u8) -> [u8; N] {
        let state = self.lock();
        let mut out = [0u8; N];
        if let Some(device) = state.devices.get(&address) {
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = device.registers[(usize::from(first) + i) % 256];
            }
        }
        out
    }

    /// Presets a register without bus traffic.
    pub fn set_register(&self, address: u8, reg: u8, value: u8) {
        if let Some(device) = self.lock().devices.get_mut(&address) {
            device.registers[usize::from(reg)] = value;
        }
    }

    /// Makes the next transaction fail with `fault` at its first address phase.
    pub fn fail_next(&self, fault: BusFault) {
        self.lock().faults.push_back(fault);
    }

    /// Makes every write to `reg` on `address` be NACKed.
    pub fn fail_register_write(&self, address: u8, reg: u8) {
        self.lock().failing_registers.insert((address, reg));
    }

    /// Clears register write failures.
    pub fn clear_register_faults(&self) {
        self.lock().failing_registers.clear();
    }

    /// Every transaction issued so far.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.lock().log.clone()
    }

    /// Transactions whose first address phase targeted `address`.
    pub fn transactions_to(&self, address: u8) -> Vec<Transaction> {
        self.lock()
            .log
            .iter()
            .filter(|t| t.address() == Some(address))
            .cloned()
            .collect()
    }

    /// Forgets recorded traffic.
    pub fn clear_log(&self) {
        self.lock().log.clear();
    }

    /// Configuration passed to [`I2cMaster::configure`], if any.
    pub fn configured(&self) -> Option<BusConfig> {
        self.lock().configured.clone()
    }

    /// How many times the bus was configured.
    pub fn configure_count(&self) -> usize {
        self.lock().configure_count
    }

    /// Timeouts passed to each [`I2cMaster::run`] call.
    pub fn timeouts(&self) -> Vec<Duration> {
        self.lock().timeouts.clone()
    }

    /// Keeps every transaction in flight for `hold` before it executes.
    pub fn set_hold(&self, hold: Duration) {
        self.lock().hold = hold;
    }

    /// Transactions that started while another one was still in flight.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn execute(&self, commands: &mut [Command<'_>], timeout: Duration) -> Result<(), BusFault> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.timeouts.push(timeout);

        let frames = commands.iter().map(record).collect();
        let mut result = if state.configured.is_some() {
            Ok(())
        } else {
            Err(BusFault::Driver(ERR_INVALID_STATE))
        };
        let mut injected = state.faults.pop_front();
        let mut target: Option<u8> = None;
        let mut expect_pointer = false;

        for command in commands.iter_mut() {
            if result.is_err() {
                break;
            }
            match command {
                Command::Start | Command::Stop => {}
                Command::Address { address, direction } => {
                    let (address, direction) = (*address, *direction);
                    if let Some(fault) = injected.take() {
                        result = Err(fault);
                    } else if !state.devices.contains_key(&address) {
                        result = Err(BusFault::Nack { address });
                    } else {
                        target = Some(address);
                        expect_pointer = direction == Direction::Write;
                    }
                }
                Command::Write(bytes) => {
                    let Some(address) = target else { continue };
                    let Some(device) = state.devices.get_mut(&address) else { continue };
                    for byte in bytes.iter() {
                        if expect_pointer {
                            device.pointer = *byte;
                            expect_pointer = false;
                        } else if state.failing_registers.contains(&(address, device.pointer)) {
                            result = Err(BusFault::Nack { address });
                            break;
                        } else {
                            device.registers[usize::from(device.pointer)] = *byte;
                            device.pointer = device.pointer.wrapping_add(1);
                        }
                    }
                }
                Command::Read { buffer, .. } => {
                    let Some(address) = target else { continue };
                    let Some(device) = state.devices.get_mut(&address) else { continue };
                    for slot in buffer.iter_mut() {
                        *slot = device.registers[usize::from(device.pointer)];
                        device.pointer = device.pointer.wrapping_add(1);
                    }
                }
            }
        }

        state.log.push(Transaction { frames, result });
        result
    }
}

fn record(command: &Command<'_>) -> Frame {
    match command {
        Command::Start => Frame::Start,
        Command::Address { address, direction } => Frame::Address(*address, *direction),
        Command::Write(bytes) => Frame::Write(bytes.to_vec()),
        Command::Read { buffer, ack } => Frame::Read(buffer.len(), *ack),
        Command::Stop => Frame::Stop,
    }
}

impl I2cMaster for MockI2c {
    fn configure(&mut self, config: &BusConfig) -> Result<(), BusFault> {
        let mut state = self.lock();
        state.configured = Some(config.clone());
        state.configure_count += 1;
        Ok(())
    }

    fn run(&mut self, commands: &mut [Command<'_>], timeout: Duration) -> Result<(), BusFault> {
        if self.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let hold = self.lock().hold;
        if !hold.is_zero() {
            std::thread::sleep(hold);
        }
        let result = self.execute(commands, timeout);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

// ============================================================================
// Delays
// ============================================================================

/// Records requested delays without sleeping.
#[derive(Clone, Debug, Default)]
pub struct MockDelay {
    /// Every requested delay in nanoseconds, in call order.
    pub calls_ns: Vec<u64>,
}

impl MockDelay {
    /// Creates a delay with no recorded calls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requested delays in whole milliseconds.
    pub fn calls_ms(&self) -> Vec<u64> {
        self.calls_ns.iter().map(|ns| ns / 1_000_000).collect()
    }

    /// Sum of all requested delays.
    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.calls_ns.iter().sum())
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.calls_ns.push(u64::from(ns));
    }

    fn delay_us(&mut self, us: u32) {
        self.calls_ns.push(u64::from(us) * 1_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.calls_ns.push(u64::from(ms) * 1_000_000);
    }
}

/// Sleeps the calling thread. Useful for desktop simulations.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> MockI2c {
        let mut mock = MockI2c::new();
        mock.configure(&BusConfig::default()).unwrap();
        mock
    }

    #[test]
    fn unconfigured_bus_rejects_transactions() {
        let mut mock = MockI2c::new();
        mock.add_device(0x40);
        let mut commands = [
            Command::Start,
            Command::Address {
                address: 0x40,
                direction: Direction::Write,
            },
            Command::Stop,
        ];
        assert_eq!(
            mock.run(&mut commands, Duration::from_millis(10)),
            Err(BusFault::Driver(ERR_INVALID_STATE))
        );
    }

    #[test]
    fn register_pointer_auto_increments() {
        let mut mock = configured();
        mock.add_device(0x40);
        let mut commands = [
            Command::Start,
            Command::Address {
                address: 0x40,
                direction: Direction::Write,
            },
            Command::Write(&[0x06, 1, 2, 3, 4]),
            Command::Stop,
        ];
        mock.run(&mut commands, Duration::from_millis(10)).unwrap();
        assert_eq!(mock.registers::<4>(0x40, 0x06), [1, 2, 3, 4]);
    }

    #[test]
    fn missing_device_nacks_address() {
        let mut mock = configured();
        let mut commands = [
            Command::Start,
            Command::Address {
                address: 0x41,
                direction: Direction::Read,
            },
            Command::Stop,
        ];
        assert_eq!(
            mock.run(&mut commands, Duration::from_millis(10)),
            Err(BusFault::Nack { address: 0x41 })
        );
        // Failed transactions are still recorded
        let log = mock.transactions();
        assert_eq!(log.len(), 1);
        assert!(log[0].result.is_err());
    }

    #[test]
    fn failing_register_write_nacks() {
        let mut mock = configured();
        mock.add_device(0x40);
        mock.fail_register_write(0x40, 0x0A);
        let mut commands = [
            Command::Start,
            Command::Address {
                address: 0x40,
                direction: Direction::Write,
            },
            Command::Write(&[0x0A, 0xFF]),
            Command::Stop,
        ];
        assert_eq!(
            mock.run(&mut commands, Duration::from_millis(10)),
            Err(BusFault::Nack { address: 0x40 })
        );
        assert_eq!(mock.register(0x40, 0x0A), 0);
    }

    #[test]
    fn overlapping_runs_are_counted() {
        use std::sync::Barrier;
        use std::thread;

        let mock = configured();
        mock.add_device(0x40);
        mock.set_hold(Duration::from_millis(20));
        let barrier = Arc::new(Barrier::new(4));
        let callers: Vec<_> = (0..4)
            .map(|_| {
                let mut mock = mock.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let mut commands = [
                        Command::Start,
                        Command::Address {
                            address: 0x40,
                            direction: Direction::Write,
                        },
                        Command::Stop,
                    ];
                    barrier.wait();
                    mock.run(&mut commands, Duration::from_millis(10))
                })
            })
            .collect();
        for caller in callers {
            caller.join().unwrap().unwrap();
        }
        // Unserialized callers are caught
        assert!(mock.overlaps() > 0);
    }

    #[test]
    fn transaction_helpers() {
        let t = Transaction {
            frames: vec![
                Frame::Start,
                Frame::Address(0x40, Direction::Write),
                Frame::Write(vec![1, 2]),
                Frame::Write(vec![3]),
                Frame::Stop,
            ],
            result: Ok(()),
        };
        assert_eq!(t.address(), Some(0x40));
        assert_eq!(t.written(), vec![1, 2, 3]);
        assert_eq!(t.starts(), 1);
        assert!(!t.is_read());
    }

    #[test]
    fn mock_delay_records_milliseconds() {
        let mut delay = MockDelay::new();
        delay.delay_ms(50);
        delay.delay_us(1500);
        assert_eq!(delay.calls_ms(), vec![50, 1]);
        assert_eq!(delay.total(), Duration::from_micros(51_500));
    }
}
