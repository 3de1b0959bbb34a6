//! Shared bus transaction engine.
//!
//! [`SharedBus`] owns the single bus master and serializes every transaction
//! issued by every logical device on the bus (the character device and the
//! PWM driver share one instance). A transaction is described as an ordered
//! list of [`Segment`]s for one target address and lowered to the primitive
//! [`Command`] list the backend executes:
//!
//! ```text
//! write [reg]            read [a, b, c]
//! START  ADDR+W  reg  START  ADDR+R  a(ACK) b(ACK) c(NACK)  STOP
//!                     ^ repeated start, no STOP in between
//! ```
//!
//! - A direction change between segments emits a repeated start and a fresh
//!   address byte.
//! - Under [`Framing::Merge`] consecutive segments with the same direction
//!   continue the current phase. Under [`Framing::Restart`] every segment opens
//!   its own phase, so a second write sets a new register pointer.
//! - Every received byte is ACKed except the last byte of a read run, which is
//!   NACKed to tell the target to stop sending.
//!
//! No retries happen here. Callers decide whether a [`BusFault`] means
//! "device absent" (probing) or "transient fault" (data transfer).
//!
//! # Example
//!
//! ```rust
//! use rs_iobus::bus::{Segment, SharedBus};
//! use rs_iobus::hal::MockI2c;
//! use rs_iobus::BusConfig;
//!
//! let mock = MockI2c::new();
//! mock.add_device(0x40);
//! mock.set_register(0x40, 0x00, 0x11);
//!
//! let bus = SharedBus::new(mock.clone(), BusConfig::default());
//! bus.initialize().unwrap();
//!
//! let mut value = [0u8; 1];
//! bus.write_read(0x40, &[0x00], &mut value).unwrap();
//! assert_eq!(value, [0x11]);
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, info, trace};

use crate::config::BusConfig;
use crate::error::{BusFault, Error, InvalidArgument, Result};
use crate::traits::{Ack, Command, Direction, I2cMaster};

/// Highest valid 7-bit address.
pub const MAX_ADDRESS: u8 = 0x7f;

/// First address probed by [`SharedBus::scan`]; lower ones are reserved.
pub const SCAN_FIRST: u8 = 0x03;

/// One past the last address probed by [`SharedBus::scan`].
pub const SCAN_END: u8 = 0x78;

/// One data phase of a transaction.
#[derive(Debug, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Bytes sent to the target.
    Write(&'a [u8]),
    /// Buffer filled from the target.
    Read(&'a mut [u8]),
}

impl Segment<'_> {
    /// Direction of this phase.
    #[inline]
    pub fn direction(&self) -> Direction {
        match self {
            Segment::Write(_) => Direction::Write,
            Segment::Read(_) => Direction::Read,
        }
    }

    /// Number of bytes moved by this phase.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Segment::Write(bytes) => bytes.len(),
            Segment::Read(buf) => buf.len(),
        }
    }

    /// Returns true if the phase moves no data.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows this segment for a shorter lifetime.
    pub fn reborrow(&mut self) -> Segment<'_> {
        match self {
            Segment::Write(bytes) => Segment::Write(*bytes),
            Segment::Read(buf) => Segment::Read(&mut **buf),
        }
    }
}

/// How segments of one transaction map onto addressed phases.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Framing {
    /// Same-direction neighbours share one phase; only a direction change
    /// restarts.
    #[default]
    Merge,
    /// Every segment gets its own repeated start and address byte.
    Restart,
}

/// Checks that `address` fits in 7 bits.
pub fn check_address(address: u8) -> Result<()> {
    if address > MAX_ADDRESS {
        return Err(InvalidArgument::Address(address).into());
    }
    Ok(())
}

/// Lowers a segment list into the command list for one transaction.
///
/// Empty read segments are skipped. An empty write still produces an
/// address phase (address-only probe). A list with nothing to send is
/// rejected.
pub fn lower<'s>(address: u8, segments: &'s mut [Segment<'_>]) -> Result<Vec<Command<'s>>> {
    lower_framed(address, segments, Framing::Merge)
}

/// [`lower`] with explicit phase boundaries.
pub fn lower_framed<'s>(
    address: u8,
    segments: &'s mut [Segment<'_>],
    framing: Framing,
) -> Result<Vec<Command<'s>>> {
    check_address(address)?;

    // Empty reads take no part in the framing; None marks them.
    let phases: Vec<Option<Direction>> = segments
        .iter()
        .map(|s| match s {
            Segment::Read(buf) if buf.is_empty() => None,
            other => Some(other.direction()),
        })
        .collect();
    if phases.iter().all(Option::is_none) {
        return Err(InvalidArgument::EmptyTransaction.into());
    }

    let mut commands = Vec::with_capacity(segments.len() * 3 + 2);
    commands.push(Command::Start);
    let mut current: Option<Direction> = None;

    for (i, segment) in segments.iter_mut().enumerate() {
        let Some(direction) = phases[i] else {
            continue;
        };

        if current != Some(direction) || framing == Framing::Restart {
            if current.is_some() {
                commands.push(Command::Start);
            }
            commands.push(Command::Address { address, direction });
            current = Some(direction);
        }

        match segment {
            Segment::Write(bytes) => {
                if !bytes.is_empty() {
                    commands.push(Command::Write(*bytes));
                }
            }
            Segment::Read(buf) => {
                let ends_run = framing == Framing::Restart
                    || phases[i + 1..].iter().flatten().next() != Some(&Direction::Read);
                let buf: &'s mut [u8] = buf;
                if ends_run {
                    let last = buf.len() - 1;
                    let (head, tail) = buf.split_at_mut(last);
                    if !head.is_empty() {
                        commands.push(Command::Read {
                            buffer: head,
                            ack: Ack::Ack,
                        });
                    }
                    commands.push(Command::Read {
                        buffer: tail,
                        ack: Ack::Nack,
                    });
                } else {
                    commands.push(Command::Read {
                        buffer: buf,
                        ack: Ack::Ack,
                    });
                }
            }
        }
    }

    commands.push(Command::Stop);
    Ok(commands)
}

// ============================================================================
// Shared Bus
// ============================================================================

struct BusState<M> {
    master: M,
    initialized: bool,
}

/// The single bus master, shared by every device on the bus.
///
/// # Thread Safety
///
/// All access goes through one `Mutex`, so transactions from different
/// threads never overlap on the wire. Share it with `Arc<SharedBus<M>>`.
pub struct SharedBus<M> {
    state: Mutex<BusState<M>>,
    config: BusConfig,
}

impl<M: I2cMaster> SharedBus<M> {
    /// Wraps a bus master. The bus is unusable until [`initialize`](Self::initialize).
    pub fn new(master: M, config: BusConfig) -> Self {
        Self {
            state: Mutex::new(BusState {
                master,
                initialized: false,
            }),
            config,
        }
    }

    /// Configures the bus master. Later calls are no-ops.
    pub fn initialize(&self) -> Result<()> {
        let mut state = self.lock();
        if state.initialized {
            debug!("[I2C] Bus already initialized");
            return Ok(());
        }
        info!(
            "[I2C] Configuring bus master (sda:{}, scl:{}, {} Hz)",
            self.config.sda_pin, self.config.scl_pin, self.config.clock_hz
        );
        state.master.configure(&self.config)?;
        state.initialized = true;
        Ok(())
    }

    /// Returns true once [`initialize`](Self::initialize) has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    /// Bus configuration.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Takes exclusive ownership of the bus for several transactions.
    pub fn session(&self) -> Result<BusSession<'_, M>> {
        let guard = self.lock();
        if !guard.initialized {
            return Err(Error::BusNotInitialized);
        }
        Ok(BusSession {
            guard,
            timeout: self.config.timeout(),
        })
    }

    /// Executes one transaction.
    pub fn execute(&self, address: u8, segments: &mut [Segment<'_>]) -> Result<()> {
        self.session()?.execute(address, segments)
    }

    /// Single-message write.
    pub fn write(&self, address: u8, bytes: &[u8]) -> Result<()> {
        self.execute(address, &mut [Segment::Write(bytes)])
    }

    /// Single-message read.
    pub fn read(&self, address: u8, buf: &mut [u8]) -> Result<()> {
        self.execute(address, &mut [Segment::Read(buf)])
    }

    /// Compound write-then-read with a repeated start in between.
    pub fn write_read(&self, address: u8, bytes: &[u8], buf: &mut [u8]) -> Result<()> {
        self.execute(address, &mut [Segment::Write(bytes), Segment::Read(buf)])
    }

    /// Address-only write; succeeds if a device acknowledges `address`.
    pub fn probe(&self, address: u8) -> Result<()> {
        self.write(address, &[])
    }

    /// Probes every non-reserved address.
    pub fn scan(&self) -> Result<ScanReport> {
        let mut report = ScanReport::default();
        let mut session = self.session()?;
        for address in SCAN_FIRST..SCAN_END {
            report.results[usize::from(address)] = match session.execute(address, &mut [Segment::Write(&[])]) {
                Ok(()) => ProbeResult::Present,
                Err(Error::Bus(BusFault::Timeout)) => ProbeResult::Timeout,
                Err(_) => ProbeResult::Absent,
            };
        }
        Ok(report)
    }

    fn lock(&self) -> MutexGuard<'_, BusState<M>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive hold on the bus.
///
/// No other device can issue transactions while a session is alive.
pub struct BusSession<'b, M> {
    guard: MutexGuard<'b, BusState<M>>,
    timeout: Duration,
}

impl<M: I2cMaster> BusSession<'_, M> {
    /// Executes one transaction inside this session.
    pub fn execute(&mut self, address: u8, segments: &mut [Segment<'_>]) -> Result<()> {
        self.execute_framed(address, segments, Framing::Merge)
    }

    /// Executes one transaction with the given phase boundaries.
    pub fn execute_framed(
        &mut self,
        address: u8,
        segments: &mut [Segment<'_>],
        framing: Framing,
    ) -> Result<()> {
        let mut commands = lower_framed(address, segments, framing)?;
        match self.guard.master.run(&mut commands, self.timeout) {
            Ok(()) => {
                trace!("[I2C addr:{:02x}] Transaction success", address);
                Ok(())
            }
            Err(fault) => {
                debug!("[I2C addr:{:02x}] Transaction failure: {}", address, fault);
                Err(fault.into())
            }
        }
    }
}

// ============================================================================
// Scan
// ============================================================================

/// Outcome of probing one address.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProbeResult {
    /// Reserved address, not probed.
    #[default]
    Skipped,
    /// A device acknowledged.
    Present,
    /// Nothing acknowledged.
    Absent,
    /// The bus timed out (stuck line or clock stretching).
    Timeout,
}

/// Result of [`SharedBus::scan`], formats as a 16-column address table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanReport {
    results: [ProbeResult; 128],
}

impl Default for ScanReport {
    fn default() -> Self {
        Self {
            results: [ProbeResult::Skipped; 128],
        }
    }
}

impl ScanReport {
    /// Result for one address.
    pub fn get(&self, address: u8) -> ProbeResult {
        self.results
            .get(usize::from(address))
            .copied()
            .unwrap_or(ProbeResult::Skipped)
    }

    /// Addresses that acknowledged.
    pub fn present(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=MAX_ADDRESS).filter(|a| self.get(*a) == ProbeResult::Present)
    }
}

impl core::fmt::Display for ScanReport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "    ")?;
        for col in 0..16 {
            write!(f, "  {:x}", col)?;
        }
        for row in 0..8u8 {
            write!(f, "\n{:02x}:", row * 16)?;
            for col in 0..16u8 {
                match self.get(row * 16 + col) {
                    ProbeResult::Skipped => write!(f, "   ")?,
                    ProbeResult::Present => write!(f, " {:02x}", row * 16 + col)?,
                    ProbeResult::Absent => write!(f, " --")?,
                    ProbeResult::Timeout => write!(f, " ??")?,
                }
            }
        }
        Ok(())
    }
}
