//! Descriptor-oriented character device over the shared bus.
//!
//! [`BusCharDevice`] gives higher layers the familiar open / control-request /
//! read / write / close flow instead of bus primitives. Each descriptor is
//! bound to one target address through [`ControlRequest::BindAddress`];
//! reads and writes are then single-message transfers to that address.
//! [`ControlRequest::AtomicTransfer`] runs a list of sub-messages without any
//! other bus user interleaving.
//!
//! # Descriptor lifecycle
//!
//! ```text
//! open ──► Unbound ──BindAddress(a)──► Bound(a) ──close──► Closed
//!             ▲                           │
//!             └──────BindAddress(0)───────┘
//! ```
//!
//! Descriptor ids are handed out in increasing order and never reused within
//! a session. Only open descriptors count against the table size, so closing
//! one frees room for the next `open`. Using an unbound, closed or unknown
//! descriptor for I/O is a caller error ([`Error::InvalidDescriptor`]), never
//! a bus fault.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rs_iobus::bus::SharedBus;
//! use rs_iobus::chardev::{BusCharDevice, ControlRequest};
//! use rs_iobus::hal::MockI2c;
//! use rs_iobus::{BusConfig, CharDeviceConfig};
//!
//! let mock = MockI2c::new();
//! mock.add_device(0x40);
//! let bus = Arc::new(SharedBus::new(mock.clone(), BusConfig::default()));
//! bus.initialize().unwrap();
//!
//! let dev = BusCharDevice::new(Arc::clone(&bus), &CharDeviceConfig::default());
//! let fd = dev.open("/dev/i2c/0").unwrap();
//! dev.control_request(fd, ControlRequest::BindAddress(0x40)).unwrap();
//! assert_eq!(dev.write(fd, &[0x00, 0x11]).unwrap(), 2);
//! dev.close(fd).unwrap();
//!
//! assert_eq!(mock.register(0x40, 0x00), 0x11);
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, trace};

use crate::bus::{check_address, Framing, Segment, SharedBus};
use crate::config::{CharDeviceConfig, ShortString};
use crate::error::{Error, InvalidArgument, Result};
use crate::traits::I2cMaster;

/// Descriptor id returned by [`BusCharDevice::open`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fd(pub u32);

impl core::fmt::Display for Fd {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address value meaning "no target bound".
pub const UNBOUND: u8 = 0;

#[derive(Debug, Default)]
struct Table {
    next: u32,
    // Open descriptors and their bound address
    open: BTreeMap<Fd, u8>,
}

/// One sub-message of an [`ControlRequest::AtomicTransfer`].
#[derive(Debug, PartialEq, Eq)]
pub struct Message<'a> {
    /// Target override; `None` uses the descriptor's bound address.
    /// `Some(0)` names no target and is rejected like an unbound descriptor.
    pub address: Option<u8>,
    /// Data phase.
    pub segment: Segment<'a>,
}

impl<'a> Message<'a> {
    /// Write to the bound address.
    pub fn write(bytes: &'a [u8]) -> Self {
        Self {
            address: None,
            segment: Segment::Write(bytes),
        }
    }

    /// Read from the bound address.
    pub fn read(buf: &'a mut [u8]) -> Self {
        Self {
            address: None,
            segment: Segment::Read(buf),
        }
    }

    /// Overrides the target address.
    pub fn to(mut self, address: u8) -> Self {
        self.address = Some(address);
        self
    }
}

/// Control request accepted by [`BusCharDevice::control_request`].
#[derive(Debug)]
pub enum ControlRequest<'r, 'a> {
    /// Bind the descriptor to a 7-bit address. `0` unbinds it.
    BindAddress(u8),
    /// Run the messages as one atomic exchange.
    ///
    /// Consecutive messages to the same target form one transaction, each
    /// message opening its own phase with a repeated start and address byte.
    /// A change of target starts a new transaction while the bus stays
    /// locked. The first failure aborts the request.
    AtomicTransfer(&'r mut [Message<'a>]),
}

/// Virtual multi-descriptor device on top of a [`SharedBus`].
pub struct BusCharDevice<M> {
    bus: Arc<SharedBus<M>>,
    path: ShortString,
    max_descriptors: usize,
    table: Mutex<Table>,
}

impl<M: I2cMaster> BusCharDevice<M> {
    /// Creates the device for `config.path`.
    pub fn new(bus: Arc<SharedBus<M>>, config: &CharDeviceConfig) -> Self {
        debug!("[I2C] Registering {} device", config.path);
        Self {
            bus,
            path: config.path.clone(),
            max_descriptors: config.max_descriptors,
            table: Mutex::new(Table::default()),
        }
    }

    /// Mount path of this device.
    pub fn path(&self) -> &str {
        self.path.as_str()
    }

    /// The bus this device issues transactions on.
    pub fn bus(&self) -> &Arc<SharedBus<M>> {
        &self.bus
    }

    /// Allocates the next descriptor, initially unbound.
    ///
    /// Fails only while `max_descriptors` descriptors are open at once.
    pub fn open(&self, path: &str) -> Result<Fd> {
        let mut table = self.table();
        let next = table.next.checked_add(1);
        match next {
            Some(next) if table.open.len() < self.max_descriptors => {
                let fd = Fd(table.next);
                table.next = next;
                table.open.insert(fd, UNBOUND);
                debug!("[I2C] Opening {} (fd: {})", path, fd);
                Ok(fd)
            }
            _ => {
                error!("[I2C] Cannot open {}: descriptor table full", path);
                Err(Error::DescriptorTableFull)
            }
        }
    }

    /// Closes a descriptor and frees its table entry. Its id is not handed
    /// out again.
    pub fn close(&self, fd: Fd) -> Result<()> {
        match self.table().open.remove(&fd) {
            Some(_) => {
                debug!("[I2C fd:{}] Closing", fd);
                Ok(())
            }
            None => Err(Error::InvalidDescriptor(fd)),
        }
    }

    /// Number of descriptors currently open.
    pub fn open_count(&self) -> usize {
        self.table().open.len()
    }

    /// Address bound to an open descriptor, `None` while unbound.
    pub fn bound_address(&self, fd: Fd) -> Result<Option<u8>> {
        match self.slot(fd)? {
            UNBOUND => Ok(None),
            address => Ok(Some(address)),
        }
    }

    /// Executes a control request on an open descriptor.
    pub fn control_request(&self, fd: Fd, request: ControlRequest<'_, '_>) -> Result<()> {
        match request {
            ControlRequest::BindAddress(address) => self.bind(fd, address),
            ControlRequest::AtomicTransfer(messages) => self.transfer(fd, messages),
        }
    }

    /// Writes `buf` to the bound address in one single-message transaction.
    ///
    /// Returns the number of bytes written. An empty buffer succeeds without
    /// touching the bus.
    pub fn write(&self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let address = self.require_bound(fd)?;
        if buf.is_empty() {
            return Ok(0);
        }
        self.bus.write(address, buf).map_err(|e| {
            error!("[I2C fd:{}, addr:{:02x}] Write failure: {}", fd, address, e);
            e
        })?;
        trace!("[I2C fd:{}, addr:{:02x}] Wrote {} bytes", fd, address, buf.len());
        Ok(buf.len())
    }

    /// Fills `buf` from the bound address in one single-message transaction.
    ///
    /// Every byte but the last is acknowledged. Returns the number of bytes
    /// read; an empty buffer succeeds without touching the bus.
    pub fn read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let address = self.require_bound(fd)?;
        if buf.is_empty() {
            return Ok(0);
        }
        let len = buf.len();
        self.bus.read(address, buf).map_err(|e| {
            error!("[I2C fd:{}, addr:{:02x}] Read failure: {}", fd, address, e);
            e
        })?;
        trace!("[I2C fd:{}, addr:{:02x}] Read {} bytes", fd, address, len);
        Ok(len)
    }

    fn bind(&self, fd: Fd, address: u8) -> Result<()> {
        check_address(address)?;
        match self.table().open.get_mut(&fd) {
            Some(bound) => {
                *bound = address;
                debug!("[I2C fd:{}] Bound to address {:02x}", fd, address);
                Ok(())
            }
            None => Err(Error::InvalidDescriptor(fd)),
        }
    }

    fn transfer(&self, fd: Fd, messages: &mut [Message<'_>]) -> Result<()> {
        let bound = self.slot(fd)?;
        if messages.is_empty() {
            return Err(InvalidArgument::EmptyTransaction.into());
        }

        // Resolve every target before the first byte goes out.
        let mut targets = Vec::with_capacity(messages.len());
        for message in messages.iter() {
            let address = match message.address.unwrap_or(bound) {
                UNBOUND => {
                    error!("[I2C fd:{}] Sub-message has no target address", fd);
                    return Err(Error::InvalidDescriptor(fd));
                }
                address => address,
            };
            check_address(address)?;
            targets.push(address);
        }

        let mut session = self.bus.session()?;
        let mut start = 0;
        while start < messages.len() {
            let address = targets[start];
            let end = targets[start..]
                .iter()
                .position(|a| *a != address)
                .map_or(messages.len(), |n| start + n);

            let mut segments: Vec<Segment<'_>> = messages[start..end]
                .iter_mut()
                .map(|m| m.segment.reborrow())
                .collect();
            session
                .execute_framed(address, &mut segments, Framing::Restart)
                .map_err(|e| {
                    error!("[I2C fd:{}, addr:{:02x}] Transaction failure: {}", fd, address, e);
                    e
                })?;
            trace!(
                "[I2C fd:{}, addr:{:02x}] {} message(s) transferred",
                fd,
                address,
                end - start
            );
            start = end;
        }
        Ok(())
    }

    fn require_bound(&self, fd: Fd) -> Result<u8> {
        match self.slot(fd)? {
            UNBOUND => {
                error!("[I2C fd:{}] No address has been assigned", fd);
                Err(Error::InvalidDescriptor(fd))
            }
            address => Ok(address),
        }
    }

    fn slot(&self, fd: Fd) -> Result<u8> {
        self.table()
            .open
            .get(&fd)
            .copied()
            .ok_or(Error::InvalidDescriptor(fd))
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
