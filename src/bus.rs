//! I2C transport interface used by the expander driver.
//!
//! The driver talks to a transaction-style bus: begin a write to an
//! address, queue bytes, end the transaction and get a status code back;
//! then request a number of bytes and drain them as they become
//! available. [`I2cBus`] implements this over any blocking
//! `embedded-hal` I2C peripheral.

use embedded_hal::i2c::{Error as _, ErrorKind, I2c, NoAcknowledgeSource};
use heapless::{Deque, Vec};

/// Transaction completed.
pub const STATUS_OK: u8 = 0;
/// Queued data did not fit the transmit buffer.
pub const STATUS_DATA_TOO_LONG: u8 = 1;
/// Address byte was not acknowledged.
pub const STATUS_ADDRESS_NACK: u8 = 2;
/// A data byte was not acknowledged.
pub const STATUS_DATA_NACK: u8 = 3;
/// Any other transport failure (bus error, arbitration loss, overrun).
pub const STATUS_OTHER: u8 = 4;
/// The transport itself timed out.
pub const STATUS_TIMEOUT: u8 = 5;

/// Human-readable cause for a non-zero transaction status.
pub fn describe_status(status: u8) -> &'static str {
    match status {
        STATUS_OK => "success",
        STATUS_DATA_TOO_LONG => "data too long for transmit buffer",
        STATUS_ADDRESS_NACK => "address not acknowledged",
        STATUS_DATA_NACK => "data not acknowledged",
        STATUS_OTHER => "bus error",
        STATUS_TIMEOUT => "transport timeout",
        _ => "unknown bus status",
    }
}

/// Transaction-level I2C primitives.
pub trait Bus {
    /// Start queueing a write to `address`.
    fn begin_transmission(&mut self, address: u8);

    /// Queue one byte; returns the number of bytes accepted.
    fn write(&mut self, byte: u8) -> usize;

    /// Send the queued bytes; returns a status code (`STATUS_OK` on success).
    fn end_transmission(&mut self) -> u8;

    /// Read up to `count` bytes from `address`; returns how many were
    /// received into the read buffer.
    fn request_from(&mut self, address: u8, count: u8) -> u8;

    /// Bytes waiting in the read buffer.
    fn available(&mut self) -> usize;

    /// Take the next buffered byte.
    fn read(&mut self) -> Option<u8>;

    /// Status of the last `request_from` (`STATUS_OK` if the transport
    /// accepted it).
    fn read_status(&mut self) -> u8 {
        STATUS_OK
    }
}

/// Placeholder bus for controllers without expanders.
///
/// Every transaction fails with `STATUS_OTHER` and nothing is ever
/// available.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoBus;

impl Bus for NoBus {
    fn begin_transmission(&mut self, _address: u8) {}

    fn write(&mut self, _byte: u8) -> usize {
        0
    }

    fn end_transmission(&mut self) -> u8 {
        STATUS_OTHER
    }

    fn request_from(&mut self, _address: u8, _count: u8) -> u8 {
        0
    }

    fn available(&mut self) -> usize {
        0
    }

    fn read(&mut self) -> Option<u8> {
        None
    }

    fn read_status(&mut self) -> u8 {
        STATUS_OTHER
    }
}

/// Transmit/receive buffer size of [`I2cBus`].
pub const BUS_BUFFER_LEN: usize = 32;

/// [`Bus`] adapter over a blocking `embedded-hal` I2C peripheral.
///
/// Writes are buffered until `end_transmission`, which performs a single
/// I2C write. `request_from` performs a single I2C read into an internal
/// queue.
pub struct I2cBus<I2C> {
    i2c: I2C,
    address: u8,
    tx: Vec<u8, BUS_BUFFER_LEN>,
    rx: Deque<u8, BUS_BUFFER_LEN>,
    overflow: bool,
    read_status: u8,
}

impl<I2C> I2cBus<I2C>
where
    I2C: I2c,
{
    pub fn new(i2c: I2C) -> Self {
        Self {
            i2c,
            address: 0,
            tx: Vec::new(),
            rx: Deque::new(),
            overflow: false,
            read_status: STATUS_OK,
        }
    }

    /// Give back the wrapped peripheral.
    pub fn release(self) -> I2C {
        self.i2c
    }
}

/// Map an `embedded-hal` error kind onto a transaction status code.
pub fn status_for(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address) => STATUS_ADDRESS_NACK,
        ErrorKind::NoAcknowledge(_) => STATUS_DATA_NACK,
        _ => STATUS_OTHER,
    }
}

impl<I2C> Bus for I2cBus<I2C>
where
    I2C: I2c,
{
    fn begin_transmission(&mut self, address: u8) {
        self.address = address;
        self.tx.clear();
        self.overflow = false;
    }

    fn write(&mut self, byte: u8) -> usize {
        match self.tx.push(byte) {
            Ok(()) => 1,
            Err(_) => {
                self.overflow = true;
                0
            }
        }
    }

    fn end_transmission(&mut self) -> u8 {
        if self.overflow {
            return STATUS_DATA_TOO_LONG;
        }

        match self.i2c.write(self.address, &self.tx) {
            Ok(()) => STATUS_OK,
            Err(e) => status_for(e.kind()),
        }
    }

    fn request_from(&mut self, address: u8, count: u8) -> u8 {
        self.rx.clear();

        let len = (count as usize).min(BUS_BUFFER_LEN);
        let mut buf = [0u8; BUS_BUFFER_LEN];
        if let Err(e) = self.i2c.read(address, &mut buf[..len]) {
            self.read_status = status_for(e.kind());
            return 0;
        }
        self.read_status = STATUS_OK;

        for &byte in &buf[..len] {
            // Cannot overflow: `len` is bounded by the queue capacity.
            let _ = self.rx.push_back(byte);
        }
        len as u8
    }

    fn available(&mut self) -> usize {
        self.rx.len()
    }

    fn read(&mut self) -> Option<u8> {
        self.rx.pop_front()
    }

    fn read_status(&mut self) -> u8 {
        self.read_status
    }
}
