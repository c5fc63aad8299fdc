//! I2C port-expander driver.
//!
//! Supports the MCP23017 (register-addressed, 2 × 8 lines) and the
//! PCF8574/PCF8575 family (quasi-bidirectional, 8 or 16 lines, no
//! registers). Each device is initialised once as all-inputs and then
//! bulk-read every poll; the sixteen lines are debounced independently
//! from that single read.
//!
//! Reads are bounded: after requesting data the driver waits at most
//! `timeout_us` for it to become available.

use crate::bus::{describe_status, Bus, STATUS_OK};
use crate::config::{ExpanderConfig, ExpanderKind, BUS_POLL_INTERVAL_US, EXPANDER_LINES};
use crate::debounce::DebouncedLine;
use crate::error::{ControllerError, ErrorKind};
use crate::hal::Board;

// MCP23017 register addresses (IOCON.BANK = 0, power-on default)
const IODIRA: u8 = 0x00;
const IPOLA: u8 = 0x02;
const GPINTENA: u8 = 0x04;
const DEFVALA: u8 = 0x06;
const INTCONA: u8 = 0x08;
const IOCON: u8 = 0x0A;
const GPPUA: u8 = 0x0C;
const GPIOA: u8 = 0x12;

/// IOCON: mirror INTA/INTB so either pin signals any change.
const IOCON_MIRROR: u8 = 0x40;

/// Run one register write (`reg`, then `data` with auto-increment).
fn write_registers<B: Bus>(bus: &mut B, address: u8, reg: u8, data: &[u8]) -> Result<(), u8> {
    bus.begin_transmission(address);
    bus.write(reg);
    for &byte in data {
        bus.write(byte);
    }
    match bus.end_transmission() {
        STATUS_OK => Ok(()),
        status => Err(status),
    }
}

/// Write raw port bytes (PCF family, no register pointer).
fn write_ports<B: Bus>(bus: &mut B, address: u8, data: &[u8]) -> Result<(), u8> {
    bus.begin_transmission(address);
    for &byte in data {
        bus.write(byte);
    }
    match bus.end_transmission() {
        STATUS_OK => Ok(()),
        status => Err(status),
    }
}

fn bus_error(status: u8) -> ControllerError {
    ControllerError::new(ErrorKind::BusError, describe_status(status))
}

impl ExpanderKind {
    /// Bytes returned by one bulk read.
    pub fn port_count(&self) -> u8 {
        match self {
            ExpanderKind::Mcp23017 | ExpanderKind::Pcf8575 => 2,
            ExpanderKind::Pcf8574 => 1,
        }
    }

    /// Configure every line as an input.
    pub fn initialize<B: Bus>(&self, bus: &mut B, config: &ExpanderConfig) -> Result<(), ControllerError> {
        let address = config.address;
        let fault = |status| ControllerError::new(ErrorKind::ExpanderFault, describe_status(status));

        match self {
            ExpanderKind::Mcp23017 => {
                let iocon = if config.interrupt { IOCON_MIRROR } else { 0x00 };
                let pullups = if config.pullups { 0xFF } else { 0x00 };
                let int_enable = if config.interrupt { 0xFF } else { 0x00 };

                write_registers(bus, address, IOCON, &[iocon]).map_err(fault)?;
                write_registers(bus, address, IODIRA, &[0xFF, 0xFF]).map_err(fault)?;
                write_registers(bus, address, IPOLA, &[0x00, 0x00]).map_err(fault)?;
                write_registers(bus, address, GPPUA, &[pullups, pullups]).map_err(fault)?;
                write_registers(bus, address, DEFVALA, &[0x00, 0x00]).map_err(fault)?;
                write_registers(bus, address, INTCONA, &[0x00, 0x00]).map_err(fault)?;
                write_registers(bus, address, GPINTENA, &[int_enable, int_enable]).map_err(fault)?;
            }
            // Writing 1s releases the quasi-bidirectional lines to their weak
            // pull-ups, which is the input state for this family.
            ExpanderKind::Pcf8574 => write_ports(bus, address, &[0xFF]).map_err(fault)?,
            ExpanderKind::Pcf8575 => write_ports(bus, address, &[0xFF, 0xFF]).map_err(fault)?,
        }

        Ok(())
    }

    /// Read both ports as one word (port A / P0 in the low byte).
    ///
    /// Lines a device does not have read as high (inactive).
    pub fn read_ports<B: Bus, P: Board>(
        &self,
        bus: &mut B,
        board: &mut P,
        address: u8,
        timeout_us: u32,
    ) -> Result<u16, ControllerError> {
        if let ExpanderKind::Mcp23017 = self {
            write_registers(bus, address, GPIOA, &[]).map_err(bus_error)?;
        }

        let count = self.port_count();
        bus.request_from(address, count);
        match bus.read_status() {
            STATUS_OK => {}
            status => return Err(bus_error(status)),
        }

        let start = board.micros();
        while bus.available() < count as usize {
            if board.micros().wrapping_sub(start) > timeout_us {
                return Err(ControllerError::new(
                    ErrorKind::TimeoutError,
                    "expander read timed out",
                ));
            }
            board.delay_us(BUS_POLL_INTERVAL_US);
        }

        let low = bus.read().unwrap_or(0xFF);
        let high = if count == 2 {
            bus.read().unwrap_or(0xFF)
        } else {
            0xFF
        };
        Ok(u16::from_le_bytes([low, high]))
    }
}

/// Runtime state of one configured expander.
#[derive(Clone, Debug)]
pub struct ExpanderDevice {
    pub config: ExpanderConfig,
    /// Initialised successfully since the last `begin()`.
    online: bool,
    /// Raw word from the last successful read.
    last_reading: u16,
    lines: [DebouncedLine; EXPANDER_LINES],
    /// A fault has been reported and not yet cleared.
    fault_latched: bool,
}

/// What one poll of a device produced.
pub(crate) enum DevicePoll {
    /// Bits whose confirmed state toggled (bit set = toggled).
    Changed(u16),
    /// The read failed; the error should be reported (latch was free).
    Fault(ControllerError),
    /// The read failed but the fault is already latched.
    Suppressed,
}

impl ExpanderDevice {
    pub fn new(config: ExpanderConfig) -> Self {
        Self {
            config,
            online: false,
            last_reading: 0xFFFF,
            lines: [DebouncedLine::new(); EXPANDER_LINES],
            fault_latched: false,
        }
    }

    /// Initialise the chip, marking the device online on success.
    pub fn initialize<B: Bus>(&mut self, bus: &mut B) -> Result<(), ControllerError> {
        self.config.kind.initialize(bus, &self.config)?;
        self.online = true;
        Ok(())
    }

    /// One poll: bring the device online if needed, read, debounce.
    pub(crate) fn poll<B: Bus, P: Board>(
        &mut self,
        bus: &mut B,
        board: &mut P,
        debounce_ms: u32,
        timeout_us: u32,
    ) -> DevicePoll {
        if !self.online {
            if let Err(e) = self.initialize(bus) {
                return self.fault(e);
            }
        }

        let reading = match self
            .config
            .kind
            .read_ports(bus, board, self.config.address, timeout_us)
        {
            Ok(word) => word,
            Err(e) => return self.fault(e),
        };
        self.last_reading = reading;

        let now = board.millis();
        let mut toggled = 0u16;
        for (bit, line) in self.lines.iter_mut().enumerate() {
            // Active-low: a line pulled to ground is active.
            let active = reading & (1 << bit) == 0;
            if line.update(active, now, debounce_ms) {
                toggled |= 1 << bit;
            }
        }

        DevicePoll::Changed(toggled)
    }

    fn fault(&mut self, error: ControllerError) -> DevicePoll {
        if self.fault_latched {
            DevicePoll::Suppressed
        } else {
            self.fault_latched = true;
            DevicePoll::Fault(error)
        }
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Raw word from the last successful read (bit clear = pulled low).
    pub fn last_reading(&self) -> u16 {
        self.last_reading
    }

    /// Debounced state of all lines (bit set = active).
    pub fn confirmed(&self) -> u16 {
        self.lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line.state())
            .fold(0u16, |acc, (bit, _)| acc | (1 << bit))
    }

    /// Debounced state of one line.
    pub fn line(&self, bit: usize) -> bool {
        self.lines.get(bit).map(|l| l.state()).unwrap_or(false)
    }

    pub(crate) fn clear_fault(&mut self) {
        self.fault_latched = false;
    }

    pub fn is_fault_latched(&self) -> bool {
        self.fault_latched
    }
}
