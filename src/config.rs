//! Capacity limits, timing defaults and configuration records.
//!
//! All state lives in fixed-capacity `heapless` storage, so the limits
//! below bound what `begin()` accepts. Timings can be tuned in one place;
//! the per-instance values are set through the controller's setters.

// Capacities

/// Maximum number of matrix row (drive) lines.
pub const MAX_MATRIX_ROWS: usize = 16;

/// Maximum number of matrix column (sense) lines.
pub const MAX_MATRIX_COLS: usize = 16;

/// Maximum number of matrix cells (`rows × cols`).
pub const MAX_MATRIX_CELLS: usize = MAX_MATRIX_ROWS * MAX_MATRIX_COLS;

/// Maximum number of direct GPIO buttons.
pub const MAX_GPIO_LINES: usize = 32;

/// Maximum number of rotary encoders.
pub const MAX_ENCODERS: usize = 8;

/// Maximum number of I2C port expanders (one per hardware address slot).
pub const MAX_EXPANDERS: usize = 8;

/// Input lines per expander device (two 8-bit ports).
pub const EXPANDER_LINES: usize = 16;

/// Upper bound on distinct pins checked for conflicts at `begin()`.
pub const MAX_TRACKED_PINS: usize =
    MAX_MATRIX_ROWS + MAX_MATRIX_COLS + MAX_GPIO_LINES + MAX_ENCODERS * 3;

// Timing

/// Default debounce interval for matrix cells, GPIO lines, encoder
/// buttons and expander bits (ms).
pub const DEFAULT_DEBOUNCE_MS: u32 = 50;

/// Default minimum spacing between accepted encoder transitions (ms).
pub const DEFAULT_ENCODER_DEBOUNCE_MS: u32 = 5;

/// Column settle time after driving a matrix row (µs).
pub const MATRIX_SETTLE_US: u32 = 10;

/// Encoder speed drops to zero after this long without a transition (ms).
pub const ENCODER_SPEED_IDLE_MS: u32 = 1000;

/// Quadrature half-steps per mechanical detent.
pub const STEPS_PER_DETENT: u16 = 4;

/// Illegal transitions tolerated before an encoder is declared invalid.
pub const DEFAULT_ENCODER_ERROR_THRESHOLD: u32 = 10;

/// Default bounded wait for expander read data (µs).
pub const DEFAULT_BUS_TIMEOUT_US: u32 = 1000;

/// Busy-wait between bus availability checks (µs).
pub const BUS_POLL_INTERVAL_US: u32 = 10;

// Profiles

/// Profiles configured until `set_profiles` is called.
pub const DEFAULT_PROFILE_COUNT: u8 = 1;

// Configuration records

/// Pins of one rotary encoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EncoderPins {
    pub a: u8,
    pub b: u8,
    /// Push-button pin, if the encoder has one.
    pub button: Option<u8>,
}

impl EncoderPins {
    pub const fn new(a: u8, b: u8) -> Self {
        Self { a, b, button: None }
    }

    pub const fn with_button(a: u8, b: u8, button: u8) -> Self {
        Self {
            a,
            b,
            button: Some(button),
        }
    }
}

/// Supported expander chip families.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExpanderKind {
    /// Microchip MCP23017, 16 lines, register-addressed.
    Mcp23017,
    /// NXP/TI PCF8574, 8 quasi-bidirectional lines, no registers.
    Pcf8574,
    /// NXP/TI PCF8575, 16 quasi-bidirectional lines, no registers.
    Pcf8575,
}

/// One I2C port expander.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ExpanderConfig {
    pub kind: ExpanderKind,
    /// 7-bit bus address.
    pub address: u8,
    /// Enable the internal pull-ups (MCP23017 only).
    pub pullups: bool,
    /// Arm the change-interrupt registers. The INT line itself is not
    /// used for scheduling; wire it as a GPIO input if needed.
    pub interrupt: bool,
}

impl ExpanderConfig {
    /// MCP23017 with pull-ups enabled and interrupts disarmed.
    pub const fn mcp23017(address: u8) -> Self {
        Self {
            kind: ExpanderKind::Mcp23017,
            address,
            pullups: true,
            interrupt: false,
        }
    }

    pub const fn pcf8574(address: u8) -> Self {
        Self {
            kind: ExpanderKind::Pcf8574,
            address,
            pullups: true,
            interrupt: false,
        }
    }

    pub const fn pcf8575(address: u8) -> Self {
        Self {
            kind: ExpanderKind::Pcf8575,
            address,
            pullups: true,
            interrupt: false,
        }
    }

    pub const fn with_pullups(mut self, pullups: bool) -> Self {
        self.pullups = pullups;
        self
    }

    pub const fn with_interrupt(mut self, interrupt: bool) -> Self {
        self.interrupt = interrupt;
        self
    }
}

/// Lowest and highest non-reserved 7-bit I2C addresses.
pub const I2C_ADDRESS_MIN: u8 = 0x08;
pub const I2C_ADDRESS_MAX: u8 = 0x77;
