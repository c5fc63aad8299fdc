//! Error types for the input engine.
//!
//! We avoid `alloc` - every error carries only fixed-size data so it can
//! live in the controller's single "last error" slot and be copied into
//! event batches. Implements `defmt::Format` behind the `defmt` feature.

use core::fmt;

/// Classification of a controller fault.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorKind {
    /// No fault recorded.
    #[default]
    None,

    // Configuration (detected by `begin`)
    /// The board rejected a pin number.
    InvalidPin,

    /// The same pin is assigned to more than one input.
    PinConflict,

    /// Structural misconfiguration (capacity, dimensions, addresses).
    InvalidConfig,

    // Runtime
    /// An encoder accumulated too many illegal transitions.
    EncoderMalfunction,

    /// A port expander could not be initialised.
    ExpanderFault,

    /// The I2C transport reported a non-zero status.
    BusError,

    /// Bus data did not arrive within the bounded wait.
    TimeoutError,
}

/// A fault record: what went wrong and a short static description.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControllerError {
    pub kind: ErrorKind,
    pub message: &'static str,
}

impl ControllerError {
    /// The empty slot value.
    pub const NONE: Self = Self {
        kind: ErrorKind::None,
        message: "",
    };

    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    pub const fn invalid_pin(message: &'static str) -> Self {
        Self::new(ErrorKind::InvalidPin, message)
    }

    pub const fn pin_conflict(message: &'static str) -> Self {
        Self::new(ErrorKind::PinConflict, message)
    }

    pub const fn invalid_config(message: &'static str) -> Self {
        Self::new(ErrorKind::InvalidConfig, message)
    }

    /// True unless this is the empty slot value.
    pub fn is_error(&self) -> bool {
        self.kind != ErrorKind::None
    }
}

impl Default for ControllerError {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorKind::None => "no error",
            ErrorKind::InvalidPin => "invalid pin",
            ErrorKind::PinConflict => "pin conflict",
            ErrorKind::InvalidConfig => "invalid configuration",
            ErrorKind::EncoderMalfunction => "encoder malfunction",
            ErrorKind::ExpanderFault => "expander fault",
            ErrorKind::BusError => "bus error",
            ErrorKind::TimeoutError => "bus timeout",
        };
        f.write_str(name)
    }
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

/// Why an update attempt did not run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateError {
    /// Another update cycle is already in flight.
    Busy,

    /// `begin()` has not succeeded since the last configuration change.
    NotInitialized,
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UpdateError::Busy => f.write_str("update already in progress"),
            UpdateError::NotInitialized => f.write_str("controller not initialised"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_slot_is_empty() {
        let err = ControllerError::default();
        assert_eq!(err, ControllerError::NONE);
        assert!(!err.is_error());
    }

    #[test]
    fn constructors_set_kind() {
        assert_eq!(ControllerError::invalid_pin("x").kind, ErrorKind::InvalidPin);
        assert_eq!(ControllerError::pin_conflict("x").kind, ErrorKind::PinConflict);
        assert_eq!(ControllerError::invalid_config("x").kind, ErrorKind::InvalidConfig);
        assert!(ControllerError::invalid_config("x").is_error());
    }

    #[test]
    fn display_includes_message() {
        let err = ControllerError::new(ErrorKind::BusError, "address NACK");
        assert_eq!(format!("{}", err), "bus error: address NACK");
        assert_eq!(format!("{}", ControllerError::NONE), "no error");
        assert_eq!(format!("{}", UpdateError::Busy), "update already in progress");
    }
}
