//! Board interface: pin I/O, monotonic clocks and busy-waiting.
//!
//! Pins are addressed by number so one board object can serve the matrix,
//! the GPIO buttons and the encoders, and so lines can be reconfigured
//! (e.g. matrix rows released during power save). Busy-waiting comes from
//! the `embedded-hal` [`DelayNs`] supertrait.

use embedded_hal::delay::DelayNs;
pub use embedded_hal::digital::PinState;

/// Electrical configuration of a pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinMode {
    /// Floating input. Used as the low-power state for released rows.
    Input,
    /// Input with the internal pull-up enabled.
    InputPullup,
    /// Push-pull output.
    Output,
}

/// Pin and clock primitives consumed by the controller.
pub trait Board: DelayNs {
    /// Set a pin's mode.
    fn configure_pin(&mut self, pin: u8, mode: PinMode);

    /// Drive an output pin.
    fn write_pin(&mut self, pin: u8, level: PinState);

    /// Sample a pin.
    fn read_pin(&mut self, pin: u8) -> PinState;

    /// Monotonic milliseconds; may wrap.
    fn millis(&self) -> u32;

    /// Monotonic microseconds; may wrap.
    fn micros(&self) -> u32;

    /// Whether `pin` exists on this board. Checked by `begin()`.
    fn is_valid_pin(&self, _pin: u8) -> bool {
        true
    }
}

/// Read a pin and report whether it is pulled low (active-low input).
pub(crate) fn is_low<P: Board>(board: &mut P, pin: u8) -> bool {
    board.read_pin(pin) == PinState::Low
}
