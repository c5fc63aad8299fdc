//! Change notifications.
//!
//! The controller reports debounced edges through an [`EventHandler`]
//! passed to each update call. Every method has a no-op default, so a
//! handler only implements the channels it cares about. All events carry
//! the profile that was active when the cycle started.

use heapless::Vec;

use crate::error::ControllerError;

/// Rotation direction of an encoder detent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Clockwise,
    CounterClockwise,
}

impl Direction {
    /// `+1` for clockwise, `-1` for counter-clockwise.
    pub fn sign(self) -> i32 {
        match self {
            Direction::Clockwise => 1,
            Direction::CounterClockwise => -1,
        }
    }
}

/// Receives events fired synchronously inside an update cycle.
///
/// The controller's state is not borrowed while a handler method runs,
/// so handlers may call the controller's getters. Calling `try_update`
/// from a handler returns `UpdateError::Busy`.
pub trait EventHandler {
    fn on_matrix_change(&mut self, _profile: u8, _row: u8, _col: u8, _pressed: bool) {}

    fn on_gpio_change(&mut self, _profile: u8, _index: u8, _pressed: bool) {}

    fn on_encoder_rotate(&mut self, _profile: u8, _encoder: u8, _direction: Direction) {}

    fn on_encoder_button(&mut self, _profile: u8, _encoder: u8, _pressed: bool) {}

    fn on_expander_change(&mut self, _profile: u8, _device: u8, _bit: u8, _active: bool) {}

    /// A fault was raised. Return `true` to acknowledge it; the fault then
    /// stays latched (not reported again) until `clear_error()` or
    /// `begin()`. Returning `false` releases the latch so the next
    /// occurrence is reported again.
    fn on_error(&mut self, _error: &ControllerError) -> bool {
        true
    }
}

/// Handler that ignores every event.
impl EventHandler for () {}

impl<H: EventHandler + ?Sized> EventHandler for &mut H {
    fn on_matrix_change(&mut self, profile: u8, row: u8, col: u8, pressed: bool) {
        (**self).on_matrix_change(profile, row, col, pressed)
    }

    fn on_gpio_change(&mut self, profile: u8, index: u8, pressed: bool) {
        (**self).on_gpio_change(profile, index, pressed)
    }

    fn on_encoder_rotate(&mut self, profile: u8, encoder: u8, direction: Direction) {
        (**self).on_encoder_rotate(profile, encoder, direction)
    }

    fn on_encoder_button(&mut self, profile: u8, encoder: u8, pressed: bool) {
        (**self).on_encoder_button(profile, encoder, pressed)
    }

    fn on_expander_change(&mut self, profile: u8, device: u8, bit: u8, active: bool) {
        (**self).on_expander_change(profile, device, bit, active)
    }

    fn on_error(&mut self, error: &ControllerError) -> bool {
        (**self).on_error(error)
    }
}

/// Which latch a fault belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FaultSource {
    Expander(u8),
    Encoder(u8),
}

/// One queued notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum InputEvent {
    Matrix { row: u8, col: u8, pressed: bool },
    Gpio { index: u8, pressed: bool },
    EncoderRotate { encoder: u8, direction: Direction },
    EncoderButton { encoder: u8, pressed: bool },
    Expander { device: u8, bit: u8, active: bool },
    Fault { error: ControllerError, source: FaultSource },
}

/// Events collected from one polling step (a matrix row, the GPIO bank,
/// one encoder or one expander) before they are dispatched.
pub(crate) const EVENT_BATCH: usize = 33;

pub(crate) type EventBatch = Vec<InputEvent, EVENT_BATCH>;

const _: () = {
    assert!(EVENT_BATCH >= crate::config::MAX_GPIO_LINES);
    assert!(EVENT_BATCH >= crate::config::MAX_MATRIX_COLS);
    assert!(EVENT_BATCH >= crate::config::EXPANDER_LINES + 1);
};

/// Deliver one event. Returns the fault source whose latch should be
/// released when the handler declined a fault.
pub(crate) fn deliver<H: EventHandler>(
    handler: &mut H,
    profile: u8,
    event: &InputEvent,
) -> Option<FaultSource> {
    match *event {
        InputEvent::Matrix { row, col, pressed } => handler.on_matrix_change(profile, row, col, pressed),
        InputEvent::Gpio { index, pressed } => handler.on_gpio_change(profile, index, pressed),
        InputEvent::EncoderRotate { encoder, direction } => {
            handler.on_encoder_rotate(profile, encoder, direction)
        }
        InputEvent::EncoderButton { encoder, pressed } => {
            handler.on_encoder_button(profile, encoder, pressed)
        }
        InputEvent::Expander { device, bit, active } => {
            handler.on_expander_change(profile, device, bit, active)
        }
        InputEvent::Fault { error, source } => {
            if !handler.on_error(&error) {
                return Some(source);
            }
        }
    }
    None
}
