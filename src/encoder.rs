//! Quadrature decoder for rotary encoders.
//!
//! The two phases form a 2-bit Gray code `(A << 1) | B`. Valid single-bit
//! steps are classified as clockwise or counter-clockwise; any other change
//! is counted as an error. Position only moves once per detent, on the
//! step out of state 3 (3→2 clockwise, 3→1 counter-clockwise), scaled by
//! `4 / divisor`.

use crate::config::{EncoderPins, ENCODER_SPEED_IDLE_MS, STEPS_PER_DETENT};
use crate::debounce::DebouncedLine;
use crate::event::Direction;
use crate::hal::{is_low, Board, PinState};

/// Classify a change of the 2-bit state.
pub fn classify(from: u8, to: u8) -> Option<Direction> {
    match (from, to) {
        (0, 1) | (1, 3) | (3, 2) | (2, 0) => Some(Direction::Clockwise),
        (0, 2) | (2, 3) | (3, 1) | (1, 0) => Some(Direction::CounterClockwise),
        _ => None,
    }
}

/// Whether `from → to` closes a detent in direction `dir`.
fn is_commit(from: u8, to: u8, dir: Direction) -> bool {
    matches!(
        (from, to, dir),
        (3, 2, Direction::Clockwise) | (3, 1, Direction::CounterClockwise)
    )
}

/// Result of feeding one 2-bit state to the decoder.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    /// A detent was committed in this direction.
    pub rotated: Option<Direction>,
    /// The error counter just reached the malfunction threshold.
    pub malfunction: bool,
}

/// Result of one encoder poll.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct EncoderPoll {
    pub decoded: Decoded,
    /// The push-button's confirmed state toggled to this value.
    pub button: Option<bool>,
}

/// Decoder state of one encoder.
#[derive(Clone, Debug)]
pub struct EncoderState {
    pub pins: EncoderPins,
    last_state: u8,
    pending: Option<Direction>,
    position: i32,
    divisor: i32,
    last_direction: Option<Direction>,
    error_count: u32,
    valid: bool,
    malfunction_reported: bool,
    /// Half-steps per second.
    speed: u16,
    /// Last accepted transition (debounce gate).
    last_step: u32,
    /// Last state change (speed estimate).
    last_change: Option<u32>,
    button: Option<DebouncedLine>,
}

impl EncoderState {
    pub fn new(pins: EncoderPins) -> Self {
        Self {
            pins,
            last_state: 0,
            pending: None,
            position: 0,
            divisor: 4,
            last_direction: None,
            error_count: 0,
            valid: true,
            malfunction_reported: false,
            speed: 0,
            last_step: 0,
            last_change: None,
            button: pins.button.map(|_| DebouncedLine::new()),
        }
    }

    /// Sample the two phases as a 2-bit state.
    pub(crate) fn read_state<P: Board>(&self, board: &mut P) -> u8 {
        let a = (board.read_pin(self.pins.a) == PinState::High) as u8;
        let b = (board.read_pin(self.pins.b) == PinState::High) as u8;
        (a << 1) | b
    }

    /// Reset to the power-on state, seeded with the current phase levels.
    pub(crate) fn start(&mut self, state: u8, now: u32, debounce_ms: u32) {
        *self = Self::new(self.pins);
        self.last_state = state & 0b11;
        self.last_step = now.wrapping_sub(debounce_ms);
    }

    /// One poll: button first, then rotation if the debounce gate is open.
    pub(crate) fn poll<P: Board>(
        &mut self,
        board: &mut P,
        now: u32,
        button_debounce_ms: u32,
        debounce_ms: u32,
        error_threshold: u32,
    ) -> EncoderPoll {
        let mut result = EncoderPoll::default();

        if let (Some(pin), Some(line)) = (self.pins.button, self.button.as_mut()) {
            let pressed = is_low(board, pin);
            if line.update(pressed, now, button_debounce_ms) {
                result.button = Some(pressed);
            }
        }

        if now.wrapping_sub(self.last_step) >= debounce_ms {
            let state = self.read_state(board);
            result.decoded = self.decode(state, now, error_threshold);
        }

        result
    }

    /// Feed one 2-bit state sampled at `now`.
    pub fn decode(&mut self, state: u8, now: u32, error_threshold: u32) -> Decoded {
        let state = state & 0b11;
        let mut out = Decoded::default();

        if state != self.last_state {
            self.last_step = now;

            if let Some(prev) = self.last_change {
                let dt = now.wrapping_sub(prev);
                if dt > 0 {
                    self.speed = (1000 / dt).min(u16::MAX as u32) as u16;
                }
            }
            self.last_change = Some(now);

            match classify(self.last_state, state) {
                Some(dir) => self.pending = Some(dir),
                None => {
                    self.error_count = self.error_count.saturating_add(1);
                    if self.error_count >= error_threshold {
                        self.valid = false;
                        if !self.malfunction_reported {
                            self.malfunction_reported = true;
                            out.malfunction = true;
                        }
                    }
                }
            }

            if let Some(dir) = self.pending {
                if is_commit(self.last_state, state, dir) {
                    self.position = self.position.wrapping_add(dir.sign() * 4 / self.divisor);
                    self.last_direction = Some(dir);
                    self.valid = self.error_count < error_threshold;
                    self.pending = None;
                    out.rotated = Some(dir);
                }
            }

            self.last_state = state;
        }

        if let Some(prev) = self.last_change {
            if now.wrapping_sub(prev) > ENCODER_SPEED_IDLE_MS {
                self.speed = 0;
            }
        }

        out
    }

    pub fn position(&self) -> i32 {
        self.position
    }

    pub fn set_position(&mut self, position: i32) {
        self.position = position;
    }

    pub fn divisor(&self) -> i32 {
        self.divisor
    }

    /// Caller validates the 1..=4 range.
    pub(crate) fn set_divisor(&mut self, divisor: i32) {
        self.divisor = divisor;
    }

    pub fn last_direction(&self) -> Option<Direction> {
        self.last_direction
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Clear the error counter and mark the encoder valid again. The
    /// malfunction report latch is left alone until the next `begin()`.
    pub fn reset_errors(&mut self) {
        self.error_count = 0;
        self.valid = true;
    }

    /// Allow the next threshold crossing to be reported again.
    pub(crate) fn rearm_malfunction(&mut self) {
        self.malfunction_reported = false;
    }

    /// Half-steps per second.
    pub fn speed(&self) -> u16 {
        self.speed
    }

    /// Detents per second.
    pub fn detent_rate(&self) -> u16 {
        self.speed / STEPS_PER_DETENT
    }

    pub fn button_state(&self) -> bool {
        self.button.map(|l| l.state()).unwrap_or(false)
    }

    pub fn has_button(&self) -> bool {
        self.button.is_some()
    }
}
