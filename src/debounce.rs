//! Time-based debounce primitive.
//!
//! Every input source (matrix cell, GPIO line, encoder button, expander
//! bit) runs its readings through one [`DebouncedLine`]. A new level is
//! accepted only after it has been read continuously for longer than the
//! debounce interval; any flip inside the window re-arms the timer.

/// Debounce state of one logical input line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DebouncedLine {
    /// Reading from the previous poll.
    last_raw: bool,
    /// Accepted (debounced) state.
    confirmed: bool,
    /// When `last_raw` last changed (ms).
    last_change: u32,
}

impl DebouncedLine {
    pub const fn new() -> Self {
        Self {
            last_raw: false,
            confirmed: false,
            last_change: 0,
        }
    }

    /// Feed one raw reading taken at `now` (ms).
    ///
    /// Returns `true` when the confirmed state toggled on this poll.
    /// Timestamps use wrapping arithmetic, so the millisecond counter may
    /// roll over.
    pub fn update(&mut self, raw: bool, now: u32, interval_ms: u32) -> bool {
        if raw != self.last_raw {
            self.last_change = now;
        }
        self.last_raw = raw;

        if now.wrapping_sub(self.last_change) > interval_ms && raw != self.confirmed {
            self.confirmed = raw;
            return true;
        }

        false
    }

    /// The accepted state.
    pub fn state(&self) -> bool {
        self.confirmed
    }

    /// The most recent raw reading.
    pub fn raw(&self) -> bool {
        self.last_raw
    }
}
