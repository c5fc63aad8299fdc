//! Power-save tracking.
//!
//! The controller records the time of the last confirmed input change.
//! With power save enabled, an update that finds the inputs idle for
//! longer than the timeout moves to [`PowerState::PowerSaving`]: the
//! matrix row drivers are released and the matrix is no longer scanned.
//! The remaining sources keep being polled, and any confirmed change
//! wakes the controller again.

/// Power mode of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    /// Normal operation - every source is polled.
    Awake,
    /// Matrix rows released, matrix scan skipped.
    PowerSaving,
}

/// What the caller should do after consulting the power manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Transition {
    None,
    /// Release the row drivers.
    Sleep,
    /// Restore the row drivers.
    Wake,
}

/// Tracks activity and decides sleep/wake transitions.
#[derive(Clone, Debug)]
pub struct PowerManager {
    state: PowerState,
    last_activity: u32,
    /// `None` disables power save.
    timeout_ms: Option<u32>,
}

impl PowerManager {
    pub const fn new(timeout_ms: Option<u32>) -> Self {
        Self {
            state: PowerState::Awake,
            last_activity: 0,
            timeout_ms,
        }
    }

    /// Reset to awake with the idle timer starting at `now`.
    pub fn start(&mut self, now: u32) {
        self.state = PowerState::Awake;
        self.last_activity = now;
    }

    pub fn set_timeout(&mut self, timeout_ms: Option<u32>) {
        self.timeout_ms = timeout_ms;
    }

    pub fn state(&self) -> PowerState {
        self.state
    }

    /// Milliseconds since the last recorded activity.
    pub fn idle_for(&self, now: u32) -> u32 {
        now.wrapping_sub(self.last_activity)
    }

    /// Check the idle timer at the start of a cycle.
    pub(crate) fn tick(&mut self, now: u32) -> Transition {
        let Some(timeout) = self.timeout_ms else {
            return Transition::None;
        };

        if self.state == PowerState::Awake && self.idle_for(now) > timeout {
            info!("Power: idle {=u32} ms, entering power save", self.idle_for(now));
            self.state = PowerState::PowerSaving;
            return Transition::Sleep;
        }

        Transition::None
    }

    /// Record a confirmed change (or external wake request).
    pub(crate) fn activity(&mut self, now: u32) -> Transition {
        self.last_activity = now;
        if self.state != PowerState::Awake {
            info!("Power: waking from power save");
            self.state = PowerState::Awake;
            return Transition::Wake;
        }
        Transition::None
    }
}
