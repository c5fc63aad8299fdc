//! Update cycle controller.
//!
//! [`Controller`] owns the board and bus handles plus the state of every
//! input source, and runs one polling pass per [`Controller::try_update`]:
//!
//! 1. power-save check (may release the matrix and end the cycle),
//! 2. expanders, 3. matrix (skipped while power saving), 4. GPIO,
//! 5. encoders.
//!
//! Events from each step are dispatched to the caller's
//! [`EventHandler`] before the next step runs. The controller's state is
//! held in a `RefCell` that is never borrowed while a handler runs, so
//! handlers can read state, switch profiles or clear errors. A nested
//! `try_update` from inside a handler returns [`UpdateError::Busy`].
//!
//! Lifecycle: configure with the `set_*` methods, then call
//! [`Controller::begin`]. Any reconfiguration requires another `begin()`
//! before polling resumes.

use core::cell::{Cell, RefCell};

use heapless::Vec;

use crate::bus::{Bus, NoBus};
use crate::config::{
    EncoderPins, ExpanderConfig, DEFAULT_BUS_TIMEOUT_US, DEFAULT_DEBOUNCE_MS,
    DEFAULT_ENCODER_DEBOUNCE_MS, DEFAULT_ENCODER_ERROR_THRESHOLD, DEFAULT_PROFILE_COUNT,
    EXPANDER_LINES, I2C_ADDRESS_MAX, I2C_ADDRESS_MIN, MAX_ENCODERS, MAX_EXPANDERS,
    MAX_GPIO_LINES, MAX_MATRIX_COLS, MAX_MATRIX_ROWS, MAX_TRACKED_PINS,
};
use crate::encoder::EncoderState;
use crate::error::{ControllerError, ErrorKind, UpdateError};
use crate::event::{deliver, Direction, EventBatch, EventHandler, FaultSource, InputEvent};
use crate::expander::{DevicePoll, ExpanderDevice};
use crate::gpio::GpioBank;
use crate::hal::{Board, PinMode};
use crate::matrix::Matrix;
use crate::power::{PowerManager, PowerState, Transition};

/// Outcome of a completed update cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UpdateStatus {
    /// Every source was polled; nothing changed.
    Idle,
    /// At least one confirmed change was reported.
    Changed,
    /// The idle timeout elapsed: the matrix was released and nothing was
    /// polled this cycle.
    EnteredPowerSave,
    /// Still power saving; the non-matrix sources saw no change.
    PowerSaving,
}

/// Clears the in-flight flag when the cycle ends, even by unwinding.
struct CycleGuard<'c>(&'c Cell<bool>);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

struct Inner<'a, P, B> {
    board: P,
    bus: B,

    matrix: Matrix<'a>,
    gpio: GpioBank<'a>,
    encoder_pins: &'a [EncoderPins],
    encoders: Vec<EncoderState, MAX_ENCODERS>,
    expander_configs: &'a [ExpanderConfig],
    expanders: Vec<ExpanderDevice, MAX_EXPANDERS>,

    debounce_ms: u32,
    encoder_debounce_ms: u32,
    bus_timeout_us: u32,
    error_threshold: u32,

    profile: u8,
    profile_count: u8,

    power: PowerManager,
    last_error: ControllerError,
    initialized: bool,
}

/// Input engine for a button box: matrix, GPIO buttons, encoders and
/// I2C port expanders.
pub struct Controller<'a, P, B = NoBus> {
    inner: RefCell<Inner<'a, P, B>>,
    updating: Cell<bool>,
}

impl<'a, P: Board> Controller<'a, P, NoBus> {
    /// Controller without an I2C bus (no expanders).
    pub fn new(board: P) -> Self {
        Self::with_bus(board, NoBus)
    }
}

impl<'a, P: Board, B: Bus> Controller<'a, P, B> {
    pub fn with_bus(board: P, bus: B) -> Self {
        Self {
            inner: RefCell::new(Inner {
                board,
                bus,
                matrix: Matrix::default(),
                gpio: GpioBank::default(),
                encoder_pins: &[],
                encoders: Vec::new(),
                expander_configs: &[],
                expanders: Vec::new(),
                debounce_ms: DEFAULT_DEBOUNCE_MS,
                encoder_debounce_ms: DEFAULT_ENCODER_DEBOUNCE_MS,
                bus_timeout_us: DEFAULT_BUS_TIMEOUT_US,
                error_threshold: DEFAULT_ENCODER_ERROR_THRESHOLD,
                profile: 0,
                profile_count: DEFAULT_PROFILE_COUNT,
                power: PowerManager::new(None),
                last_error: ControllerError::NONE,
                initialized: false,
            }),
            updating: Cell::new(false),
        }
    }

    // -----------------------------------------------------------------------
    // Configuration (call `begin` afterwards)
    // -----------------------------------------------------------------------

    /// Button matrix: row (drive) pins and column (sense) pins.
    pub fn set_matrix(&mut self, rows: &'a [u8], cols: &'a [u8]) {
        let inner = self.inner.get_mut();
        inner.matrix = Matrix::new(rows, cols);
        inner.initialized = false;
    }

    /// Direct buttons, one pin each.
    pub fn set_gpio(&mut self, pins: &'a [u8]) {
        let inner = self.inner.get_mut();
        inner.gpio = GpioBank::new(pins);
        inner.initialized = false;
    }

    pub fn set_encoders(&mut self, encoders: &'a [EncoderPins]) {
        let inner = self.inner.get_mut();
        inner.encoder_pins = encoders;
        inner.encoders.clear();
        inner.initialized = false;
    }

    pub fn set_expanders(&mut self, expanders: &'a [ExpanderConfig]) {
        let inner = self.inner.get_mut();
        inner.expander_configs = expanders;
        inner.expanders.clear();
        inner.initialized = false;
    }

    /// Number of profiles. The active profile falls back to 0 if it is
    /// no longer in range.
    pub fn set_profiles(&mut self, count: u8) {
        let inner = self.inner.get_mut();
        inner.profile_count = count;
        if inner.profile >= count {
            inner.profile = 0;
        }
        inner.initialized = false;
    }

    /// Debounce intervals: matrix/GPIO/buttons/expander lines, and the
    /// minimum spacing of accepted encoder transitions.
    pub fn set_debounce_time(&mut self, debounce_ms: u32, encoder_debounce_ms: u32) {
        let inner = self.inner.get_mut();
        inner.debounce_ms = debounce_ms;
        inner.encoder_debounce_ms = encoder_debounce_ms;
        inner.initialized = false;
    }

    /// Enable power save after `timeout_ms` without input, or disable it.
    pub fn set_power_save(&mut self, timeout_ms: Option<u32>) {
        let inner = self.inner.get_mut();
        inner.power.set_timeout(timeout_ms);
        inner.initialized = false;
    }

    /// Bounded wait for expander read data.
    pub fn set_bus_timeout(&mut self, timeout_us: u32) {
        let inner = self.inner.get_mut();
        inner.bus_timeout_us = timeout_us;
        inner.initialized = false;
    }

    /// Illegal transitions after which an encoder is reported faulty.
    pub fn set_encoder_error_threshold(&mut self, threshold: u32) {
        let inner = self.inner.get_mut();
        inner.error_threshold = threshold;
        inner.initialized = false;
    }

    /// Validate the configuration, set up pins and devices, and reset all
    /// input state. Clears the last error.
    ///
    /// Configuration errors abort initialisation and are also stored as
    /// the last error. An expander that does not respond is not fatal: it
    /// stays offline, is retried every cycle, and its fault is stored as
    /// the last error.
    pub fn begin(&mut self) -> Result<(), ControllerError> {
        let inner = self.inner.get_mut();
        inner.initialized = false;

        if let Err(e) = inner.validate() {
            error!("begin: {}", e);
            inner.last_error = e;
            return Err(e);
        }
        inner.last_error = ControllerError::NONE;

        let Inner {
            board,
            bus,
            matrix,
            gpio,
            encoder_pins,
            encoders,
            expander_configs,
            expanders,
            encoder_debounce_ms,
            power,
            last_error,
            ..
        } = &mut *inner;

        matrix.reset();
        matrix.configure_pins(board);
        gpio.reset();
        gpio.configure_pins(board);

        encoders.clear();
        for pins in encoder_pins.iter() {
            board.configure_pin(pins.a, PinMode::InputPullup);
            board.configure_pin(pins.b, PinMode::InputPullup);
            if let Some(button) = pins.button {
                board.configure_pin(button, PinMode::InputPullup);
            }
        }
        let now = board.millis();
        for pins in encoder_pins.iter() {
            let mut encoder = EncoderState::new(*pins);
            let state = encoder.read_state(board);
            encoder.start(state, now, *encoder_debounce_ms);
            // Capacity checked by `validate`.
            let _ = encoders.push(encoder);
        }

        expanders.clear();
        for (index, config) in expander_configs.iter().enumerate() {
            let mut device = ExpanderDevice::new(*config);
            if let Err(e) = device.initialize(bus) {
                warn!("Expander {=usize} @ {=u8:#x}: {}", index, config.address, e);
                *last_error = e;
            }
            let _ = expanders.push(device);
        }

        power.start(board.millis());
        inner.initialized = true;

        info!(
            "begin: {=usize}x{=usize} matrix, {=usize} gpio, {=usize} encoders, {=usize} expanders",
            inner.matrix.num_rows(),
            inner.matrix.num_cols(),
            inner.gpio.len(),
            inner.encoders.len(),
            inner.expanders.len()
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Update cycle
    // -----------------------------------------------------------------------

    /// Run one polling pass unless one is already in flight.
    ///
    /// Returns [`UpdateError::Busy`] without touching any state when
    /// called from inside an event handler, and
    /// [`UpdateError::NotInitialized`] before a successful `begin()`.
    pub fn try_update<H: EventHandler>(&self, handler: &mut H) -> Result<UpdateStatus, UpdateError> {
        if self.updating.get() {
            return Err(UpdateError::Busy);
        }
        if !self.inner.borrow().initialized {
            return Err(UpdateError::NotInitialized);
        }

        self.updating.set(true);
        let _guard = CycleGuard(&self.updating);
        Ok(self.run_cycle(handler))
    }

    /// Run one polling pass, retrying while another pass is in flight.
    ///
    /// Must not be called from an event handler: the pass it would wait
    /// for is the one running the handler.
    pub fn update<H: EventHandler>(&self, handler: &mut H) -> Result<UpdateStatus, UpdateError> {
        loop {
            match self.try_update(handler) {
                Err(UpdateError::Busy) => core::hint::spin_loop(),
                other => return other,
            }
        }
    }

    fn run_cycle<H: EventHandler>(&self, handler: &mut H) -> UpdateStatus {
        let (profile, asleep, rows, devices, encoders) = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            let now = inner.board.millis();
            if inner.power.tick(now) == Transition::Sleep {
                inner.matrix.release_rows(&mut inner.board);
                return UpdateStatus::EnteredPowerSave;
            }
            (
                inner.profile,
                inner.power.state() == PowerState::PowerSaving,
                inner.matrix.num_rows(),
                inner.expanders.len(),
                inner.encoders.len(),
            )
        };

        let mut events = EventBatch::new();
        let mut changed = false;

        for device in 0..devices {
            changed |= self.inner.borrow_mut().poll_expander(device, &mut events);
            self.dispatch(handler, profile, &mut events);
        }

        if !asleep {
            for row in 0..rows {
                changed |= self.inner.borrow_mut().scan_matrix_row(row, &mut events);
                self.dispatch(handler, profile, &mut events);
            }
        }

        changed |= self.inner.borrow_mut().poll_gpio(&mut events);
        self.dispatch(handler, profile, &mut events);

        for encoder in 0..encoders {
            changed |= self.inner.borrow_mut().poll_encoder(encoder, &mut events);
            self.dispatch(handler, profile, &mut events);
        }

        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        if changed {
            let now = inner.board.millis();
            if inner.power.activity(now) == Transition::Wake {
                inner.matrix.restore_rows(&mut inner.board);
            }
            return UpdateStatus::Changed;
        }

        match inner.power.state() {
            PowerState::Awake => UpdateStatus::Idle,
            PowerState::PowerSaving => UpdateStatus::PowerSaving,
        }
    }

    fn dispatch<H: EventHandler>(&self, handler: &mut H, profile: u8, events: &mut EventBatch) {
        for event in events.iter() {
            if let Some(source) = deliver(handler, profile, event) {
                self.inner.borrow_mut().release_latch(source);
            }
        }
        events.clear();
    }

    /// Leave power save now (e.g. on host activity) and restart the idle
    /// timer.
    pub fn wake(&self) {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let now = inner.board.millis();
        if inner.power.activity(now) == Transition::Wake && inner.initialized {
            inner.matrix.restore_rows(&mut inner.board);
        }
    }

    // -----------------------------------------------------------------------
    // Runtime settings
    // -----------------------------------------------------------------------

    /// Select the active profile (`0..profile_count`).
    pub fn set_profile(&self, profile: u8) -> Result<(), ControllerError> {
        let mut inner = self.inner.borrow_mut();
        if profile >= inner.profile_count {
            return Err(ControllerError::invalid_config("profile out of range"));
        }
        inner.profile = profile;
        Ok(())
    }

    pub fn profile(&self) -> u8 {
        self.inner.borrow().profile
    }

    pub fn profile_count(&self) -> u8 {
        self.inner.borrow().profile_count
    }

    /// Position step per detent becomes `4 / divisor` (divisor 1..=4).
    pub fn set_encoder_divisor(&self, index: usize, divisor: i32) -> Result<(), ControllerError> {
        if !(1..=4).contains(&divisor) {
            return Err(ControllerError::invalid_config("encoder divisor must be 1..=4"));
        }
        self.with_encoder_mut(index, |enc| enc.set_divisor(divisor))
    }

    pub fn set_encoder_position(&self, index: usize, position: i32) -> Result<(), ControllerError> {
        self.with_encoder_mut(index, |enc| enc.set_position(position))
    }

    /// Zero an encoder's error counter and mark it valid. A new
    /// malfunction report needs a fresh `begin()`.
    pub fn reset_encoder_errors(&self, index: usize) -> Result<(), ControllerError> {
        self.with_encoder_mut(index, |enc| enc.reset_errors())
    }

    fn with_encoder_mut(
        &self,
        index: usize,
        f: impl FnOnce(&mut EncoderState),
    ) -> Result<(), ControllerError> {
        let mut inner = self.inner.borrow_mut();
        let encoder = inner
            .encoders
            .get_mut(index)
            .ok_or(ControllerError::invalid_config("encoder index out of range"))?;
        f(encoder);
        Ok(())
    }

    fn with_encoder<T>(&self, index: usize, default: T, f: impl FnOnce(&EncoderState) -> T) -> T {
        self.inner.borrow().encoders.get(index).map(f).unwrap_or(default)
    }

    // -----------------------------------------------------------------------
    // State getters
    // -----------------------------------------------------------------------

    pub fn is_initialized(&self) -> bool {
        self.inner.borrow().initialized
    }

    pub fn power_state(&self) -> PowerState {
        self.inner.borrow().power.state()
    }

    /// Debounced matrix cell; `false` out of range.
    pub fn matrix_state(&self, row: usize, col: usize) -> bool {
        self.inner.borrow().matrix.state(row, col)
    }

    pub fn gpio_state(&self, index: usize) -> bool {
        self.inner.borrow().gpio.state(index)
    }

    pub fn num_encoders(&self) -> usize {
        self.inner.borrow().encoders.len()
    }

    pub fn encoder_position(&self, index: usize) -> i32 {
        self.with_encoder(index, 0, |e| e.position())
    }

    /// Direction of the last committed detent.
    pub fn encoder_direction(&self, index: usize) -> Option<Direction> {
        self.with_encoder(index, None, |e| e.last_direction())
    }

    /// Half-steps per second.
    pub fn encoder_speed(&self, index: usize) -> u16 {
        self.with_encoder(index, 0, |e| e.speed())
    }

    /// Detents per second.
    pub fn encoder_detent_rate(&self, index: usize) -> u16 {
        self.with_encoder(index, 0, |e| e.detent_rate())
    }

    pub fn encoder_error_count(&self, index: usize) -> u32 {
        self.with_encoder(index, 0, |e| e.error_count())
    }

    pub fn is_encoder_valid(&self, index: usize) -> bool {
        self.with_encoder(index, false, |e| e.is_valid())
    }

    /// Debounced push-button state; `false` if the encoder has none.
    pub fn encoder_button_state(&self, index: usize) -> bool {
        self.with_encoder(index, false, |e| e.button_state())
    }

    /// Debounced lines of one expander (bit set = active).
    pub fn expander_state(&self, device: usize) -> u16 {
        self.inner
            .borrow()
            .expanders
            .get(device)
            .map(|d| d.confirmed())
            .unwrap_or(0)
    }

    pub fn expander_pin(&self, device: usize, bit: usize) -> bool {
        self.inner
            .borrow()
            .expanders
            .get(device)
            .map(|d| d.line(bit))
            .unwrap_or(false)
    }

    pub fn is_expander_online(&self, device: usize) -> bool {
        self.inner
            .borrow()
            .expanders
            .get(device)
            .map(|d| d.is_online())
            .unwrap_or(false)
    }

    /// Most recent fault, or [`ControllerError::NONE`].
    pub fn last_error(&self) -> ControllerError {
        self.inner.borrow().last_error
    }

    /// Clear the last-error slot and re-arm expander fault reporting.
    pub fn clear_error(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.last_error = ControllerError::NONE;
        for device in inner.expanders.iter_mut() {
            device.clear_fault();
        }
    }

    // -----------------------------------------------------------------------
    // Hardware access
    // -----------------------------------------------------------------------

    pub fn board_mut(&mut self) -> &mut P {
        &mut self.inner.get_mut().board
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.inner.get_mut().bus
    }

    /// Give back the board and bus.
    pub fn release(self) -> (P, B) {
        let inner = self.inner.into_inner();
        (inner.board, inner.bus)
    }
}

impl<'a, P: Board, B: Bus> Inner<'a, P, B> {
    fn validate(&self) -> Result<(), ControllerError> {
        if self.profile_count == 0 {
            return Err(ControllerError::invalid_config("at least one profile is required"));
        }

        let rows = self.matrix.row_pins();
        let cols = self.matrix.col_pins();
        if rows.len() > MAX_MATRIX_ROWS {
            return Err(ControllerError::invalid_config("too many matrix rows"));
        }
        if cols.len() > MAX_MATRIX_COLS {
            return Err(ControllerError::invalid_config("too many matrix columns"));
        }
        if rows.is_empty() != cols.is_empty() {
            return Err(ControllerError::invalid_config("matrix needs both rows and columns"));
        }
        if self.gpio.len() > MAX_GPIO_LINES {
            return Err(ControllerError::invalid_config("too many GPIO lines"));
        }
        if self.encoder_pins.len() > MAX_ENCODERS {
            return Err(ControllerError::invalid_config("too many encoders"));
        }
        if self.expander_configs.len() > MAX_EXPANDERS {
            return Err(ControllerError::invalid_config("too many expanders"));
        }
        if self.error_threshold == 0 {
            return Err(ControllerError::invalid_config("encoder error threshold must be at least 1"));
        }

        for (i, config) in self.expander_configs.iter().enumerate() {
            if !(I2C_ADDRESS_MIN..=I2C_ADDRESS_MAX).contains(&config.address) {
                return Err(ControllerError::invalid_config("expander address out of range"));
            }
            if self.expander_configs[..i]
                .iter()
                .any(|other| other.address == config.address)
            {
                return Err(ControllerError::invalid_config("duplicate expander address"));
            }
        }

        let encoder_pins = self.encoder_pins.iter().flat_map(|e| {
            [Some(e.a), Some(e.b), e.button].into_iter().flatten()
        });
        let all_pins = rows
            .iter()
            .chain(cols)
            .chain(self.gpio.pins())
            .copied()
            .chain(encoder_pins);

        let mut seen: Vec<u8, MAX_TRACKED_PINS> = Vec::new();
        for pin in all_pins {
            if !self.board.is_valid_pin(pin) {
                return Err(ControllerError::invalid_pin("pin not available on this board"));
            }
            if seen.contains(&pin) {
                return Err(ControllerError::pin_conflict("pin assigned to more than one input"));
            }
            seen.push(pin)
                .map_err(|_| ControllerError::invalid_config("too many pins"))?;
        }

        Ok(())
    }

    fn raise(&mut self, error: ControllerError, source: FaultSource, events: &mut EventBatch) {
        self.last_error = error;
        let _ = events.push(InputEvent::Fault { error, source });
    }

    fn release_latch(&mut self, source: FaultSource) {
        match source {
            FaultSource::Expander(i) => {
                if let Some(device) = self.expanders.get_mut(i as usize) {
                    device.clear_fault();
                }
            }
            FaultSource::Encoder(i) => {
                if let Some(encoder) = self.encoders.get_mut(i as usize) {
                    encoder.rearm_malfunction();
                }
            }
        }
    }

    fn poll_expander(&mut self, index: usize, events: &mut EventBatch) -> bool {
        let debounce_ms = self.debounce_ms;
        let timeout_us = self.bus_timeout_us;
        let Some(device) = self.expanders.get_mut(index) else {
            return false;
        };

        let was_online = device.is_online();
        match device.poll(&mut self.bus, &mut self.board, debounce_ms, timeout_us) {
            DevicePoll::Changed(toggled) => {
                if !was_online {
                    info!("Expander {=usize} online", index);
                }
                for bit in 0..EXPANDER_LINES {
                    if toggled & (1 << bit) != 0 {
                        let _ = events.push(InputEvent::Expander {
                            device: index as u8,
                            bit: bit as u8,
                            active: device.line(bit),
                        });
                    }
                }
                toggled != 0
            }
            DevicePoll::Fault(e) => {
                warn!("Expander {=usize}: {}", index, e);
                self.raise(e, FaultSource::Expander(index as u8), events);
                false
            }
            DevicePoll::Suppressed => false,
        }
    }

    fn scan_matrix_row(&mut self, row: usize, events: &mut EventBatch) -> bool {
        let debounce_ms = self.debounce_ms;
        self.matrix.scan_row(&mut self.board, row, debounce_ms, events)
    }

    fn poll_gpio(&mut self, events: &mut EventBatch) -> bool {
        let debounce_ms = self.debounce_ms;
        self.gpio.poll(&mut self.board, debounce_ms, events)
    }

    fn poll_encoder(&mut self, index: usize, events: &mut EventBatch) -> bool {
        let now = self.board.millis();
        let (debounce_ms, encoder_debounce_ms, threshold) =
            (self.debounce_ms, self.encoder_debounce_ms, self.error_threshold);
        let Some(encoder) = self.encoders.get_mut(index) else {
            return false;
        };

        let poll = encoder.poll(&mut self.board, now, debounce_ms, encoder_debounce_ms, threshold);
        let mut changed = false;

        if let Some(pressed) = poll.button {
            changed = true;
            let _ = events.push(InputEvent::EncoderButton {
                encoder: index as u8,
                pressed,
            });
        }
        if let Some(direction) = poll.decoded.rotated {
            changed = true;
            debug!("Encoder {=usize}: position {=i32}", index, encoder.position());
            let _ = events.push(InputEvent::EncoderRotate {
                encoder: index as u8,
                direction,
            });
        }
        if poll.decoded.malfunction {
            warn!(
                "Encoder {=usize}: {=u32} illegal transitions, marking invalid",
                index,
                encoder.error_count()
            );
            let error = ControllerError::new(
                ErrorKind::EncoderMalfunction,
                "encoder error threshold reached",
            );
            self.raise(error, FaultSource::Encoder(index as u8), events);
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::PinState;
    use embedded_hal::delay::DelayNs;

    /// Pins 0..32; a pin listed in `low` reads low, everything else high.
    #[derive(Default)]
    struct Pins {
        us: u32,
        low: u32,
        modes: std::vec::Vec<(u8, PinMode)>,
    }

    impl Pins {
        fn set_low(&mut self, pin: u8, low: bool) {
            if low {
                self.low |= 1 << pin;
            } else {
                self.low &= !(1 << pin);
            }
        }

        fn advance_ms(&mut self, ms: u32) {
            self.us = self.us.wrapping_add(ms * 1000);
        }
    }

    impl DelayNs for Pins {
        fn delay_ns(&mut self, ns: u32) {
            self.us = self.us.wrapping_add(ns.div_ceil(1000));
        }
    }

    impl Board for Pins {
        fn configure_pin(&mut self, pin: u8, mode: PinMode) {
            self.modes.push((pin, mode));
        }
        fn write_pin(&mut self, _pin: u8, _level: PinState) {}
        fn read_pin(&mut self, pin: u8) -> PinState {
            if self.low & (1 << pin) != 0 {
                PinState::Low
            } else {
                PinState::High
            }
        }
        fn millis(&self) -> u32 {
            self.us / 1000
        }
        fn micros(&self) -> u32 {
            self.us
        }
        fn is_valid_pin(&self, pin: u8) -> bool {
            pin < 32
        }
    }

    const BUTTONS: [u8; 2] = [4, 5];

    fn started() -> Controller<'static, Pins> {
        let mut ctl = Controller::new(Pins::default());
        ctl.set_gpio(&BUTTONS);
        ctl.set_debounce_time(10, 1);
        ctl.begin().unwrap();
        ctl
    }

    fn press(ctl: &mut Controller<'static, Pins>, pin: u8) {
        ctl.board_mut().set_low(pin, true);
        ctl.try_update(&mut ()).unwrap();
        ctl.board_mut().advance_ms(20);
    }

    #[test]
    fn update_before_begin_fails() {
        let ctl = Controller::new(Pins::default());
        assert_eq!(ctl.try_update(&mut ()), Err(UpdateError::NotInitialized));
        assert!(!ctl.is_initialized());
    }

    #[test]
    fn reconfiguring_requires_begin() {
        let mut ctl = started();
        assert!(ctl.is_initialized());
        ctl.set_gpio(&BUTTONS[..1]);
        assert_eq!(ctl.try_update(&mut ()), Err(UpdateError::NotInitialized));
    }

    struct Nested<'c> {
        ctl: &'c Controller<'static, Pins>,
        inner: Option<Result<UpdateStatus, UpdateError>>,
        seen_state: bool,
    }

    impl EventHandler for Nested<'_> {
        fn on_gpio_change(&mut self, _profile: u8, index: u8, _pressed: bool) {
            self.inner = Some(self.ctl.try_update(&mut ()));
            self.seen_state = self.ctl.gpio_state(index as usize);
        }
    }

    #[test]
    fn nested_update_is_busy() {
        let mut ctl = started();
        press(&mut ctl, 4);

        let mut handler = Nested {
            ctl: &ctl,
            inner: None,
            seen_state: false,
        };
        assert_eq!(ctl.try_update(&mut handler), Ok(UpdateStatus::Changed));
        assert_eq!(handler.inner, Some(Err(UpdateError::Busy)));
        // State is already committed when the handler runs.
        assert!(handler.seen_state);

        // The in-flight flag is cleared afterwards.
        assert_eq!(ctl.try_update(&mut ()), Ok(UpdateStatus::Idle));
    }

    struct SwitchProfile<'c> {
        ctl: &'c Controller<'static, Pins>,
        profiles: std::vec::Vec<u8>,
    }

    impl EventHandler for SwitchProfile<'_> {
        fn on_gpio_change(&mut self, profile: u8, _index: u8, _pressed: bool) {
            self.profiles.push(profile);
            self.ctl.set_profile(1).unwrap();
        }
    }

    #[test]
    fn profile_change_applies_to_next_cycle() {
        let mut ctl = Controller::new(Pins::default());
        ctl.set_gpio(&BUTTONS);
        ctl.set_profiles(2);
        ctl.set_debounce_time(10, 1);
        ctl.begin().unwrap();

        ctl.board_mut().set_low(4, true);
        ctl.board_mut().set_low(5, true);
        ctl.try_update(&mut ()).unwrap();
        ctl.board_mut().advance_ms(20);

        let mut handler = SwitchProfile {
            ctl: &ctl,
            profiles: vec![],
        };
        ctl.try_update(&mut handler).unwrap();
        // Both events of the cycle carry the profile captured at its start.
        assert_eq!(handler.profiles, vec![0, 0]);
        assert_eq!(ctl.profile(), 1);
    }

    #[test]
    fn profile_out_of_range_rejected() {
        let ctl = started();
        let err = ctl.set_profile(1).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
        assert_eq!(ctl.profile(), 0);
    }

    #[test]
    fn zero_profiles_is_invalid() {
        let mut ctl = Controller::new(Pins::default());
        ctl.set_profiles(0);
        let err = ctl.begin().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidConfig);
        assert_eq!(ctl.last_error(), err);
    }

    #[test]
    fn pin_validation() {
        static ROWS: [u8; 2] = [0, 1];
        static COLS: [u8; 2] = [2, 3];
        static OVERLAP: [u8; 1] = [3];
        static FOREIGN: [u8; 1] = [40];

        let mut ctl = Controller::new(Pins::default());
        ctl.set_matrix(&ROWS, &COLS);
        ctl.set_gpio(&OVERLAP);
        assert_eq!(ctl.begin().unwrap_err().kind, ErrorKind::PinConflict);

        ctl.set_gpio(&FOREIGN);
        assert_eq!(ctl.begin().unwrap_err().kind, ErrorKind::InvalidPin);

        ctl.set_gpio(&[]);
        ctl.set_matrix(&ROWS, &[]);
        assert_eq!(ctl.begin().unwrap_err().kind, ErrorKind::InvalidConfig);

        ctl.set_matrix(&ROWS, &COLS);
        ctl.begin().unwrap();
        assert_eq!(ctl.last_error(), ControllerError::NONE);
    }

    #[test]
    fn encoder_pins_are_checked() {
        static ENCODERS: [EncoderPins; 2] = [
            EncoderPins::with_button(6, 7, 8),
            EncoderPins::new(9, 8),
        ];
        let mut ctl = Controller::new(Pins::default());
        ctl.set_encoders(&ENCODERS);
        assert_eq!(ctl.begin().unwrap_err().kind, ErrorKind::PinConflict);
    }

    #[test]
    fn expander_addresses_are_checked() {
        static BAD: [ExpanderConfig; 1] = [ExpanderConfig::pcf8574(0x78)];
        static DUP: [ExpanderConfig; 2] =
            [ExpanderConfig::mcp23017(0x20), ExpanderConfig::pcf8575(0x20)];

        let mut ctl = Controller::new(Pins::default());
        ctl.set_expanders(&BAD);
        assert_eq!(ctl.begin().unwrap_err().kind, ErrorKind::InvalidConfig);
        ctl.set_expanders(&DUP);
        assert_eq!(ctl.begin().unwrap_err().kind, ErrorKind::InvalidConfig);
    }

    #[test]
    fn zero_error_threshold_is_invalid() {
        static ENCODERS: [EncoderPins; 1] = [EncoderPins::new(6, 7)];
        let mut ctl = Controller::new(Pins::default());
        ctl.set_encoders(&ENCODERS);
        ctl.set_encoder_error_threshold(0);
        assert_eq!(ctl.begin().unwrap_err().kind, ErrorKind::InvalidConfig);
        assert!(!ctl.is_initialized());

        ctl.set_encoder_error_threshold(1);
        ctl.begin().unwrap();

        // A clean detent (rest at 3, then 3 -> 2) keeps the encoder valid.
        ctl.board_mut().set_low(6, false);
        ctl.board_mut().set_low(7, true);
        ctl.board_mut().advance_ms(2);
        assert_eq!(ctl.try_update(&mut ()), Ok(UpdateStatus::Changed));
        assert_eq!(ctl.encoder_position(0), 1);
        assert!(ctl.is_encoder_valid(0));
    }

    #[test]
    fn divisor_range() {
        static ENCODERS: [EncoderPins; 1] = [EncoderPins::new(6, 7)];
        let mut ctl = Controller::new(Pins::default());
        ctl.set_encoders(&ENCODERS);
        ctl.begin().unwrap();

        assert!(ctl.set_encoder_divisor(0, 2).is_ok());
        assert_eq!(
            ctl.set_encoder_divisor(0, 5).unwrap_err().kind,
            ErrorKind::InvalidConfig
        );
        assert_eq!(
            ctl.set_encoder_divisor(0, 0).unwrap_err().kind,
            ErrorKind::InvalidConfig
        );
        assert!(ctl.set_encoder_position(1, 3).is_err());
        ctl.set_encoder_position(0, 42).unwrap();
        assert_eq!(ctl.encoder_position(0), 42);
    }

    #[test]
    fn getters_out_of_range_are_inert() {
        let ctl = started();
        assert!(!ctl.matrix_state(3, 3));
        assert!(!ctl.gpio_state(9));
        assert_eq!(ctl.encoder_position(0), 0);
        assert!(!ctl.is_encoder_valid(0));
        assert_eq!(ctl.expander_state(0), 0);
        assert!(!ctl.is_expander_online(0));
    }

    #[test]
    fn release_returns_board() {
        let mut ctl = started();
        press(&mut ctl, 5);
        let (board, NoBus) = ctl.release();
        assert!(board.modes.contains(&(5, PinMode::InputPullup)));
    }
}
