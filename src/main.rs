//! Demo firmware for an nRF52840 button box.
//!
//! Wiring:
//!   - 4×4 matrix: rows P0.02 P0.03 P0.28 P0.29, columns P0.04 P0.05 P0.30 P0.31
//!   - Buttons: P0.11, P0.12 (DK buttons 1 and 2)
//!   - Encoder: A P1.01, B P1.02, push P1.03
//!   - MCP23017 at 0x20 on TWIM0, SDA P0.26, SCL P0.27
//!
//! Events are logged over RTT.

#![no_std]
#![no_main]

use defmt::{error, info, warn};
use embassy_executor::Spawner;
use embassy_nrf::gpio::{AnyPin, Flex, OutputDrive, Pull};
use embassy_nrf::twim::{self, Twim};
use embassy_nrf::{bind_interrupts, peripherals};
use embassy_time::{Delay, Duration, Instant, Timer};
use embedded_hal::delay::DelayNs;
use simracing_input::{
    Board, Controller, ControllerError, Direction, EncoderPins, EventHandler, ExpanderConfig,
    I2cBus, PinMode, PinState, UpdateError, UpdateStatus,
};
use {defmt_rtt as _, panic_probe as _};

bind_interrupts!(struct Irqs {
    SPIM0_SPIS0_TWIM0_TWIS0_SPI0_TWI0 => twim::InterruptHandler<peripherals::TWISPI0>;
});

/// P0.00..P1.15
const PIN_COUNT: usize = 48;

/// Delay between update cycles.
const POLL_INTERVAL: Duration = Duration::from_millis(1);
/// Delay between update cycles while power saving.
const SLEEP_POLL_INTERVAL: Duration = Duration::from_millis(20);

static MATRIX_ROWS: [u8; 4] = [2, 3, 28, 29];
static MATRIX_COLS: [u8; 4] = [4, 5, 30, 31];
static BUTTONS: [u8; 2] = [11, 12];
static ENCODERS: [EncoderPins; 1] = [EncoderPins::with_button(33, 34, 35)];
static EXPANDERS: [ExpanderConfig; 1] = [ExpanderConfig::mcp23017(0x20)];

/// Pins claimed by number on first use.
struct NrfBoard {
    pins: [Option<Flex<'static>>; PIN_COUNT],
    delay: Delay,
}

impl NrfBoard {
    fn new() -> Self {
        Self {
            pins: core::array::from_fn(|_| None),
            delay: Delay,
        }
    }

    fn pin(&mut self, pin: u8) -> Option<&mut Flex<'static>> {
        self.pins.get_mut(pin as usize).and_then(Option::as_mut)
    }
}

impl DelayNs for NrfBoard {
    fn delay_ns(&mut self, ns: u32) {
        self.delay.delay_ns(ns)
    }
}

impl Board for NrfBoard {
    fn configure_pin(&mut self, pin: u8, mode: PinMode) {
        let Some(slot) = self.pins.get_mut(pin as usize) else {
            return;
        };
        // Only pins never handed to another driver are configured here;
        // the controller rejects numbers outside `is_valid_pin`.
        let flex = slot.get_or_insert_with(|| Flex::new(unsafe { AnyPin::steal(pin) }));
        match mode {
            PinMode::Input => flex.set_as_input(Pull::None),
            PinMode::InputPullup => flex.set_as_input(Pull::Up),
            PinMode::Output => flex.set_as_output(OutputDrive::Standard),
        }
    }

    fn write_pin(&mut self, pin: u8, level: PinState) {
        if let Some(flex) = self.pin(pin) {
            match level {
                PinState::High => flex.set_high(),
                PinState::Low => flex.set_low(),
            }
        }
    }

    fn read_pin(&mut self, pin: u8) -> PinState {
        match self.pin(pin) {
            Some(flex) if flex.is_low() => PinState::Low,
            _ => PinState::High,
        }
    }

    fn millis(&self) -> u32 {
        Instant::now().as_millis() as u32
    }

    fn micros(&self) -> u32 {
        Instant::now().as_micros() as u32
    }

    fn is_valid_pin(&self, pin: u8) -> bool {
        // P0.26/P0.27 belong to the I2C bus.
        (pin as usize) < PIN_COUNT && pin != 26 && pin != 27
    }
}

/// Logs every event over RTT.
struct LogEvents;

impl EventHandler for LogEvents {
    fn on_matrix_change(&mut self, profile: u8, row: u8, col: u8, pressed: bool) {
        info!("[p{=u8}] matrix {=u8},{=u8} {}", profile, row, col, pressed);
    }

    fn on_gpio_change(&mut self, profile: u8, index: u8, pressed: bool) {
        info!("[p{=u8}] button {=u8} {}", profile, index, pressed);
    }

    fn on_encoder_rotate(&mut self, profile: u8, encoder: u8, direction: Direction) {
        info!("[p{=u8}] encoder {=u8} {}", profile, encoder, direction);
    }

    fn on_encoder_button(&mut self, profile: u8, encoder: u8, pressed: bool) {
        info!("[p{=u8}] encoder {=u8} push {}", profile, encoder, pressed);
    }

    fn on_expander_change(&mut self, profile: u8, device: u8, bit: u8, active: bool) {
        info!("[p{=u8}] expander {=u8} line {=u8} {}", profile, device, bit, active);
    }

    fn on_error(&mut self, error: &ControllerError) -> bool {
        warn!("fault: {}", error);
        true
    }
}

#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    let p = embassy_nrf::init(Default::default());
    info!("simracing-input demo starting");

    let i2c = Twim::new(p.TWISPI0, Irqs, p.P0_26, p.P0_27, twim::Config::default());

    let mut controller = Controller::with_bus(NrfBoard::new(), I2cBus::new(i2c));
    controller.set_matrix(&MATRIX_ROWS, &MATRIX_COLS);
    controller.set_gpio(&BUTTONS);
    controller.set_encoders(&ENCODERS);
    controller.set_expanders(&EXPANDERS);
    controller.set_profiles(2);
    controller.set_power_save(Some(60_000));

    if let Err(e) = controller.begin() {
        error!("begin failed: {}", e);
        loop {
            Timer::after_secs(1).await;
        }
    }

    let mut handler = LogEvents;
    loop {
        let interval = match controller.try_update(&mut handler) {
            Ok(UpdateStatus::PowerSaving) | Ok(UpdateStatus::EnteredPowerSave) => {
                SLEEP_POLL_INTERVAL
            }
            Ok(_) => POLL_INTERVAL,
            Err(UpdateError::Busy) => POLL_INTERVAL,
            Err(e) => {
                error!("update: {}", e);
                SLEEP_POLL_INTERVAL
            }
        };
        Timer::after(interval).await;
    }
}
