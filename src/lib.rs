//! Polling input engine for sim-racing button boxes.
//!
//! Reads a debounced button matrix, direct GPIO buttons, quadrature
//! rotary encoders and I2C port expanders (MCP23017, PCF8574/PCF8575)
//! from one cooperative update loop, and reports confirmed changes
//! through an [`EventHandler`].
//!
//! Hardware is reached only through two traits: [`Board`] (pin I/O,
//! clocks, delays) and [`Bus`] (I2C transactions). [`I2cBus`] adapts
//! any blocking `embedded-hal` I2C peripheral.
//!
//! Usage: `cargo test` runs everything on the host.
//!
//! For the nRF52840 demo firmware: `cargo run --release --features embedded`
//!
//! Note: the library is `no_std`; logging goes through `defmt` when the
//! `defmt` feature is enabled and compiles away otherwise.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

// ═══════════════════════════════════════════════════════════════════════════
// Modules
// ═══════════════════════════════════════════════════════════════════════════

pub mod bus;
pub mod config;
pub mod controller;
pub mod debounce;
pub mod encoder;
pub mod error;
pub mod event;
pub mod expander;
pub mod gpio;
pub mod hal;
pub mod matrix;
pub mod power;

// ═══════════════════════════════════════════════════════════════════════════
// Re-exports
// ═══════════════════════════════════════════════════════════════════════════

pub use bus::{Bus, I2cBus, NoBus};
pub use config::{EncoderPins, ExpanderConfig, ExpanderKind};
pub use controller::{Controller, UpdateStatus};
pub use error::{ControllerError, ErrorKind, UpdateError};
pub use event::{Direction, EventHandler};
pub use hal::{Board, PinMode, PinState};
pub use power::PowerState;
