//! Direct GPIO buttons: one active-low input per line.

use heapless::Vec;

use crate::config::MAX_GPIO_LINES;
use crate::debounce::DebouncedLine;
use crate::event::{EventBatch, InputEvent};
use crate::hal::{is_low, Board, PinMode};

#[derive(Clone, Debug, Default)]
pub struct GpioBank<'a> {
    pins: &'a [u8],
    lines: Vec<DebouncedLine, MAX_GPIO_LINES>,
}

impl<'a> GpioBank<'a> {
    pub fn new(pins: &'a [u8]) -> Self {
        Self {
            pins,
            lines: Vec::new(),
        }
    }

    pub fn pins(&self) -> &'a [u8] {
        self.pins
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    pub(crate) fn reset(&mut self) {
        self.lines.clear();
        let count = self.pins.len().min(MAX_GPIO_LINES);
        let _ = self.lines.resize(count, DebouncedLine::new());
    }

    pub(crate) fn configure_pins<P: Board>(&self, board: &mut P) {
        for &pin in self.pins {
            board.configure_pin(pin, PinMode::InputPullup);
        }
    }

    pub(crate) fn poll<P: Board>(&mut self, board: &mut P, debounce_ms: u32, events: &mut EventBatch) -> bool {
        let now = board.millis();
        let mut changed = false;
        for (index, (line, &pin)) in self.lines.iter_mut().zip(self.pins).enumerate() {
            let pressed = is_low(board, pin);
            if line.update(pressed, now, debounce_ms) {
                changed = true;
                let _ = events.push(InputEvent::Gpio {
                    index: index as u8,
                    pressed,
                });
            }
        }
        changed
    }

    pub fn state(&self, index: usize) -> bool {
        self.lines.get(index).map(|l| l.state()).unwrap_or(false)
    }
}
