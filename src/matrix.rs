//! Button matrix scanning.
//!
//! Rows are push-pull outputs idling high; columns are inputs with
//! pull-ups. One row at a time is driven low, the columns are given
//! `MATRIX_SETTLE_US` to settle and are then sampled: a column reading
//! low means the switch at (row, col) is closed. Driving a single row
//! keeps the scan ghost-free for any one pressed key per column.

use heapless::Vec;

use crate::config::{MATRIX_SETTLE_US, MAX_MATRIX_CELLS};
use crate::debounce::DebouncedLine;
use crate::event::{EventBatch, InputEvent};
use crate::hal::{is_low, Board, PinMode, PinState};

/// Pins and per-cell debounce state of the matrix.
#[derive(Clone, Debug, Default)]
pub struct Matrix<'a> {
    rows: &'a [u8],
    cols: &'a [u8],
    /// Row-major, `rows × cols`.
    cells: Vec<DebouncedLine, MAX_MATRIX_CELLS>,
}

impl<'a> Matrix<'a> {
    pub fn new(rows: &'a [u8], cols: &'a [u8]) -> Self {
        Self {
            rows,
            cols,
            cells: Vec::new(),
        }
    }

    pub fn row_pins(&self) -> &'a [u8] {
        self.rows
    }

    pub fn col_pins(&self) -> &'a [u8] {
        self.cols
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_cols(&self) -> usize {
        self.cols.len()
    }

    /// Fresh debounce state for every cell. Dimensions are validated by
    /// the controller before this is called.
    pub(crate) fn reset(&mut self) {
        self.cells.clear();
        let count = (self.rows.len() * self.cols.len()).min(MAX_MATRIX_CELLS);
        // Cannot fail: bounded by the capacity above.
        let _ = self.cells.resize(count, DebouncedLine::new());
    }

    /// Rows as outputs driven high, columns as pulled-up inputs.
    pub(crate) fn configure_pins<P: Board>(&self, board: &mut P) {
        self.restore_rows(board);
        for &pin in self.cols {
            board.configure_pin(pin, PinMode::InputPullup);
        }
    }

    /// Float the row lines (power save).
    pub(crate) fn release_rows<P: Board>(&self, board: &mut P) {
        for &pin in self.rows {
            board.configure_pin(pin, PinMode::Input);
        }
    }

    /// Drive the row lines again, all inactive.
    pub(crate) fn restore_rows<P: Board>(&self, board: &mut P) {
        for &pin in self.rows {
            board.configure_pin(pin, PinMode::Output);
            board.write_pin(pin, PinState::High);
        }
    }

    /// Scan one row and debounce its cells, queueing confirmed changes.
    pub(crate) fn scan_row<P: Board>(
        &mut self,
        board: &mut P,
        row: usize,
        debounce_ms: u32,
        events: &mut EventBatch,
    ) -> bool {
        let Some(&row_pin) = self.rows.get(row) else {
            return false;
        };

        board.write_pin(row_pin, PinState::Low);
        board.delay_us(MATRIX_SETTLE_US);
        let mut closed: u32 = 0;
        for (col, &pin) in self.cols.iter().enumerate() {
            if is_low(board, pin) {
                closed |= 1 << col;
            }
        }
        board.write_pin(row_pin, PinState::High);

        let now = board.millis();
        let width = self.cols.len();
        let mut changed = false;
        for col in 0..width {
            let pressed = closed & (1 << col) != 0;
            let Some(cell) = self.cells.get_mut(row * width + col) else {
                break;
            };
            if cell.update(pressed, now, debounce_ms) {
                changed = true;
                let _ = events.push(InputEvent::Matrix {
                    row: row as u8,
                    col: col as u8,
                    pressed,
                });
            }
        }
        changed
    }

    /// Debounced state of one cell; `false` when out of range.
    pub fn state(&self, row: usize, col: usize) -> bool {
        if row >= self.rows.len() || col >= self.cols.len() {
            return false;
        }
        self.cells
            .get(row * self.cols.len() + col)
            .map(|c| c.state())
            .unwrap_or(false)
    }
}
