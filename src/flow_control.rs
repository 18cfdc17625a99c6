//! HTTP/2 flow control window tracking (RFC 7540 Section 6.9).

use crate::frame::{DEFAULT_INITIAL_WINDOW_SIZE, MAX_WINDOW_SIZE};

/// Returned when a window operation would leave the legal range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOverflow;

/// A send or receive flow-control window.
///
/// Signed because a SETTINGS_INITIAL_WINDOW_SIZE reduction can legally drive
/// a send window below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowWindow {
    window: i64,
}

impl FlowWindow {
    pub fn new(initial: u32) -> Self {
        Self {
            window: i64::from(initial),
        }
    }

    /// Current window size (may be negative after SETTINGS change).
    pub fn size(&self) -> i64 {
        self.window
    }

    /// Bytes that may be sent right now.
    pub fn available(&self) -> usize {
        self.window.max(0) as usize
    }

    /// Consume `amount` bytes from the window.
    /// Fails without modifying the window if the window would go below zero.
    pub fn consume(&mut self, amount: u32) -> Result<(), WindowOverflow> {
        let new = self.window - i64::from(amount);
        if new < 0 {
            return Err(WindowOverflow);
        }
        self.window = new;
        Ok(())
    }

    /// Charge bytes already sent within [`FlowWindow::available`].
    pub fn spend(&mut self, amount: usize) {
        debug_assert!(amount <= self.available(), "spent {} of {}", amount, self.window);
        self.window -= amount as i64;
    }

    /// Add `increment` to the window (from WINDOW_UPDATE).
    /// Fails if the increment is zero or the window would exceed 2^31 - 1.
    pub fn increase(&mut self, increment: u32) -> Result<(), WindowOverflow> {
        if increment == 0 {
            return Err(WindowOverflow);
        }
        self.adjust(i64::from(increment))
    }

    /// Shift the window after a SETTINGS change to INITIAL_WINDOW_SIZE.
    /// `delta` is (new_initial - old_initial), which can be negative.
    pub fn adjust(&mut self, delta: i64) -> Result<(), WindowOverflow> {
        let new = self.window + delta;
        if new > i64::from(MAX_WINDOW_SIZE) {
            return Err(WindowOverflow);
        }
        self.window = new;
        Ok(())
    }
}

impl Default for FlowWindow {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_WINDOW_SIZE)
    }
}
