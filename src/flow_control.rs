//! Flow-control window arithmetic (RFC 9113 Section 5.2).
//!
//! A [`Window`] is used for both directions: outbound windows shrink when we
//! send DATA and grow on WINDOW_UPDATE, inbound windows shrink when the peer
//! sends DATA and grow when the application consumes it.

use crate::error::ProtocolError;

/// Default SETTINGS_INITIAL_WINDOW_SIZE and connection window.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Largest legal window (2^31 - 1).
pub const MAX_WINDOW_SIZE: i64 = 0x7FFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Can go negative after a SETTINGS_INITIAL_WINDOW_SIZE decrease.
    size: i64,
}

impl Default for Window {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_WINDOW_SIZE)
    }
}

impl Window {
    pub fn new(initial: u32) -> Self {
        Self {
            size: initial as i64,
        }
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    /// Bytes that may be sent right now.
    pub fn available(&self) -> usize {
        self.size.max(0) as usize
    }

    /// Apply a WINDOW_UPDATE increment.
    pub fn increase(&mut self, increment: u32) -> Result<i64, ProtocolError> {
        let new_size = self.size + increment as i64;
        if new_size > MAX_WINDOW_SIZE {
            return Err(ProtocolError::flow_control(format!(
                "window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }
        self.size = new_size;
        Ok(self.size)
    }

    /// Take `amount` bytes out of the window.
    pub fn consume(&mut self, amount: usize) -> Result<(), ProtocolError> {
        if amount as i64 > self.size {
            return Err(ProtocolError::flow_control(format!(
                "{} bytes exceed flow-control window of {}",
                amount, self.size
            )));
        }
        self.size -= amount as i64;
        Ok(())
    }

    /// Shift the window after SETTINGS_INITIAL_WINDOW_SIZE changed by `delta`.
    pub fn adjust(&mut self, delta: i64) -> Result<(), ProtocolError> {
        let new_size = self.size + delta;
        if new_size > MAX_WINDOW_SIZE {
            return Err(ProtocolError::flow_control(format!(
                "window size {} exceeds maximum (2^31-1)",
                new_size
            )));
        }
        self.size = new_size;
        Ok(())
    }
}
