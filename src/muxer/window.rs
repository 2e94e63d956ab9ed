//! Per-stream flow-control windows.
//!
//! The send window is what the peer allows us to send; the receive window is
//! what we allow the peer to send. Both are plain counters guarded by the
//! owning stream's lock.
//!
//! # Window update cycle
//!
//! ```text
//! peer sends n bytes   -> RecvWindow::record(n)      remaining -= n
//! application reads k  -> RecvWindow::consume(k)     pending += k
//! pending >= threshold -> WINDOW_UPDATE(pending)     remaining += pending
//! ```

/// Bytes we may still send on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SendWindow {
    available: u32,
}

impl SendWindow {
    pub fn new(initial: u32) -> Self {
        Self { available: initial }
    }

    #[inline]
    pub fn available(&self) -> u32 {
        self.available
    }

    /// Account for `n` bytes sent. Callers never exceed `available`.
    pub fn consume(&mut self, n: u32) {
        self.available = self.available.saturating_sub(n);
    }

    /// Apply a signed WINDOW_UPDATE delta, clamped to `0..=u32::MAX`.
    pub fn apply_delta(&mut self, delta: i32) {
        let updated = i64::from(self.available) + i64::from(delta);
        self.available = updated.clamp(0, i64::from(u32::MAX)) as u32;
    }
}

/// The peer sent more than its window allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WindowExceeded {
    pub received: u32,
    pub remaining: u32,
}

/// Bytes the peer may still send, plus consumed bytes not yet granted back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RecvWindow {
    remaining: u32,
    pending_update: u32,
    threshold: u32,
}

impl RecvWindow {
    pub fn new(initial: u32, threshold: u32) -> Self {
        Self {
            remaining: initial,
            pending_update: 0,
            threshold,
        }
    }

    /// Account for `n` bytes received from the peer.
    pub fn record(&mut self, n: u32) -> Result<(), WindowExceeded> {
        if n > self.remaining {
            return Err(WindowExceeded {
                received: n,
                remaining: self.remaining,
            });
        }
        self.remaining -= n;
        Ok(())
    }

    /// Account for `n` bytes handed to the application.
    ///
    /// Returns the delta to announce once enough bytes have been consumed.
    pub fn consume(&mut self, n: u32) -> Option<u32> {
        self.pending_update = self.pending_update.saturating_add(n);
        if self.pending_update < self.threshold {
            return None;
        }
        // Deltas travel as i32.
        let delta = self.pending_update.min(i32::MAX as u32);
        self.pending_update -= delta;
        self.remaining = self.remaining.saturating_add(delta);
        Some(delta)
    }

    #[cfg(test)]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}
