//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default per-stream receive window (1 MiB).
pub const DEFAULT_INITIAL_WINDOW: u32 = 1024 * 1024;

/// Default maximum number of concurrent streams.
pub const DEFAULT_MAX_STREAMS: usize = 1000;

/// Default largest payload of one outgoing DATA frame (64 KiB).
pub const DEFAULT_MAX_FRAME_PAYLOAD: u32 = 64 * 1024;

/// Default keep-alive ping interval.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Default time to wait for a ping response.
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables of a multiplexed session.
///
/// Missing fields fall back to their defaults when deserialized, so a node
/// configuration file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Receive window granted to the peer for every new stream.
    pub initial_window: u32,
    /// Concurrent streams, counting both directions.
    pub max_streams: usize,
    /// Consumed bytes that trigger a WINDOW_UPDATE.
    pub window_update_threshold: u32,
    /// Largest DATA payload we send in one frame.
    pub max_frame_payload: u32,
    /// Ping period, `None` disables keep-alive.
    pub keep_alive_interval: Option<Duration>,
    pub ping_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_window: DEFAULT_INITIAL_WINDOW,
            max_streams: DEFAULT_MAX_STREAMS,
            window_update_threshold: DEFAULT_INITIAL_WINDOW / 2,
            max_frame_payload: DEFAULT_MAX_FRAME_PAYLOAD,
            keep_alive_interval: Some(DEFAULT_KEEP_ALIVE_INTERVAL),
            ping_timeout: DEFAULT_PING_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Set the initial window; the update threshold follows at half of it.
    pub fn with_initial_window(mut self, window: u32) -> Self {
        self.initial_window = window;
        self.window_update_threshold = window / 2;
        self
    }

    pub fn with_max_streams(mut self, max: usize) -> Self {
        self.max_streams = max;
        self
    }

    pub fn with_window_update_threshold(mut self, threshold: u32) -> Self {
        self.window_update_threshold = threshold;
        self
    }

    pub fn with_max_frame_payload(mut self, max: u32) -> Self {
        self.max_frame_payload = max;
        self
    }

    pub fn with_keep_alive_interval(mut self, interval: Option<Duration>) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Threshold actually used, kept within `1..=initial_window`.
    pub(crate) fn update_threshold(&self) -> u32 {
        self.window_update_threshold
            .clamp(1, self.initial_window.max(1))
    }

    pub(crate) fn frame_payload_limit(&self) -> usize {
        self.max_frame_payload.max(1) as usize
    }
}
