//! Muxer module - yamux-style stream multiplexing.
//!
//! A [`Session`] turns one connection into many flow-controlled
//! [`Stream`]s. [`MuxerAdaptor`] is the seam the upgrader negotiates over;
//! [`Yamux`] is the adaptor for this implementation.

mod config;
mod session;
mod stream;
mod window;

pub use config::{
    SessionConfig, DEFAULT_INITIAL_WINDOW, DEFAULT_KEEP_ALIVE_INTERVAL, DEFAULT_MAX_FRAME_PAYLOAD,
    DEFAULT_MAX_STREAMS, DEFAULT_PING_TIMEOUT,
};
pub use session::Session;
pub use stream::{Stream, StreamState};

use crate::transport::{BoxedConnection, Role};

/// Protocol id negotiated for [`Yamux`].
pub const YAMUX_PROTOCOL_ID: &str = "/yamux/1.0.0";

/// A negotiable stream multiplexer.
pub trait MuxerAdaptor: Send + Sync {
    /// Protocol id offered during negotiation.
    fn protocol_id(&self) -> &str;

    /// Start a session on an already secured connection.
    fn new_session(&self, conn: BoxedConnection, role: Role) -> Session;
}

/// The yamux multiplexer with a fixed session configuration.
#[derive(Debug, Clone, Default)]
pub struct Yamux {
    config: SessionConfig,
}

impl Yamux {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl MuxerAdaptor for Yamux {
    fn protocol_id(&self) -> &str {
        YAMUX_PROTOCOL_ID
    }

    fn new_session(&self, conn: BoxedConnection, role: Role) -> Session {
        Session::new(conn, role, self.config.clone())
    }
}
