//! Negotiation module - agreeing on a protocol over a connection.
//!
//! Used by the upgrader for security and muxer protocols, and by the
//! router for per-stream application protocols.

mod multiselect;

pub use multiselect::{Multiselect, MULTISTREAM_PROTOCOL_ID};

use crate::error::Result;
use crate::transport::{BoxFuture, RawConnection, Role};

/// Protocol negotiation over an established byte stream.
pub trait Negotiator: Send + Sync {
    /// Agree on one of `protocols`; the dialer's order is its preference.
    ///
    /// Must not read past the end of the negotiation.
    fn select_protocol<'a>(
        &'a self,
        conn: &'a mut dyn RawConnection,
        role: Role,
        protocols: &'a [String],
    ) -> BoxFuture<'a, Result<String>>;
}
