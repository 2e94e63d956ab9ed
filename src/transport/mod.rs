//! Transport module - the raw connection abstraction.
//!
//! Dialing and listening live outside this crate. Anything that is an
//! ordered, reliable byte stream can be upgraded: TCP sockets, Unix sockets,
//! in-memory `tokio::io::duplex` pipes, or a multiplexed [`Stream`].
//!
//! [`Stream`]: crate::muxer::Stream

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

/// Boxed future returned by the adaptor traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An ordered, reliable, bidirectional byte stream.
pub trait RawConnection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> RawConnection for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Type-erased connection passed between upgrade stages.
pub type BoxedConnection = Box<dyn RawConnection>;

/// Which side of a connection we are.
///
/// The dialer initiates negotiation and allocates odd stream ids; the
/// listener answers and allocates even ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Dialer,
    Listener,
}

impl Role {
    #[inline]
    pub fn is_dialer(self) -> bool {
        matches!(self, Role::Dialer)
    }

    /// Role of the other side.
    pub fn opposite(self) -> Self {
        match self {
            Role::Dialer => Role::Listener,
            Role::Listener => Role::Dialer,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Dialer => "dialer",
            Role::Listener => "listener",
        })
    }
}
