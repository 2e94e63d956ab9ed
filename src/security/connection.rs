//! Authenticated connection wrapper.
//!
//! The plaintext handshake authenticates identities but applies no
//! encryption, so reads and writes pass straight through to the raw
//! connection.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::crypto::PublicKey;
use crate::peer::PeerId;
use crate::transport::BoxedConnection;

/// A connection whose remote identity has been verified.
pub struct SecureConnection {
    local_peer: PeerId,
    local_public_key: PublicKey,
    remote_peer: PeerId,
    remote_public_key: PublicKey,
    inner: BoxedConnection,
}

impl SecureConnection {
    pub(crate) fn new(
        local_public_key: PublicKey,
        remote_public_key: PublicKey,
        inner: BoxedConnection,
    ) -> Self {
        Self {
            local_peer: PeerId::from_public_key(&local_public_key),
            local_public_key,
            remote_peer: PeerId::from_public_key(&remote_public_key),
            remote_public_key,
            inner,
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn local_public_key(&self) -> &PublicKey {
        &self.local_public_key
    }

    /// Verified id of the remote peer.
    pub fn remote_peer(&self) -> &PeerId {
        &self.remote_peer
    }

    pub fn remote_public_key(&self) -> &PublicKey {
        &self.remote_public_key
    }

    /// Unwrap the raw connection.
    pub fn into_inner(self) -> BoxedConnection {
        self.inner
    }
}

impl fmt::Debug for SecureConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureConnection")
            .field("local_peer", &self.local_peer)
            .field("remote_peer", &self.remote_peer)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for SecureConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for SecureConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[std::io::IoSlice<'_>],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
