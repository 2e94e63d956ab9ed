//! Error types for peerwire.

use std::io;

use thiserror::Error;

/// Main error type for all peerwire operations.
#[derive(Debug, Error)]
pub enum PeerwireError {
    /// I/O error on the underlying connection.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Frame could not be decoded.
    #[error("Frame decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Frame fields are inconsistent and cannot be encoded.
    #[error("Frame encode error: {0}")]
    Encode(#[from] EncodeError),

    /// Protocol violation by the remote peer (window overrun, bad stream id, ...).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Key (un)marshalling or validation failed.
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Secure channel handshake failed.
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Protocol negotiation failed.
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    /// The remote window is too small for the write; retry after a window update.
    #[error("Stream window exhausted")]
    WouldBlock,

    /// Stream is closed for the requested direction.
    #[error("Stream closed")]
    StreamClosed,

    /// Stream was reset by either side.
    #[error("Stream reset")]
    StreamReset,

    /// A GO_AWAY was sent or received, no new streams may be opened.
    #[error("Session is shutting down")]
    SessionShutdown,

    /// Concurrent stream limit reached.
    #[error("Too many streams")]
    TooManyStreams,

    /// Stream identifiers of our parity are used up.
    #[error("Stream identifiers exhausted")]
    StreamIdsExhausted,

    /// No PING response within the configured timeout.
    #[error("Ping timeout")]
    PingTimeout,

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,
}

/// Frame decoding failures. Truncated input is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Type byte outside of `{0, 1, 2, 3}`.
    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),

    /// DATA payload larger than the receiver accepts.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: u32, max: u32 },
}

/// Frame encoding failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// DATA `length` field differs from the payload size.
    #[error("length field {length} does not match payload size {payload}")]
    LengthMismatch { length: u32, payload: usize },
}

/// Key marshalling and validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Key type discriminant is not RSA, Ed25519 or Secp256k1.
    #[error("unknown key type")]
    UnknownKeyType,

    /// Envelope could not be parsed or key data is malformed for its type.
    #[error("failed to unmarshal key data")]
    FailedUnmarshalData,

    /// Private and public halves of a keypair do not belong together.
    #[error("public key does not match private key")]
    KeyPairMismatch,
}

/// Secure channel handshake failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandshakeError {
    /// Writing our exchange message failed.
    #[error("error occurred while sending exchange message to the peer")]
    ExchangeSend,

    /// Reading or decoding the peer's exchange message failed.
    #[error("error occurred while receiving exchange message from the peer")]
    ExchangeReceive,

    /// Received peer id doesn't match the one derived from the key, or the expected one.
    #[error("received peer id doesn't match actual peer id")]
    InvalidPeerId,

    /// An expected peer id was required but not provided.
    #[error("peer id of the remote peer is not known")]
    EmptyPeerId,
}

impl From<PeerwireError> for io::Error {
    fn from(err: PeerwireError) -> Self {
        let kind = match &err {
            PeerwireError::Io(e) => e.kind(),
            PeerwireError::WouldBlock => io::ErrorKind::WouldBlock,
            PeerwireError::StreamClosed => io::ErrorKind::BrokenPipe,
            PeerwireError::StreamReset => io::ErrorKind::ConnectionReset,
            PeerwireError::ConnectionClosed | PeerwireError::SessionShutdown => {
                io::ErrorKind::ConnectionAborted
            }
            PeerwireError::PingTimeout => io::ErrorKind::TimedOut,
            _ => io::ErrorKind::InvalidData,
        };
        match err {
            PeerwireError::Io(e) => e,
            other => io::Error::new(kind, other),
        }
    }
}

/// Result type alias using PeerwireError.
pub type Result<T> = std::result::Result<T, PeerwireError>;
