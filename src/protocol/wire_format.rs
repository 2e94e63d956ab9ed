//! Wire format encoding and decoding.
//!
//! Implements the 12-byte multiplexer header:
//! ```text
//! ┌─────────┬──────┬──────────┬───────────┬──────────┐
//! │ Version │ Type │ Flags    │ Stream ID │ Length   │
//! │ 1 byte  │1 byte│ uint16 BE│ uint32 BE │ uint32 BE│
//! └─────────┴──────┴──────────┴───────────┴──────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. `length` is a byte count for
//! DATA, a signed window delta for WINDOW_UPDATE, an opaque value for PING
//! and an error code for GO_AWAY.

use crate::error::DecodeError;

/// Header size in bytes (fixed, exactly 12).
pub const HEADER_SIZE: usize = 12;

/// Protocol version written into every header.
pub const PROTOCOL_VERSION: u8 = 0;

/// Stream id used by session-level frames (PING, GO_AWAY).
pub const SESSION_STREAM_ID: u32 = 0;

/// Flag constants for the protocol.
pub mod flags {
    /// Opens a new stream.
    pub const SYN: u16 = 0b0000_0001;
    /// Acknowledges a new stream or answers a ping.
    pub const ACK: u16 = 0b0000_0010;
    /// Half-closes the sender's side of a stream.
    pub const FIN: u16 = 0b0000_0100;
    /// Abruptly terminates a stream.
    pub const RST: u16 = 0b0000_1000;

    /// No flags set.
    pub const NONE: u16 = 0;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u16, flag: u16) -> bool {
        flags & flag != 0
    }
}

/// GO_AWAY error codes.
pub mod go_away {
    /// Normal termination.
    pub const NORMAL: u32 = 0;
    /// The peer violated the protocol.
    pub const PROTOCOL_ERROR: u32 = 1;
    /// Internal failure on the sending side.
    pub const INTERNAL_ERROR: u32 = 2;
}

/// Frame type carried in byte 1 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Stream payload (and stream open/close/reset signalling).
    Data = 0,
    /// Grants or withdraws send window on a stream.
    WindowUpdate = 1,
    /// Session heartbeat.
    Ping = 2,
    /// Session termination notice.
    GoAway = 3,
}

impl TryFrom<u8> for FrameType {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Data),
            1 => Ok(Self::WindowUpdate),
            2 => Ok(Self::Ping),
            3 => Ok(Self::GoAway),
            other => Err(DecodeError::UnknownFrameType(other)),
        }
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Protocol version.
    pub version: u8,
    /// Frame type.
    pub frame_type: FrameType,
    /// Flags (see `flags` module).
    pub flags: u16,
    /// Stream identifier (0 for session frames).
    pub stream_id: u32,
    /// Payload length, window delta, ping value or error code.
    pub length: u32,
}

impl Header {
    /// Create a new header with the current protocol version.
    pub fn new(frame_type: FrameType, flags: u16, stream_id: u32, length: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            frame_type,
            flags,
            stream_id,
            length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use peerwire::protocol::{flags, FrameType, Header};
    ///
    /// let header = Header::new(FrameType::Data, flags::SYN, 1, 0);
    /// let bytes = header.encode();
    /// assert_eq!(bytes, [0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (12 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        buf[0] = self.version;
        buf[1] = self.frame_type as u8;
        buf[2..4].copy_from_slice(&self.flags.to_be_bytes());
        buf[4..8].copy_from_slice(&self.stream_id.to_be_bytes());
        buf[8..12].copy_from_slice(&self.length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `Ok(None)` if the buffer is shorter than a header and an
    /// error if the type byte is unknown.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>, DecodeError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }
        Ok(Some(Self {
            version: buf[0],
            frame_type: FrameType::try_from(buf[1])?,
            flags: u16::from_be_bytes([buf[2], buf[3]]),
            stream_id: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            length: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        }))
    }

    /// Number of payload bytes following this header on the wire.
    #[inline]
    pub fn payload_len(&self) -> usize {
        match self.frame_type {
            FrameType::Data => self.length as usize,
            _ => 0,
        }
    }

    /// `length` interpreted as a signed window delta.
    #[inline]
    pub fn window_delta(&self) -> i32 {
        self.length as i32
    }

    #[inline]
    pub fn is_syn(&self) -> bool {
        flags::has_flag(self.flags, flags::SYN)
    }

    #[inline]
    pub fn is_ack(&self) -> bool {
        flags::has_flag(self.flags, flags::ACK)
    }

    #[inline]
    pub fn is_fin(&self) -> bool {
        flags::has_flag(self.flags, flags::FIN)
    }

    #[inline]
    pub fn is_rst(&self) -> bool {
        flags::has_flag(self.flags, flags::RST)
    }
}
