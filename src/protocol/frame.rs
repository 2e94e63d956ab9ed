//! Frame struct, constructors and the stateless codec.
//!
//! A frame is a header plus, for DATA frames only, `length` payload bytes.
//! Uses `bytes::Bytes` for zero-copy payload sharing.
//!
//! # Example
//!
//! ```
//! use peerwire::protocol::{decode, Decoded, Frame};
//!
//! let frame = Frame::data(1, b"hello".to_vec().into());
//! let bytes = frame.encode();
//!
//! match decode(&bytes).unwrap() {
//!     Decoded::Frame { frame: decoded, consumed } => {
//!         assert_eq!(decoded, frame);
//!         assert_eq!(consumed, bytes.len());
//!     }
//!     Decoded::NeedMoreData => unreachable!(),
//! }
//! ```

use bytes::Bytes;

use super::wire_format::{flags, FrameType, Header, HEADER_SIZE, SESSION_STREAM_ID};
use crate::error::{DecodeError, EncodeError};

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes, empty for everything but DATA.
    pub payload: Bytes,
}

/// Outcome of [`decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A full frame and the number of input bytes it occupied.
    Frame { frame: Frame, consumed: usize },
    /// Input is shorter than the header, or than header + DATA payload.
    NeedMoreData,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    fn control(frame_type: FrameType, frame_flags: u16, stream_id: u32, length: u32) -> Self {
        Self::new(
            Header::new(frame_type, frame_flags, stream_id, length),
            Bytes::new(),
        )
    }

    /// DATA + SYN: opens a stream.
    pub fn new_stream(stream_id: u32) -> Self {
        Self::control(FrameType::Data, flags::SYN, stream_id, 0)
    }

    /// DATA + ACK: acknowledges a stream opened by the peer.
    pub fn ack_stream(stream_id: u32) -> Self {
        Self::control(FrameType::Data, flags::ACK, stream_id, 0)
    }

    /// DATA + FIN: half-closes our side of a stream.
    pub fn close_stream(stream_id: u32) -> Self {
        Self::control(FrameType::Data, flags::FIN, stream_id, 0)
    }

    /// DATA + RST: resets a stream.
    pub fn reset_stream(stream_id: u32) -> Self {
        Self::control(FrameType::Data, flags::RST, stream_id, 0)
    }

    /// PING + SYN carrying an opaque value.
    pub fn ping_request(value: u32) -> Self {
        Self::control(FrameType::Ping, flags::SYN, SESSION_STREAM_ID, value)
    }

    /// PING + ACK echoing the request's value.
    pub fn ping_response(value: u32) -> Self {
        Self::control(FrameType::Ping, flags::ACK, SESSION_STREAM_ID, value)
    }

    /// DATA without flags; `length` is the payload size.
    pub fn data(stream_id: u32, payload: Bytes) -> Self {
        Self::new(
            Header::new(
                FrameType::Data,
                flags::NONE,
                stream_id,
                payload.len() as u32,
            ),
            payload,
        )
    }

    /// GO_AWAY with an error code (see [`go_away`](super::go_away)).
    pub fn go_away(code: u32) -> Self {
        Self::control(FrameType::GoAway, flags::NONE, SESSION_STREAM_ID, code)
    }

    /// WINDOW_UPDATE with a signed delta.
    pub fn window_update(stream_id: u32, delta: i32) -> Self {
        Self::control(FrameType::WindowUpdate, flags::NONE, stream_id, delta as u32)
    }

    /// Get the frame type.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        self.header.frame_type
    }

    /// Get the stream ID.
    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.header.stream_id
    }

    /// Encode header and payload into one contiguous buffer.
    pub fn encode(&self) -> Vec<u8> {
        build_frame(&self.header, &self.payload)
    }
}

/// Build a complete frame as a single byte vector.
///
/// The payload is only appended for DATA frames.
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let payload: &[u8] = match header.frame_type {
        FrameType::Data => payload,
        _ => &[],
    };
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

/// Encode a frame from its raw fields.
///
/// Produces exactly 12 header bytes followed by `payload` if present. For
/// DATA frames `length` must equal the payload size.
pub fn encode(
    frame_type: FrameType,
    frame_flags: u16,
    stream_id: u32,
    length: u32,
    payload: Option<&[u8]>,
) -> Result<Vec<u8>, EncodeError> {
    let payload = payload.unwrap_or_default();
    if frame_type == FrameType::Data && length as usize != payload.len() {
        return Err(EncodeError::LengthMismatch {
            length,
            payload: payload.len(),
        });
    }
    let header = Header::new(frame_type, frame_flags, stream_id, length);
    Ok(build_frame(&header, payload))
}

/// Decode one frame from the front of `buf`.
///
/// Returns [`Decoded::NeedMoreData`] when fewer than 12 bytes, or fewer than
/// header + `length` bytes for a DATA frame, are available.
pub fn decode(buf: &[u8]) -> Result<Decoded, DecodeError> {
    let Some(header) = Header::decode(buf)? else {
        return Ok(Decoded::NeedMoreData);
    };

    let total = HEADER_SIZE + header.payload_len();
    if buf.len() < total {
        return Ok(Decoded::NeedMoreData);
    }

    let payload = Bytes::copy_from_slice(&buf[HEADER_SIZE..total]);
    Ok(Decoded::Frame {
        frame: Frame::new(header, payload),
        consumed: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::go_away;

    fn decode_one(bytes: &[u8]) -> Frame {
        match decode(bytes).unwrap() {
            Decoded::Frame { frame, consumed } => {
                assert_eq!(consumed, bytes.len());
                frame
            }
            Decoded::NeedMoreData => panic!("expected a full frame"),
        }
    }

    #[test]
    fn test_constructors_roundtrip() {
        let frames = [
            Frame::new_stream(1),
            Frame::ack_stream(2),
            Frame::close_stream(3),
            Frame::reset_stream(4),
            Frame::ping_request(0xDEAD_BEEF),
            Frame::ping_response(0xDEAD_BEEF),
            Frame::data(5, Bytes::from_static(b"payload")),
            Frame::go_away(go_away::PROTOCOL_ERROR),
            Frame::window_update(6, -1024),
        ];

        for frame in frames {
            assert_eq!(decode_one(&frame.encode()), frame);
        }
    }

    #[test]
    fn test_constructor_fields() {
        let syn = Frame::new_stream(7).header;
        assert_eq!(syn.frame_type, FrameType::Data);
        assert!(syn.is_syn());
        assert_eq!(syn.length, 0);

        let ping = Frame::ping_response(99).header;
        assert_eq!(ping.frame_type, FrameType::Ping);
        assert!(ping.is_ack());
        assert_eq!(ping.stream_id, 0);
        assert_eq!(ping.length, 99);

        let update = Frame::window_update(3, -5).header;
        assert_eq!(update.frame_type, FrameType::WindowUpdate);
        assert_eq!(update.window_delta(), -5);

        let bye = Frame::go_away(go_away::NORMAL).header;
        assert_eq!(bye.frame_type, FrameType::GoAway);
        assert_eq!(bye.length, 0);
    }

    #[test]
    fn test_encode_is_bit_exact() {
        let bytes = encode(FrameType::Data, flags::SYN, 1, 3, Some(b"abc")).unwrap();
        assert_eq!(
            bytes,
            vec![0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 3, b'a', b'b', b'c']
        );

        let ping = encode(FrameType::Ping, flags::ACK, 0, 0x0102_0304, None).unwrap();
        assert_eq!(ping, vec![0, 2, 0, 2, 0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_encode_rejects_data_length_mismatch() {
        assert_eq!(
            encode(FrameType::Data, flags::NONE, 1, 5, Some(b"abc")),
            Err(EncodeError::LengthMismatch {
                length: 5,
                payload: 3
            })
        );
        assert_eq!(
            encode(FrameType::Data, flags::NONE, 1, 2, None),
            Err(EncodeError::LengthMismatch {
                length: 2,
                payload: 0
            })
        );
    }

    #[test]
    fn test_truncated_header_needs_more_data() {
        let bytes = Frame::ping_request(1).encode();
        for len in 0..HEADER_SIZE {
            assert_eq!(decode(&bytes[..len]), Ok(Decoded::NeedMoreData));
        }
    }

    #[test]
    fn test_truncated_payload_needs_more_data() {
        let bytes = Frame::data(1, Bytes::from_static(b"0123456789")).encode();
        for len in HEADER_SIZE..bytes.len() {
            assert_eq!(decode(&bytes[..len]), Ok(Decoded::NeedMoreData));
        }
    }

    #[test]
    fn test_unknown_type_is_error() {
        let mut bytes = Frame::ping_request(1).encode();
        bytes[1] = 0xFF;
        assert_eq!(decode(&bytes), Err(DecodeError::UnknownFrameType(0xFF)));
    }

    #[test]
    fn test_non_data_length_is_not_payload() {
        // A PING carrying a huge opaque value must not wait for payload bytes.
        let bytes = Frame::ping_request(u32::MAX).encode();
        let frame = decode_one(&bytes);
        assert!(frame.payload.is_empty());
        assert_eq!(frame.header.length, u32::MAX);
    }

    #[test]
    fn test_decode_leaves_trailing_bytes() {
        let mut bytes = Frame::data(1, Bytes::from_static(b"hi")).encode();
        bytes.extend_from_slice(&Frame::close_stream(1).encode());

        match decode(&bytes).unwrap() {
            Decoded::Frame { frame, consumed } => {
                assert_eq!(frame.payload, Bytes::from_static(b"hi"));
                assert_eq!(consumed, HEADER_SIZE + 2);
            }
            Decoded::NeedMoreData => panic!("expected a full frame"),
        }
    }

    #[test]
    fn test_build_frame_ignores_payload_for_control() {
        let header = Header::new(FrameType::GoAway, flags::NONE, 0, 2);
        assert_eq!(build_frame(&header, b"junk").len(), HEADER_SIZE);
    }
}
