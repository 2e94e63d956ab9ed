//! Identity exchange message of the plaintext handshake.
//!
//! ```text
//! message Exchange {
//!   optional bytes id = 1;          // binary peer id
//!   optional PublicKey pubkey = 2;  // key envelope
//! }
//! ```

use prost::Message;

use crate::crypto::{KeyEnvelope, KeyMarshaller, PublicKey};
use crate::error::HandshakeError;
use crate::peer::PeerId;

#[derive(Clone, PartialEq, Message)]
struct ExchangeProto {
    #[prost(bytes = "vec", optional, tag = "1")]
    id: Option<Vec<u8>>,
    #[prost(message, optional, tag = "2")]
    pubkey: Option<KeyEnvelope>,
}

/// What each side claims about itself during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeMessage {
    pub pubkey: PublicKey,
    pub peer_id: PeerId,
}

impl ExchangeMessage {
    /// Message for `pubkey`, carrying the id derived from it.
    pub fn for_key(pubkey: PublicKey) -> Self {
        let peer_id = PeerId::from_public_key(&pubkey);
        Self { pubkey, peer_id }
    }
}

/// Encodes exchange messages, validating the embedded key on decode.
#[derive(Debug, Clone, Default)]
pub struct ExchangeMessageMarshaller {
    keys: KeyMarshaller,
}

impl ExchangeMessageMarshaller {
    pub fn new(keys: KeyMarshaller) -> Self {
        Self { keys }
    }

    pub fn marshal(&self, msg: &ExchangeMessage) -> Vec<u8> {
        ExchangeProto {
            id: Some(msg.peer_id.as_bytes().to_vec()),
            pubkey: Some(KeyEnvelope::from_key(&msg.pubkey.0)),
        }
        .encode_to_vec()
    }

    /// Any malformed part is reported as [`HandshakeError::ExchangeReceive`].
    pub fn unmarshal(&self, bytes: &[u8]) -> Result<ExchangeMessage, HandshakeError> {
        let proto = ExchangeProto::decode(bytes).map_err(|e| {
            tracing::debug!(error = %e, "undecodable exchange message");
            HandshakeError::ExchangeReceive
        })?;

        let (Some(id), Some(envelope)) = (proto.id, proto.pubkey) else {
            tracing::debug!("exchange message is missing a field");
            return Err(HandshakeError::ExchangeReceive);
        };

        let pubkey = self
            .keys
            .unmarshal_public_key(&envelope.encode_to_vec())
            .map_err(|e| {
                tracing::debug!(error = %e, "invalid public key in exchange message");
                HandshakeError::ExchangeReceive
            })?;
        let peer_id = PeerId::from_bytes(&id).map_err(|e| {
            tracing::debug!(error = %e, "invalid peer id in exchange message");
            HandshakeError::ExchangeReceive
        })?;

        Ok(ExchangeMessage { pubkey, peer_id })
    }
}
