//! Key marshalling.
//!
//! Keys are encoded as the protobuf message used across libp2p
//! implementations:
//!
//! ```text
//! message PublicKey  { KeyType Type = 1; bytes Data = 2; }
//! message PrivateKey { KeyType Type = 1; bytes Data = 2; }
//! enum KeyType { RSA = 0; Ed25519 = 1; Secp256k1 = 2; }
//! ```

use std::sync::Arc;

use prost::Message;

use super::key::{Key, KeyType, PrivateKey, PublicKey};
use super::validator::{DefaultKeyValidator, KeyValidator};
use crate::error::KeyError;

/// Protobuf envelope shared by public and private keys.
#[derive(Clone, PartialEq, Message)]
pub(crate) struct KeyEnvelope {
    #[prost(int32, required, tag = "1")]
    pub key_type: i32,
    #[prost(bytes = "vec", required, tag = "2")]
    pub data: Vec<u8>,
}

impl KeyEnvelope {
    pub(crate) fn from_key(key: &Key) -> Self {
        Self {
            key_type: key.key_type.to_wire(),
            data: key.data.clone(),
        }
    }

    pub(crate) fn into_key(self) -> Result<Key, KeyError> {
        let key_type = KeyType::from_wire(self.key_type).ok_or(KeyError::UnknownKeyType)?;
        Ok(Key::new(key_type, self.data))
    }
}

impl PublicKey {
    /// Marshalled form of the key. Deterministic for equal keys.
    pub fn encode_protobuf(&self) -> Vec<u8> {
        KeyEnvelope::from_key(&self.0).encode_to_vec()
    }
}

/// Serializes keys to and from their byte envelope, validating on decode.
#[derive(Clone)]
pub struct KeyMarshaller {
    validator: Arc<dyn KeyValidator>,
}

impl KeyMarshaller {
    pub fn new(validator: Arc<dyn KeyValidator>) -> Self {
        Self { validator }
    }

    pub fn marshal_public_key(&self, key: &PublicKey) -> Vec<u8> {
        key.encode_protobuf()
    }

    pub fn marshal_private_key(&self, key: &PrivateKey) -> Vec<u8> {
        KeyEnvelope::from_key(&key.0).encode_to_vec()
    }

    pub fn unmarshal_public_key(&self, bytes: &[u8]) -> Result<PublicKey, KeyError> {
        let key = PublicKey(decode_envelope(bytes)?);
        self.validator.validate_public(&key)?;
        Ok(key)
    }

    pub fn unmarshal_private_key(&self, bytes: &[u8]) -> Result<PrivateKey, KeyError> {
        let key = PrivateKey(decode_envelope(bytes)?);
        self.validator.validate_private(&key)?;
        Ok(key)
    }

    /// Validator used on unmarshal.
    pub fn validator(&self) -> &dyn KeyValidator {
        self.validator.as_ref()
    }
}

impl Default for KeyMarshaller {
    fn default() -> Self {
        Self::new(Arc::new(DefaultKeyValidator))
    }
}

impl std::fmt::Debug for KeyMarshaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMarshaller").finish_non_exhaustive()
    }
}

fn decode_envelope(bytes: &[u8]) -> Result<Key, KeyError> {
    KeyEnvelope::decode(bytes)
        .map_err(|_| KeyError::FailedUnmarshalData)?
        .into_key()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn test_public_key_roundtrip() {
        let marshaller = KeyMarshaller::default();
        let pair = KeyPair::generate_ed25519();

        let bytes = marshaller.marshal_public_key(&pair.public);
        assert_eq!(marshaller.unmarshal_public_key(&bytes).unwrap(), pair.public);
    }

    #[test]
    fn test_private_key_roundtrip() {
        let marshaller = KeyMarshaller::default();
        let pair = KeyPair::generate_ed25519();

        let bytes = marshaller.marshal_private_key(&pair.private);
        assert_eq!(
            marshaller.unmarshal_private_key(&bytes).unwrap(),
            pair.private
        );
    }

    #[test]
    fn test_envelope_layout() {
        let key = PublicKey::new(KeyType::Ed25519, [9u8; 32]);
        let bytes = key.encode_protobuf();

        // field 1 varint, field 2 length-delimited
        assert_eq!(&bytes[..4], &[0x08, 0x01, 0x12, 32]);
        assert_eq!(&bytes[4..], &[9u8; 32]);
    }

    #[test]
    fn test_unknown_key_type() {
        let envelope = KeyEnvelope {
            key_type: 3,
            data: vec![1; 32],
        };
        let marshaller = KeyMarshaller::default();
        assert_eq!(
            marshaller.unmarshal_public_key(&envelope.encode_to_vec()),
            Err(KeyError::UnknownKeyType)
        );
    }

    #[test]
    fn test_garbage_and_invalid_data() {
        let marshaller = KeyMarshaller::default();
        assert_eq!(
            marshaller.unmarshal_public_key(&[0xFF, 0xFF, 0xFF]),
            Err(KeyError::FailedUnmarshalData)
        );

        let short = PublicKey::new(KeyType::Ed25519, [1u8; 5]).encode_protobuf();
        assert_eq!(
            marshaller.unmarshal_public_key(&short),
            Err(KeyError::FailedUnmarshalData)
        );
    }

    #[test]
    fn test_custom_validator_is_used() {
        struct RejectAll;
        impl KeyValidator for RejectAll {
            fn validate_public(&self, _: &PublicKey) -> Result<(), KeyError> {
                Err(KeyError::FailedUnmarshalData)
            }
            fn validate_private(&self, _: &PrivateKey) -> Result<(), KeyError> {
                Err(KeyError::FailedUnmarshalData)
            }
        }

        let marshaller = KeyMarshaller::new(Arc::new(RejectAll));
        let key = KeyPair::generate_ed25519().public;
        let bytes = marshaller.marshal_public_key(&key);
        assert!(marshaller.unmarshal_public_key(&bytes).is_err());
    }
}
