//! Structural validation of key material.
//!
//! Validation only checks that bytes have the right shape for their key
//! type (length, prefix, DER tag). It does not decompress curve points, so
//! a flipped byte in an otherwise well-formed key still passes here and is
//! caught later by peer id verification.

use ed25519_dalek::SigningKey;

use super::key::{KeyPair, KeyType, PrivateKey, PublicKey};
use crate::error::KeyError;

const ED25519_KEY_LEN: usize = 32;
const SECP256K1_PRIVATE_LEN: usize = 32;
const SECP256K1_COMPRESSED_LEN: usize = 33;
const SECP256K1_UNCOMPRESSED_LEN: usize = 65;
const DER_SEQUENCE_TAG: u8 = 0x30;

/// Pluggable key validation used by the key marshaller.
pub trait KeyValidator: Send + Sync {
    fn validate_public(&self, key: &PublicKey) -> Result<(), KeyError>;

    fn validate_private(&self, key: &PrivateKey) -> Result<(), KeyError>;

    /// Validate both halves and check they belong together.
    fn validate_keypair(&self, pair: &KeyPair) -> Result<(), KeyError> {
        validate_halves(self, pair)
    }
}

/// Validate each half of `pair` with `validator` and check the types match.
fn validate_halves<V>(validator: &V, pair: &KeyPair) -> Result<(), KeyError>
where
    V: KeyValidator + ?Sized,
{
    validator.validate_public(&pair.public)?;
    validator.validate_private(&pair.private)?;
    if pair.public.key_type() != pair.private.key_type() {
        return Err(KeyError::KeyPairMismatch);
    }
    Ok(())
}

/// Validator for the three supported key types.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultKeyValidator;

impl DefaultKeyValidator {
    fn check_rsa(data: &[u8]) -> Result<(), KeyError> {
        match data {
            [DER_SEQUENCE_TAG, _, ..] => Ok(()),
            _ => Err(KeyError::FailedUnmarshalData),
        }
    }
}

impl KeyValidator for DefaultKeyValidator {
    fn validate_public(&self, key: &PublicKey) -> Result<(), KeyError> {
        let data = key.data();
        match key.key_type() {
            KeyType::Rsa => Self::check_rsa(data),
            KeyType::Ed25519 if data.len() == ED25519_KEY_LEN => Ok(()),
            KeyType::Secp256k1 => match (data.len(), data.first()) {
                (SECP256K1_COMPRESSED_LEN, Some(0x02 | 0x03)) => Ok(()),
                (SECP256K1_UNCOMPRESSED_LEN, Some(0x04)) => Ok(()),
                _ => Err(KeyError::FailedUnmarshalData),
            },
            KeyType::Ed25519 => Err(KeyError::FailedUnmarshalData),
        }
    }

    fn validate_private(&self, key: &PrivateKey) -> Result<(), KeyError> {
        let data = key.data();
        match key.key_type() {
            KeyType::Rsa => Self::check_rsa(data),
            KeyType::Ed25519 if data.len() == ED25519_KEY_LEN => Ok(()),
            KeyType::Secp256k1 if data.len() == SECP256K1_PRIVATE_LEN => Ok(()),
            KeyType::Ed25519 | KeyType::Secp256k1 => Err(KeyError::FailedUnmarshalData),
        }
    }

    fn validate_keypair(&self, pair: &KeyPair) -> Result<(), KeyError> {
        validate_halves(self, pair)?;

        if pair.private.key_type() == KeyType::Ed25519 {
            let secret: [u8; ED25519_KEY_LEN] = pair
                .private
                .data()
                .try_into()
                .map_err(|_| KeyError::FailedUnmarshalData)?;
            let derived = SigningKey::from_bytes(&secret).verifying_key();
            if derived.as_bytes() != pair.public.data() {
                return Err(KeyError::KeyPairMismatch);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_lengths() {
        let v = DefaultKeyValidator;
        assert!(v
            .validate_public(&PublicKey::new(KeyType::Ed25519, [1u8; 32]))
            .is_ok());
        assert_eq!(
            v.validate_public(&PublicKey::new(KeyType::Ed25519, [1u8; 31])),
            Err(KeyError::FailedUnmarshalData)
        );
        assert_eq!(
            v.validate_private(&PrivateKey::new(KeyType::Ed25519, [1u8; 64])),
            Err(KeyError::FailedUnmarshalData)
        );
    }

    #[test]
    fn test_secp256k1_shapes() {
        let v = DefaultKeyValidator;
        let mut compressed = vec![0x02];
        compressed.extend([7u8; 32]);
        assert!(v
            .validate_public(&PublicKey::new(KeyType::Secp256k1, compressed.clone()))
            .is_ok());

        compressed[0] = 0x05;
        assert!(v
            .validate_public(&PublicKey::new(KeyType::Secp256k1, compressed))
            .is_err());

        let mut uncompressed = vec![0x04];
        uncompressed.extend([7u8; 64]);
        assert!(v
            .validate_public(&PublicKey::new(KeyType::Secp256k1, uncompressed))
            .is_ok());
    }

    #[test]
    fn test_rsa_requires_der_sequence() {
        let v = DefaultKeyValidator;
        assert!(v
            .validate_public(&PublicKey::new(KeyType::Rsa, vec![0x30, 0x82, 0x01]))
            .is_ok());
        assert!(v
            .validate_public(&PublicKey::new(KeyType::Rsa, vec![0x31, 0x82]))
            .is_err());
        assert!(v
            .validate_private(&PrivateKey::new(KeyType::Rsa, Vec::new()))
            .is_err());
    }

    #[test]
    fn test_keypair_validation() {
        let v = DefaultKeyValidator;
        let pair = KeyPair::generate_ed25519();
        assert!(v.validate_keypair(&pair).is_ok());

        let other = KeyPair::generate_ed25519();
        let mixed = KeyPair {
            public: other.public,
            private: pair.private.clone(),
        };
        assert_eq!(v.validate_keypair(&mixed), Err(KeyError::KeyPairMismatch));

        let mut secp_public = vec![0x03];
        secp_public.extend([1u8; 32]);
        let wrong_type = KeyPair {
            public: PublicKey::new(KeyType::Secp256k1, secp_public),
            private: pair.private,
        };
        assert_eq!(
            v.validate_keypair(&wrong_type),
            Err(KeyError::KeyPairMismatch)
        );
    }

    /// Accepts any key bytes; relies on the default keypair check.
    struct LenientValidator;

    impl KeyValidator for LenientValidator {
        fn validate_public(&self, _key: &PublicKey) -> Result<(), KeyError> {
            Ok(())
        }

        fn validate_private(&self, _key: &PrivateKey) -> Result<(), KeyError> {
            Ok(())
        }
    }

    #[test]
    fn test_default_keypair_check_compares_types() {
        let v = LenientValidator;
        let pair = KeyPair {
            public: PublicKey::new(KeyType::Rsa, vec![1u8]),
            private: PrivateKey::new(KeyType::Rsa, vec![2u8]),
        };
        assert!(v.validate_keypair(&pair).is_ok());

        let mismatched = KeyPair {
            public: PublicKey::new(KeyType::Secp256k1, vec![1u8]),
            private: PrivateKey::new(KeyType::Rsa, vec![2u8]),
        };
        assert_eq!(
            v.validate_keypair(&mismatched),
            Err(KeyError::KeyPairMismatch)
        );
    }
}
