//! Peer identifiers.
//!
//! A [`PeerId`] is a multihash of the marshalled public key. Short encodings
//! (Ed25519, compressed Secp256k1) are embedded verbatim with the identity
//! hash; longer ones (RSA) are hashed with SHA-256.

use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::crypto::PublicKey;

/// Multihash code of the identity hash.
const IDENTITY_CODE: u8 = 0x00;
/// Multihash code of SHA2-256.
const SHA256_CODE: u8 = 0x12;
const SHA256_DIGEST_LEN: usize = 32;
/// Largest key encoding inlined with the identity hash.
pub const MAX_INLINE_KEY_LENGTH: usize = 42;

/// Failure to parse a peer id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParsePeerIdError {
    #[error("invalid base58 encoding")]
    Base58,

    #[error("unsupported multihash code {0:#04x}")]
    UnsupportedCode(u8),

    #[error("malformed multihash")]
    Malformed,
}

/// Address-independent identity of a peer.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId {
    multihash: Vec<u8>,
}

impl PeerId {
    /// Derive the peer id of a public key.
    pub fn from_public_key(key: &PublicKey) -> Self {
        let encoded = key.encode_protobuf();

        let multihash = if encoded.len() <= MAX_INLINE_KEY_LENGTH {
            let mut out = Vec::with_capacity(2 + encoded.len());
            out.push(IDENTITY_CODE);
            out.push(encoded.len() as u8);
            out.extend_from_slice(&encoded);
            out
        } else {
            sha256_multihash(&encoded)
        };

        Self { multihash }
    }

    /// Parse a binary multihash.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParsePeerIdError> {
        let [code, len, digest @ ..] = bytes else {
            return Err(ParsePeerIdError::Malformed);
        };
        // Single byte lengths only; both supported digests fit.
        if *len >= 0x80 || digest.len() != *len as usize {
            return Err(ParsePeerIdError::Malformed);
        }

        match *code {
            IDENTITY_CODE if digest.len() <= MAX_INLINE_KEY_LENGTH => {}
            SHA256_CODE if digest.len() == SHA256_DIGEST_LEN => {}
            IDENTITY_CODE | SHA256_CODE => return Err(ParsePeerIdError::Malformed),
            other => return Err(ParsePeerIdError::UnsupportedCode(other)),
        }

        Ok(Self {
            multihash: bytes.to_vec(),
        })
    }

    /// A peer id not tied to any key.
    pub fn random() -> Self {
        let mut seed = [0u8; SHA256_DIGEST_LEN];
        rand::thread_rng().fill_bytes(&mut seed);
        Self {
            multihash: sha256_multihash(&seed),
        }
    }

    /// Binary multihash form.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.multihash
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.multihash
    }

    /// Base58btc form, e.g. `12D3KooW...` for Ed25519 keys.
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.multihash).into_string()
    }

    /// Whether this id was derived from `key`.
    pub fn is_public_key(&self, key: &PublicKey) -> bool {
        *self == Self::from_public_key(key)
    }
}

fn sha256_multihash(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + SHA256_DIGEST_LEN);
    out.push(SHA256_CODE);
    out.push(SHA256_DIGEST_LEN as u8);
    out.extend_from_slice(&Sha256::digest(data));
    out
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerId").field(&self.to_base58()).finish()
    }
}

impl FromStr for PeerId {
    type Err = ParsePeerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|_| ParsePeerIdError::Base58)?;
        Self::from_bytes(&bytes)
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
