//! Typed key material.

use std::fmt;

/// Algorithm of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Rsa,
    Ed25519,
    Secp256k1,
}

impl KeyType {
    /// Discriminant used in the marshalled envelope.
    pub fn to_wire(self) -> i32 {
        match self {
            Self::Rsa => 0,
            Self::Ed25519 => 1,
            Self::Secp256k1 => 2,
        }
    }

    /// Parse an envelope discriminant.
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            0 => Some(Self::Rsa),
            1 => Some(Self::Ed25519),
            2 => Some(Self::Secp256k1),
            _ => None,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rsa => "RSA",
            Self::Ed25519 => "Ed25519",
            Self::Secp256k1 => "Secp256k1",
        })
    }
}

/// Key type plus raw key bytes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key {
    pub key_type: KeyType,
    pub data: Vec<u8>,
}

impl Key {
    pub fn new(key_type: KeyType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            key_type,
            data: data.into(),
        }
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("key_type", &self.key_type)
            .field("len", &self.data.len())
            .finish()
    }
}

/// A public key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(pub Key);

/// A private key. Its bytes are never printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKey(pub Key);

impl PublicKey {
    pub fn new(key_type: KeyType, data: impl Into<Vec<u8>>) -> Self {
        Self(Key::new(key_type, data))
    }

    #[inline]
    pub fn key_type(&self) -> KeyType {
        self.0.key_type
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.0.data
    }
}

impl PrivateKey {
    pub fn new(key_type: KeyType, data: impl Into<Vec<u8>>) -> Self {
        Self(Key::new(key_type, data))
    }

    #[inline]
    pub fn key_type(&self) -> KeyType {
        self.0.key_type
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.0.data
    }
}

/// A public/private key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

impl KeyPair {
    /// Generate a fresh Ed25519 key pair from the OS RNG.
    pub fn generate_ed25519() -> Self {
        let signing = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        Self {
            public: PublicKey::new(KeyType::Ed25519, signing.verifying_key().to_bytes()),
            private: PrivateKey::new(KeyType::Ed25519, signing.to_bytes()),
        }
    }
}
