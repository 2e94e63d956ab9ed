//! Local identity provider.

use crate::crypto::{KeyPair, KeyValidator, PublicKey};
use crate::error::KeyError;

use super::PeerId;

/// Holds the local key pair and the peer id derived from it.
#[derive(Debug, Clone)]
pub struct IdentityManager {
    key_pair: KeyPair,
    peer_id: PeerId,
}

impl IdentityManager {
    /// Wrap an existing key pair after validating it.
    pub fn new(key_pair: KeyPair, validator: &dyn KeyValidator) -> Result<Self, KeyError> {
        validator.validate_keypair(&key_pair)?;
        let peer_id = PeerId::from_public_key(&key_pair.public);
        tracing::debug!(%peer_id, key_type = %key_pair.public.key_type(), "loaded identity");
        Ok(Self { key_pair, peer_id })
    }

    /// Fresh Ed25519 identity.
    pub fn generate_ed25519() -> Self {
        let key_pair = KeyPair::generate_ed25519();
        let peer_id = PeerId::from_public_key(&key_pair.public);
        Self { key_pair, peer_id }
    }

    #[inline]
    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    #[inline]
    pub fn public_key(&self) -> &PublicKey {
        &self.key_pair.public
    }

    #[inline]
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }
}
