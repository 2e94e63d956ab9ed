//! Peer identity: [`PeerId`] derivation and the local [`IdentityManager`].

mod identity;
mod peer_id;

pub use identity::IdentityManager;
pub use peer_id::{ParsePeerIdError, PeerId, MAX_INLINE_KEY_LENGTH};
