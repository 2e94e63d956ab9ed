//! Security module - secure channel handshakes.
//!
//! A [`SecurityAdaptor`] turns a raw connection into a [`SecureConnection`]
//! whose remote identity is verified. [`Plaintext`] is the only adaptor
//! shipped here; it authenticates identities without encrypting traffic.

mod connection;
mod exchange;
mod plaintext;

pub use connection::SecureConnection;
pub use exchange::{ExchangeMessage, ExchangeMessageMarshaller};
pub use plaintext::{Plaintext, MAX_EXCHANGE_MESSAGE_SIZE, PLAINTEXT_PROTOCOL_ID};

use crate::error::Result;
use crate::peer::PeerId;
use crate::transport::{BoxFuture, BoxedConnection};

/// A negotiable secure channel protocol.
///
/// Implementations close the connection before returning an error.
pub trait SecurityAdaptor: Send + Sync {
    /// Protocol id offered during negotiation.
    fn protocol_id(&self) -> &str;

    /// Id of the local peer this adaptor authenticates as.
    fn local_peer(&self) -> &PeerId;

    fn secure_inbound(&self, conn: BoxedConnection) -> BoxFuture<'_, Result<SecureConnection>>;

    fn secure_outbound(
        &self,
        conn: BoxedConnection,
        remote_peer: Option<PeerId>,
    ) -> BoxFuture<'_, Result<SecureConnection>>;
}
