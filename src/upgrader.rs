//! Connection upgrade pipeline.
//!
//! The [`UpgraderBuilder`] provides a fluent API for choosing the
//! negotiator, security and muxer protocols. The [`Upgrader`] runs the same
//! sequence on every raw connection:
//! 1. Negotiate a security protocol
//! 2. Run its handshake to verify the remote peer
//! 3. Negotiate a muxer over the secured connection
//! 4. Start a session
//!
//! A failure at any stage closes the connection; callers only ever see a
//! fully upgraded connection.
//!
//! # Example
//!
//! ```no_run
//! use peerwire::{IdentityManager, KeyMarshaller, Plaintext, Upgrader, Yamux};
//!
//! # async fn run(socket: tokio::net::TcpStream) -> peerwire::Result<()> {
//! let identity = IdentityManager::generate_ed25519();
//! let upgrader = Upgrader::builder()
//!     .security(Plaintext::new(identity, KeyMarshaller::default()))
//!     .muxer(Yamux::default())
//!     .build()?;
//!
//! let upgraded = upgrader.upgrade_inbound(Box::new(socket)).await?;
//! let _stream = upgraded.session.accept_stream().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use crate::crypto::PublicKey;
use crate::error::{PeerwireError, Result};
use crate::muxer::{MuxerAdaptor, Session};
use crate::negotiation::{Multiselect, Negotiator};
use crate::peer::PeerId;
use crate::security::SecurityAdaptor;
use crate::transport::{BoxedConnection, Role};

/// Builder for configuring an [`Upgrader`].
///
/// Adaptors are offered in the order they are added.
pub struct UpgraderBuilder {
    negotiator: Arc<dyn Negotiator>,
    security: Vec<Arc<dyn SecurityAdaptor>>,
    muxers: Vec<Arc<dyn MuxerAdaptor>>,
}

impl UpgraderBuilder {
    /// Create a builder using multistream-select and no adaptors.
    pub fn new() -> Self {
        Self {
            negotiator: Arc::new(Multiselect::new()),
            security: Vec::new(),
            muxers: Vec::new(),
        }
    }

    /// Replace the protocol negotiator.
    pub fn negotiator(mut self, negotiator: impl Negotiator + 'static) -> Self {
        self.negotiator = Arc::new(negotiator);
        self
    }

    /// Add a security protocol.
    pub fn security(mut self, adaptor: impl SecurityAdaptor + 'static) -> Self {
        self.security.push(Arc::new(adaptor));
        self
    }

    /// Add a stream multiplexer.
    pub fn muxer(mut self, adaptor: impl MuxerAdaptor + 'static) -> Self {
        self.muxers.push(Arc::new(adaptor));
        self
    }

    /// Build the upgrader. At least one security and one muxer adaptor are
    /// required.
    pub fn build(self) -> Result<Upgrader> {
        if self.security.is_empty() {
            return Err(PeerwireError::Negotiation(
                "no security protocol configured".into(),
            ));
        }
        if self.muxers.is_empty() {
            return Err(PeerwireError::Negotiation("no muxer configured".into()));
        }

        Ok(Upgrader {
            security_ids: self
                .security
                .iter()
                .map(|a| a.protocol_id().to_owned())
                .collect(),
            muxer_ids: self
                .muxers
                .iter()
                .map(|a| a.protocol_id().to_owned())
                .collect(),
            negotiator: self.negotiator,
            security: self.security,
            muxers: self.muxers,
        })
    }
}

impl Default for UpgraderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A connection that went through the whole upgrade.
#[derive(Debug)]
pub struct Upgraded {
    pub session: Session,
    pub remote_peer: PeerId,
    pub remote_public_key: PublicKey,
    /// Negotiated security protocol id.
    pub security_protocol: String,
    /// Negotiated muxer protocol id.
    pub muxer_protocol: String,
}

/// Runs negotiation, security and multiplexing on raw connections.
///
/// Cheap to share behind an `Arc`; upgrades are independent of each other.
pub struct Upgrader {
    negotiator: Arc<dyn Negotiator>,
    security: Vec<Arc<dyn SecurityAdaptor>>,
    security_ids: Vec<String>,
    muxers: Vec<Arc<dyn MuxerAdaptor>>,
    muxer_ids: Vec<String>,
}

impl Upgrader {
    /// Create a new upgrader builder.
    pub fn builder() -> UpgraderBuilder {
        UpgraderBuilder::new()
    }

    /// Upgrade a connection we accepted.
    pub async fn upgrade_inbound(&self, conn: BoxedConnection) -> Result<Upgraded> {
        self.upgrade(conn, Role::Listener, None).await
    }

    /// Upgrade a connection we dialed to `remote_peer`.
    pub async fn upgrade_outbound(
        &self,
        conn: BoxedConnection,
        remote_peer: PeerId,
    ) -> Result<Upgraded> {
        self.upgrade(conn, Role::Dialer, Some(remote_peer)).await
    }

    /// Upgrade `conn` as `role`.
    ///
    /// `remote_peer` is the identity the dialer expects; listeners pass
    /// `None` and learn the identity from the handshake.
    pub async fn upgrade(
        &self,
        mut conn: BoxedConnection,
        role: Role,
        remote_peer: Option<PeerId>,
    ) -> Result<Upgraded> {
        // 1. Security negotiation
        let security_protocol = match self
            .negotiator
            .select_protocol(&mut *conn, role, &self.security_ids)
            .await
        {
            Ok(protocol) => protocol,
            Err(err) => return Err(abort(conn, "security negotiation", err).await),
        };
        let adaptor = match self.security_adaptor(&security_protocol) {
            Ok(adaptor) => adaptor,
            Err(err) => return Err(abort(conn, "security negotiation", err).await),
        };

        // 2. Handshake; the adaptor closes the connection on failure
        let mut secure = match role {
            Role::Dialer => adaptor.secure_outbound(conn, remote_peer).await,
            Role::Listener => adaptor.secure_inbound(conn).await,
        }?;

        // 3. Muxer negotiation
        let muxer_protocol = match self
            .negotiator
            .select_protocol(&mut secure, role, &self.muxer_ids)
            .await
        {
            Ok(protocol) => protocol,
            Err(err) => return Err(abort(secure, "muxer negotiation", err).await),
        };
        let muxer = match self.muxer_adaptor(&muxer_protocol) {
            Ok(muxer) => muxer,
            Err(err) => return Err(abort(secure, "muxer negotiation", err).await),
        };

        // 4. Session
        let remote_peer = secure.remote_peer().clone();
        let remote_public_key = secure.remote_public_key().clone();
        let session = muxer.new_session(Box::new(secure), role);

        tracing::debug!(
            %role,
            %remote_peer,
            security = %security_protocol,
            muxer = %muxer_protocol,
            "connection upgraded"
        );

        Ok(Upgraded {
            session,
            remote_peer,
            remote_public_key,
            security_protocol,
            muxer_protocol,
        })
    }

    fn security_adaptor(&self, protocol: &str) -> Result<&Arc<dyn SecurityAdaptor>> {
        self.security
            .iter()
            .find(|a| a.protocol_id() == protocol)
            .ok_or_else(|| {
                PeerwireError::Negotiation(format!("no security adaptor for {protocol}"))
            })
    }

    fn muxer_adaptor(&self, protocol: &str) -> Result<&Arc<dyn MuxerAdaptor>> {
        self.muxers
            .iter()
            .find(|a| a.protocol_id() == protocol)
            .ok_or_else(|| PeerwireError::Negotiation(format!("no muxer adaptor for {protocol}")))
    }
}

impl std::fmt::Debug for Upgrader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upgrader")
            .field("security", &self.security_ids)
            .field("muxers", &self.muxer_ids)
            .finish()
    }
}

/// Close a partially upgraded connection and pass the error through.
async fn abort<C>(mut conn: C, stage: &str, err: PeerwireError) -> PeerwireError
where
    C: tokio::io::AsyncWrite + Unpin,
{
    tracing::warn!(stage, error = %err, "connection upgrade failed");
    let _ = conn.shutdown().await;
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyMarshaller;
    use crate::muxer::{SessionConfig, Yamux};
    use crate::peer::IdentityManager;
    use crate::security::Plaintext;
    use tokio::io::duplex;

    fn upgrader(identity: IdentityManager) -> Upgrader {
        Upgrader::builder()
            .security(Plaintext::new(identity, KeyMarshaller::default()))
            .muxer(Yamux::new(
                SessionConfig::default().with_keep_alive_interval(None),
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_adaptors() {
        assert!(matches!(
            Upgrader::builder().build(),
            Err(PeerwireError::Negotiation(_))
        ));

        let only_security = Upgrader::builder()
            .security(Plaintext::new(
                IdentityManager::generate_ed25519(),
                KeyMarshaller::default(),
            ))
            .build();
        assert!(only_security.is_err());
    }

    #[tokio::test]
    async fn test_upgrade_both_sides() {
        let dialer_identity = IdentityManager::generate_ed25519();
        let listener_identity = IdentityManager::generate_ed25519();
        let listener_id = listener_identity.peer_id().clone();

        let dialer = upgrader(dialer_identity.clone());
        let listener = upgrader(listener_identity);

        let (a, b) = duplex(64 * 1024);
        let (out, inb) = tokio::join!(
            dialer.upgrade_outbound(Box::new(a), listener_id.clone()),
            listener.upgrade_inbound(Box::new(b)),
        );
        let out = out.unwrap();
        let inb = inb.unwrap();

        assert_eq!(out.remote_peer, listener_id);
        assert_eq!(&inb.remote_peer, dialer_identity.peer_id());
        assert_eq!(out.security_protocol, "/plaintext/2.0.0");
        assert_eq!(inb.muxer_protocol, "/yamux/1.0.0");
        assert_eq!(out.session.role(), Role::Dialer);
        assert_eq!(inb.session.role(), Role::Listener);
    }

    #[tokio::test]
    async fn test_wrong_peer_aborts_upgrade() {
        let dialer = upgrader(IdentityManager::generate_ed25519());
        let listener = upgrader(IdentityManager::generate_ed25519());

        let (a, b) = duplex(64 * 1024);
        let (out, inb) = tokio::join!(
            dialer.upgrade_outbound(Box::new(a), PeerId::random()),
            listener.upgrade_inbound(Box::new(b)),
        );
        assert!(matches!(
            out,
            Err(PeerwireError::Handshake(
                crate::error::HandshakeError::InvalidPeerId
            ))
        ));
        // The listener never gets a session either.
        assert!(inb.is_err());
    }
}
