//! `/plaintext/2.0.0`: identity exchange without encryption.
//!
//! Both sides send `u32 BE length || Exchange` and read the peer's message
//! concurrently. The received peer id must be the one derived from the
//! received key, and on the dialing side also the one that was dialed.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{
    ExchangeMessage, ExchangeMessageMarshaller, SecureConnection, SecurityAdaptor,
};
use crate::crypto::{KeyMarshaller, PublicKey};
use crate::error::{HandshakeError, Result};
use crate::peer::{IdentityManager, PeerId};
use crate::transport::{BoxFuture, BoxedConnection};

/// Protocol id negotiated for this handshake.
pub const PLAINTEXT_PROTOCOL_ID: &str = "/plaintext/2.0.0";

/// Largest exchange message accepted from a peer (64 KiB).
pub const MAX_EXCHANGE_MESSAGE_SIZE: usize = 64 * 1024;

/// Plaintext security adaptor.
#[derive(Debug, Clone)]
pub struct Plaintext {
    identity: IdentityManager,
    marshaller: ExchangeMessageMarshaller,
}

impl Plaintext {
    pub fn new(identity: IdentityManager, keys: KeyMarshaller) -> Self {
        Self {
            identity,
            marshaller: ExchangeMessageMarshaller::new(keys),
        }
    }

    /// Listener side: accept whichever identity the peer proves.
    pub async fn secure_inbound(&self, conn: BoxedConnection) -> Result<SecureConnection> {
        self.handshake(conn, None).await
    }

    /// Dialer side: the peer must prove it is `remote_peer`.
    ///
    /// Fails with [`HandshakeError::EmptyPeerId`] when no id is given.
    pub async fn secure_outbound(
        &self,
        mut conn: BoxedConnection,
        remote_peer: Option<PeerId>,
    ) -> Result<SecureConnection> {
        match remote_peer {
            Some(expected) => self.handshake(conn, Some(&expected)).await,
            None => {
                tracing::warn!("outbound plaintext handshake without a remote peer id");
                let _ = conn.shutdown().await;
                Err(HandshakeError::EmptyPeerId.into())
            }
        }
    }

    async fn handshake(
        &self,
        mut conn: BoxedConnection,
        expected: Option<&PeerId>,
    ) -> Result<SecureConnection> {
        match self.exchange(&mut conn, expected).await {
            Ok(remote_key) => {
                let secure =
                    SecureConnection::new(self.identity.public_key().clone(), remote_key, conn);
                tracing::debug!(remote_peer = %secure.remote_peer(), "plaintext handshake complete");
                Ok(secure)
            }
            Err(err) => {
                tracing::warn!(error = %err, "plaintext handshake failed");
                // Best effort; the handshake error is what matters.
                let _ = conn.shutdown().await;
                Err(err.into())
            }
        }
    }

    async fn exchange(
        &self,
        conn: &mut BoxedConnection,
        expected: Option<&PeerId>,
    ) -> std::result::Result<PublicKey, HandshakeError> {
        let local = ExchangeMessage::for_key(self.identity.public_key().clone());
        let outgoing = self.marshaller.marshal(&local);

        let (mut reader, mut writer) = tokio::io::split(conn);
        let send = async {
            write_length_prefixed(&mut writer, &outgoing)
                .await
                .map_err(|e| {
                    tracing::debug!(error = %e, "failed to send exchange message");
                    HandshakeError::ExchangeSend
                })
        };
        let receive = async {
            let bytes = read_length_prefixed(&mut reader).await?;
            self.marshaller.unmarshal(&bytes)
        };
        let ((), remote) = tokio::try_join!(send, receive)?;

        let derived = PeerId::from_public_key(&remote.pubkey);
        if derived != remote.peer_id {
            tracing::warn!(claimed = %remote.peer_id, %derived, "peer id does not match public key");
            return Err(HandshakeError::InvalidPeerId);
        }
        if let Some(expected) = expected {
            if *expected != derived {
                tracing::warn!(%expected, actual = %derived, "connected to an unexpected peer");
                return Err(HandshakeError::InvalidPeerId);
            }
        }

        Ok(remote.pubkey)
    }
}

async fn write_length_prefixed<W>(writer: &mut W, msg: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&(msg.len() as u32).to_be_bytes()).await?;
    writer.write_all(msg).await?;
    writer.flush().await
}

async fn read_length_prefixed<R>(reader: &mut R) -> std::result::Result<Vec<u8>, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let receive_failed = |e: std::io::Error| {
        tracing::debug!(error = %e, "failed to read exchange message");
        HandshakeError::ExchangeReceive
    };

    let mut len = [0u8; 4];
    reader.read_exact(&mut len).await.map_err(receive_failed)?;
    let len = u32::from_be_bytes(len) as usize;
    if len > MAX_EXCHANGE_MESSAGE_SIZE {
        tracing::debug!(len, "exchange message too large");
        return Err(HandshakeError::ExchangeReceive);
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(receive_failed)?;
    Ok(buf)
}

impl SecurityAdaptor for Plaintext {
    fn protocol_id(&self) -> &str {
        PLAINTEXT_PROTOCOL_ID
    }

    fn local_peer(&self) -> &PeerId {
        self.identity.peer_id()
    }

    fn secure_inbound(&self, conn: BoxedConnection) -> BoxFuture<'_, Result<SecureConnection>> {
        Box::pin(Plaintext::secure_inbound(self, conn))
    }

    fn secure_outbound(
        &self,
        conn: BoxedConnection,
        remote_peer: Option<PeerId>,
    ) -> BoxFuture<'_, Result<SecureConnection>> {
        Box::pin(Plaintext::secure_outbound(self, conn, remote_peer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PeerwireError;
    use tokio::io::duplex;

    fn plaintext() -> Plaintext {
        Plaintext::new(IdentityManager::generate_ed25519(), KeyMarshaller::default())
    }

    #[tokio::test]
    async fn test_handshake_both_sides() {
        let (a, b) = duplex(4096);
        let dialer = plaintext();
        let listener = plaintext();
        let listener_id = listener.identity.peer_id().clone();

        let (out, inb) = tokio::join!(
            dialer.secure_outbound(Box::new(a), Some(listener_id.clone())),
            listener.secure_inbound(Box::new(b)),
        );
        let out = out.unwrap();
        let inb = inb.unwrap();

        assert_eq!(out.remote_peer(), &listener_id);
        assert_eq!(inb.remote_peer(), dialer.identity.peer_id());
        assert_eq!(out.local_peer(), inb.remote_peer());
        assert_eq!(inb.remote_public_key(), dialer.identity.public_key());
    }

    #[tokio::test]
    async fn test_unexpected_peer_is_rejected() {
        let (a, b) = duplex(4096);
        let dialer = plaintext();
        let listener = plaintext();

        let (out, _inb) = tokio::join!(
            dialer.secure_outbound(Box::new(a), Some(PeerId::random())),
            listener.secure_inbound(Box::new(b)),
        );
        assert!(matches!(
            out,
            Err(PeerwireError::Handshake(HandshakeError::InvalidPeerId))
        ));
    }

    #[tokio::test]
    async fn test_missing_expected_peer() {
        let (a, _b) = duplex(64);
        let result = plaintext().secure_outbound(Box::new(a), None).await;
        assert!(matches!(
            result,
            Err(PeerwireError::Handshake(HandshakeError::EmptyPeerId))
        ));
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let (a, mut b) = duplex(4096);
        let listener = plaintext();

        let attacker = async {
            b.write_all(&(MAX_EXCHANGE_MESSAGE_SIZE as u32 + 1).to_be_bytes())
                .await
                .unwrap();
            b
        };
        let (result, _b) = tokio::join!(listener.secure_inbound(Box::new(a)), attacker);
        assert!(matches!(
            result,
            Err(PeerwireError::Handshake(HandshakeError::ExchangeReceive))
        ));
    }

    #[tokio::test]
    async fn test_closed_connection_fails_receive() {
        let (a, b) = duplex(4096);
        drop(b);
        let result = plaintext().secure_inbound(Box::new(a)).await;
        assert!(matches!(
            result,
            Err(PeerwireError::Handshake(
                HandshakeError::ExchangeSend | HandshakeError::ExchangeReceive
            ))
        ));
    }
}
