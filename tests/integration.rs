//! Integration tests for peerwire.
//!
//! These tests drive two peers over in-memory pipes through the public API:
//! upgrade, multiplexing, flow control and routing.

use peerwire::protocol::{decode, flags, Decoded, FrameType, HEADER_SIZE};
use peerwire::security::{ExchangeMessage, ExchangeMessageMarshaller};
use peerwire::{
    open_protocol_stream, HandshakeError, IdentityManager, KeyMarshaller, KeyType, Multiselect,
    PeerwireError, Plaintext, PublicKey, Role, Router, Session, SessionConfig, Upgraded,
    Upgrader, Yamux,
};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

fn quiet_config() -> SessionConfig {
    SessionConfig::default().with_keep_alive_interval(None)
}

fn upgrader(identity: IdentityManager, config: SessionConfig) -> Upgrader {
    Upgrader::builder()
        .security(Plaintext::new(identity, KeyMarshaller::default()))
        .muxer(Yamux::new(config))
        .build()
        .unwrap()
}

/// Upgrade both ends of a fresh pipe; returns (dialer, listener).
async fn connected_pair(config: SessionConfig) -> (Upgraded, Upgraded) {
    let dialer_identity = IdentityManager::generate_ed25519();
    let listener_identity = IdentityManager::generate_ed25519();
    let listener_id = listener_identity.peer_id().clone();

    let dialer = upgrader(dialer_identity, config.clone());
    let listener = upgrader(listener_identity, config);

    let (a, b) = duplex(64 * 1024);
    let (out, inb) = tokio::join!(
        dialer.upgrade_outbound(Box::new(a), listener_id),
        listener.upgrade_inbound(Box::new(b)),
    );
    (out.unwrap(), inb.unwrap())
}

async fn read_frame_bytes(raw: &mut DuplexStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    raw.read_exact(&mut buf).await.unwrap();
    buf
}

/// Test that both sides learn each other's identity and agree on protocols.
#[tokio::test]
async fn test_upgrade_identifies_both_peers() {
    let dialer_identity = IdentityManager::generate_ed25519();
    let listener_identity = IdentityManager::generate_ed25519();
    let dialer_id = dialer_identity.peer_id().clone();
    let listener_id = listener_identity.peer_id().clone();

    let dialer = upgrader(dialer_identity, quiet_config());
    let listener = upgrader(listener_identity, quiet_config());

    let (a, b) = duplex(64 * 1024);
    let (out, inb) = tokio::join!(
        dialer.upgrade(Box::new(a), Role::Dialer, Some(listener_id.clone())),
        listener.upgrade(Box::new(b), Role::Listener, None),
    );
    let (out, inb) = (out.unwrap(), inb.unwrap());

    assert_eq!(out.remote_peer, listener_id);
    assert_eq!(inb.remote_peer, dialer_id);
    assert!(listener_id.to_base58().starts_with("12D3KooW"));
    assert_eq!(inb.remote_public_key.key_type(), KeyType::Ed25519);
    assert_eq!(out.security_protocol, inb.security_protocol);
    assert_eq!(out.muxer_protocol, "/yamux/1.0.0");
}

/// Test the exact bytes of a stream opening and a 10-byte write.
#[tokio::test]
async fn test_first_stream_on_the_wire() {
    let (a, mut raw) = duplex(4096);
    let session = Session::new(a, Role::Dialer, quiet_config());

    let stream = session.open_stream().unwrap();
    assert_eq!(stream.id(), 1);

    let syn = read_frame_bytes(&mut raw, HEADER_SIZE).await;
    assert_eq!(syn, [0, 0, 0, 1, 0, 0, 0, 1, 0, 0, 0, 0]);

    assert_eq!(stream.try_write(b"0123456789").unwrap(), 10);
    let data = read_frame_bytes(&mut raw, HEADER_SIZE + 10).await;
    match decode(&data).unwrap() {
        Decoded::Frame { frame, consumed } => {
            assert_eq!(consumed, HEADER_SIZE + 10);
            assert_eq!(frame.frame_type(), FrameType::Data);
            assert_eq!(frame.header.flags, flags::NONE);
            assert_eq!(frame.stream_id(), 1);
            assert_eq!(&frame.payload[..], b"0123456789");
        }
        Decoded::NeedMoreData => panic!("incomplete DATA frame"),
    }
}

/// Test a 10-byte message on the first stream of an upgraded connection.
#[tokio::test]
async fn test_ten_bytes_over_upgraded_connection() {
    let (dialer, listener) = connected_pair(quiet_config()).await;

    let mut out = dialer.session.open_stream().unwrap();
    assert_eq!(out.id(), 1);
    out.write_all(b"0123456789").await.unwrap();

    let mut inbound = listener.session.accept_stream().await.unwrap();
    assert_eq!(inbound.id(), 1);
    let mut buf = [0u8; 10];
    inbound.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"0123456789");

    // The listener's own streams use even ids.
    let reverse = listener.session.open_stream().unwrap();
    assert_eq!(reverse.id(), 2);
}

/// Test that writes never exceed the peer's window and resume after updates.
#[tokio::test]
async fn test_flow_control() {
    const WINDOW: usize = 64 * 1024;
    let config = quiet_config().with_initial_window(WINDOW as u32);
    let (dialer, listener) = connected_pair(config).await;

    let mut out = dialer.session.open_stream().unwrap();
    assert!(matches!(
        out.try_write(&vec![1u8; WINDOW + 1]),
        Err(PeerwireError::WouldBlock)
    ));
    assert_eq!(out.try_write(&vec![1u8; WINDOW]).unwrap(), WINDOW);
    assert_eq!(out.send_window(), 0);
    assert!(matches!(
        out.try_write(b"x"),
        Err(PeerwireError::WouldBlock)
    ));

    // Completes only once the listener reads and grants more window.
    let writer = tokio::spawn(async move {
        out.write_all(&vec![2u8; WINDOW]).await.unwrap();
        out.shutdown().await.unwrap();
        out
    });

    let mut inbound = listener.session.accept_stream().await.unwrap();
    let mut received = Vec::new();
    inbound.read_to_end(&mut received).await.unwrap();

    assert_eq!(received.len(), 2 * WINDOW);
    assert!(received[..WINDOW].iter().all(|&b| b == 1));
    assert!(received[WINDOW..].iter().all(|&b| b == 2));
    writer.await.unwrap();
}

/// Test that a FIN ends one direction while the other keeps working.
#[tokio::test]
async fn test_half_close() {
    let (dialer, listener) = connected_pair(quiet_config()).await;

    let mut out = dialer.session.open_stream().unwrap();
    out.write_all(b"request").await.unwrap();
    out.shutdown().await.unwrap();
    assert!(matches!(
        out.try_write(b"late"),
        Err(PeerwireError::StreamClosed)
    ));

    let mut inbound = listener.session.accept_stream().await.unwrap();
    let mut request = Vec::new();
    inbound.read_to_end(&mut request).await.unwrap();
    assert_eq!(request, b"request");

    inbound.write_all(b"response").await.unwrap();
    inbound.shutdown().await.unwrap();

    let mut response = Vec::new();
    out.read_to_end(&mut response).await.unwrap();
    assert_eq!(response, b"response");
}

/// Test that GO_AWAY refuses new streams but drains existing ones.
#[tokio::test]
async fn test_go_away_drains_then_closes() {
    let (dialer, listener) = connected_pair(quiet_config()).await;

    let mut out = dialer.session.open_stream().unwrap();
    out.write_all(b"before").await.unwrap();
    let mut inbound = listener.session.accept_stream().await.unwrap();

    listener.session.go_away().unwrap();
    // The pong arrives after the GO_AWAY, so the dialer has seen it.
    dialer.session.ping().await.unwrap();
    assert!(matches!(
        dialer.session.open_stream(),
        Err(PeerwireError::SessionShutdown)
    ));

    out.write_all(b" after").await.unwrap();
    out.shutdown().await.unwrap();
    let mut received = Vec::new();
    inbound.read_to_end(&mut received).await.unwrap();
    assert_eq!(received, b"before after");

    inbound.shutdown().await.unwrap();
    listener.session.closed().await;
    dialer.session.closed().await;
    assert!(dialer.session.is_closed());
}

/// Test ping round trips in both directions.
#[tokio::test]
async fn test_ping() {
    let (dialer, listener) = connected_pair(quiet_config()).await;

    let rtt = dialer.session.ping().await.unwrap();
    assert!(rtt < std::time::Duration::from_secs(5));
    listener.session.ping().await.unwrap();

    dialer.session.close();
    assert!(matches!(
        dialer.session.ping().await,
        Err(PeerwireError::ConnectionClosed)
    ));
}

/// Test per-stream protocol routing on top of an upgraded connection.
#[tokio::test]
async fn test_router_echo() {
    let (dialer, listener) = connected_pair(quiet_config()).await;

    let router = Router::new()
        .handle("/echo/1.0.0", |mut stream| async move {
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await?;
            stream.write_all(&buf).await?;
            stream.shutdown().await?;
            Ok(())
        })
        .handle("/shout/1.0.0", |mut stream| async move {
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).await?;
            stream.write_all(&buf.to_ascii_uppercase()).await?;
            stream.shutdown().await?;
            Ok(())
        });
    tokio::spawn(async move { router.serve(listener.session).await });

    for (protocol, input, expected) in [
        ("/echo/1.0.0", &b"hello"[..], &b"hello"[..]),
        ("/shout/1.0.0", &b"hello"[..], &b"HELLO"[..]),
    ] {
        let (mut stream, selected) =
            open_protocol_stream(&dialer.session, &Multiselect, &[protocol.to_string()])
                .await
                .unwrap();
        assert_eq!(selected, protocol);

        stream.write_all(input).await.unwrap();
        stream.shutdown().await.unwrap();
        let mut reply = Vec::new();
        stream.read_to_end(&mut reply).await.unwrap();
        assert_eq!(reply, expected);
    }
}

/// Test that a key which does not hash to the claimed peer id is rejected.
#[tokio::test]
async fn test_corrupted_public_key_is_rejected() {
    let listener = Plaintext::new(IdentityManager::generate_ed25519(), KeyMarshaller::default());

    let impostor = IdentityManager::generate_ed25519();
    let mut key = impostor.public_key().data().to_vec();
    key[0] ^= 0x01;
    let forged = ExchangeMessage {
        pubkey: PublicKey::new(KeyType::Ed25519, key),
        peer_id: impostor.peer_id().clone(),
    };
    let msg = ExchangeMessageMarshaller::default().marshal(&forged);

    let (mut raw, b) = duplex(4096);
    raw.write_all(&(msg.len() as u32).to_be_bytes()).await.unwrap();
    raw.write_all(&msg).await.unwrap();

    let result = listener.secure_inbound(Box::new(b)).await;
    assert!(matches!(
        result,
        Err(PeerwireError::Handshake(HandshakeError::InvalidPeerId))
    ));
}
