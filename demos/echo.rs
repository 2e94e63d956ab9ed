//! Echo - two in-process peers talking over an upgraded connection.
//!
//! This example demonstrates:
//! - Building an upgrader with plaintext security and yamux
//! - Upgrading both ends of an in-memory pipe
//! - Serving an application protocol with a router
//! - Opening a stream that negotiates that protocol
//!
//! # Running
//!
//! ```text
//! RUST_LOG=peerwire=debug cargo run --example echo
//! ```

use peerwire::{
    open_protocol_stream, IdentityManager, KeyMarshaller, Multiselect, Plaintext, Router,
    Upgrader, Yamux,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

const ECHO_PROTOCOL: &str = "/echo/1.0.0";

fn upgrader(identity: IdentityManager) -> peerwire::Result<Upgrader> {
    Upgrader::builder()
        .security(Plaintext::new(identity, KeyMarshaller::default()))
        .muxer(Yamux::default())
        .build()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let alice = IdentityManager::generate_ed25519();
    let bob = IdentityManager::generate_ed25519();
    let bob_id = bob.peer_id().clone();
    println!("alice: {}", alice.peer_id());
    println!("bob:   {}", bob_id);

    let (alice_conn, bob_conn) = tokio::io::duplex(64 * 1024);
    let alice_upgrader = upgrader(alice)?;
    let bob_upgrader = upgrader(bob)?;
    let (alice_side, bob_side) = tokio::try_join!(
        alice_upgrader.upgrade_outbound(Box::new(alice_conn), bob_id),
        bob_upgrader.upgrade_inbound(Box::new(bob_conn)),
    )?;
    println!(
        "upgraded with {} + {}",
        alice_side.security_protocol, alice_side.muxer_protocol
    );

    // Bob echoes every stream opened with the echo protocol
    let router = Router::new().handle(ECHO_PROTOCOL, |mut stream| async move {
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        stream.write_all(&buf).await?;
        stream.shutdown().await?;
        Ok(())
    });
    tokio::spawn(async move { router.serve(bob_side.session).await });

    for message in ["hello", "over", "yamux"] {
        let (mut stream, _) = open_protocol_stream(
            &alice_side.session,
            &Multiselect,
            &[ECHO_PROTOCOL.to_string()],
        )
        .await?;
        stream.write_all(message.as_bytes()).await?;
        stream.shutdown().await?;

        let mut reply = String::new();
        stream.read_to_string(&mut reply).await?;
        println!("stream {}: sent {message:?}, got {reply:?}", stream.id());
    }

    let rtt = alice_side.session.ping().await?;
    println!("ping: {rtt:?}");

    alice_side.session.go_away()?;
    alice_side.session.closed().await;
    Ok(())
}
