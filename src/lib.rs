//! # peerwire
//!
//! Connection plumbing for peer-to-peer nodes.
//!
//! A raw byte stream (TCP socket, in-memory pipe, ...) is upgraded in three
//! steps before applications see it:
//!
//! - **Security**: a `/plaintext/2.0.0` identity exchange proves which
//!   [`PeerId`] is on the other end
//! - **Negotiation**: multistream-select agrees on the security and muxer
//!   protocols, and later on the application protocol of each stream
//! - **Multiplexing**: a yamux [`Session`] carries many flow-controlled
//!   [`Stream`]s over the one connection
//!
//! ## Example
//!
//! ```no_run
//! use peerwire::{IdentityManager, KeyMarshaller, Plaintext, Router, Upgrader, Yamux};
//!
//! #[tokio::main]
//! async fn main() -> peerwire::Result<()> {
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:4001").await?;
//!     let upgrader = Upgrader::builder()
//!         .security(Plaintext::new(
//!             IdentityManager::generate_ed25519(),
//!             KeyMarshaller::default(),
//!         ))
//!         .muxer(Yamux::default())
//!         .build()?;
//!
//!     let router = Router::new().handle("/echo/1.0.0", |mut stream| async move {
//!         let (mut rd, mut wr) = tokio::io::split(&mut stream);
//!         tokio::io::copy(&mut rd, &mut wr).await?;
//!         Ok(())
//!     });
//!
//!     let (socket, _) = listener.accept().await?;
//!     let upgraded = upgrader.upgrade_inbound(Box::new(socket)).await?;
//!     router.serve(upgraded.session).await
//! }
//! ```

pub mod crypto;
pub mod error;
pub mod muxer;
pub mod negotiation;
pub mod peer;
pub mod protocol;
pub mod router;
pub mod security;
pub mod transport;
pub mod upgrader;

mod writer;

pub use crypto::{KeyMarshaller, KeyPair, KeyType, PrivateKey, PublicKey};
pub use error::{DecodeError, EncodeError, HandshakeError, KeyError, PeerwireError, Result};
pub use muxer::{Session, SessionConfig, Stream, StreamState, Yamux};
pub use negotiation::{Multiselect, Negotiator};
pub use peer::{IdentityManager, PeerId};
pub use router::{open_protocol_stream, Router};
pub use security::{Plaintext, SecureConnection};
pub use transport::{BoxedConnection, Role};
pub use upgrader::{Upgraded, Upgrader, UpgraderBuilder};
