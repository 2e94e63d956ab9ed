//! multistream-select 1.0.
//!
//! Every message is `uvarint(len) || utf8 || '\n'`, where `len` counts the
//! newline. Both sides first exchange the `/multistream/1.0.0` header; the
//! dialer then proposes protocols in preference order and the listener
//! echoes the first one it supports or answers `na`.
//!
//! Messages are read byte-exactly so nothing after the negotiation is
//! consumed from the connection.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::Negotiator;
use crate::error::{PeerwireError, Result};
use crate::transport::{BoxFuture, RawConnection, Role};

/// Header exchanged before any proposal.
pub const MULTISTREAM_PROTOCOL_ID: &str = "/multistream/1.0.0";

/// Rejection of a proposal.
const NOT_AVAILABLE: &str = "na";

/// Longest message accepted, newline included.
const MAX_MESSAGE_LEN: usize = 1024;

/// Longest unsigned varint read, in bytes.
const MAX_VARINT_LEN: usize = 10;

/// multistream-select negotiator.
#[derive(Debug, Clone, Copy, Default)]
pub struct Multiselect;

impl Multiselect {
    pub fn new() -> Self {
        Self
    }

    /// Agree on one of `protocols` with the peer.
    ///
    /// As dialer, proposes `protocols` in order; as listener, accepts the
    /// first proposal contained in `protocols`.
    pub async fn select_protocol(
        &self,
        conn: &mut dyn RawConnection,
        role: Role,
        protocols: &[String],
    ) -> Result<String> {
        if protocols.is_empty() {
            return Err(PeerwireError::Negotiation("no protocols to offer".into()));
        }

        let selected = match role {
            Role::Dialer => dial(conn, protocols).await?,
            Role::Listener => listen(conn, protocols).await?,
        };
        tracing::debug!(%role, protocol = %selected, "protocol negotiated");
        Ok(selected)
    }
}

impl Negotiator for Multiselect {
    fn select_protocol<'a>(
        &'a self,
        conn: &'a mut dyn RawConnection,
        role: Role,
        protocols: &'a [String],
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(Multiselect::select_protocol(self, conn, role, protocols))
    }
}

async fn dial(conn: &mut dyn RawConnection, protocols: &[String]) -> Result<String> {
    // Pipeline the header with the first proposal.
    let mut out = encode_message(MULTISTREAM_PROTOCOL_ID)?;
    out.extend(encode_message(&protocols[0])?);
    conn.write_all(&out).await?;
    conn.flush().await?;

    expect_header(conn).await?;

    for (i, protocol) in protocols.iter().enumerate() {
        if i > 0 {
            write_message(conn, protocol).await?;
        }
        let answer = read_message(conn).await?;
        if answer == *protocol {
            return Ok(answer);
        }
        if answer != NOT_AVAILABLE {
            return Err(PeerwireError::Negotiation(format!(
                "unexpected answer {answer:?} to proposal {protocol:?}"
            )));
        }
        tracing::trace!(%protocol, "proposal rejected");
    }

    Err(PeerwireError::Negotiation(format!(
        "peer supports none of {protocols:?}"
    )))
}

async fn listen(conn: &mut dyn RawConnection, protocols: &[String]) -> Result<String> {
    expect_header(conn).await?;
    write_message(conn, MULTISTREAM_PROTOCOL_ID).await?;

    loop {
        let proposal = read_message(conn).await?;
        if protocols.contains(&proposal) {
            write_message(conn, &proposal).await?;
            return Ok(proposal);
        }
        tracing::trace!(%proposal, "unsupported proposal");
        write_message(conn, NOT_AVAILABLE).await?;
    }
}

async fn expect_header(conn: &mut dyn RawConnection) -> Result<()> {
    let header = read_message(conn).await?;
    if header != MULTISTREAM_PROTOCOL_ID {
        return Err(PeerwireError::Negotiation(format!(
            "unexpected multistream header {header:?}"
        )));
    }
    Ok(())
}

fn encode_message(msg: &str) -> Result<Vec<u8>> {
    let len = msg.len() + 1;
    if len > MAX_MESSAGE_LEN {
        return Err(PeerwireError::Negotiation(format!(
            "protocol name of {} bytes is too long",
            msg.len()
        )));
    }

    let mut out = Vec::with_capacity(len + 2);
    prost::encoding::encode_varint(len as u64, &mut out);
    out.extend_from_slice(msg.as_bytes());
    out.push(b'\n');
    Ok(out)
}

async fn write_message(conn: &mut dyn RawConnection, msg: &str) -> Result<()> {
    conn.write_all(&encode_message(msg)?).await?;
    conn.flush().await?;
    Ok(())
}

async fn read_message(conn: &mut dyn RawConnection) -> Result<String> {
    let len = read_varint(conn).await?;
    if len == 0 || len > MAX_MESSAGE_LEN as u64 {
        return Err(PeerwireError::Negotiation(format!(
            "invalid message length {len}"
        )));
    }

    let mut buf = vec![0u8; len as usize];
    conn.read_exact(&mut buf).await?;
    if buf.pop() != Some(b'\n') {
        return Err(PeerwireError::Negotiation(
            "message is not newline terminated".into(),
        ));
    }
    String::from_utf8(buf)
        .map_err(|_| PeerwireError::Negotiation("message is not valid UTF-8".into()))
}

async fn read_varint(conn: &mut dyn RawConnection) -> Result<u64> {
    let mut bytes = Vec::with_capacity(MAX_VARINT_LEN);
    loop {
        let byte = conn.read_u8().await?;
        bytes.push(byte);
        if byte & 0x80 == 0 {
            break;
        }
        if bytes.len() == MAX_VARINT_LEN {
            return Err(PeerwireError::Negotiation("varint overflow".into()));
        }
    }
    prost::encoding::decode_varint(&mut bytes.as_slice())
        .map_err(|e| PeerwireError::Negotiation(format!("invalid varint: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_message_encoding() {
        let encoded = encode_message(MULTISTREAM_PROTOCOL_ID).unwrap();
        assert_eq!(encoded[0], 19);
        assert_eq!(&encoded[1..], b"/multistream/1.0.0\n");
    }

    #[tokio::test]
    async fn test_first_common_protocol_wins() {
        let (mut a, mut b) = duplex(1024);
        let dialer_protocols = names(&["/noise", "/plaintext/2.0.0", "/tls/1.0.0"]);
        let listener_protocols = names(&["/tls/1.0.0", "/plaintext/2.0.0"]);
        let negotiator = Multiselect::new();

        let (dialed, listened) = tokio::join!(
            negotiator.select_protocol(&mut a, Role::Dialer, &dialer_protocols),
            negotiator.select_protocol(&mut b, Role::Listener, &listener_protocols),
        );
        assert_eq!(dialed.unwrap(), "/plaintext/2.0.0");
        assert_eq!(listened.unwrap(), "/plaintext/2.0.0");
    }

    #[tokio::test]
    async fn test_no_common_protocol() {
        let (mut a, mut b) = duplex(1024);
        let negotiator = Multiselect::new();
        let dialer_protocols = names(&["/a"]);
        let listener_protocols = names(&["/b"]);

        let dial = async {
            let result = negotiator
                .select_protocol(&mut a, Role::Dialer, &dialer_protocols)
                .await;
            drop(a);
            result
        };
        let listen = negotiator.select_protocol(&mut b, Role::Listener, &listener_protocols);
        let (dialed, listened) = tokio::join!(dial, listen);

        assert!(matches!(dialed, Err(PeerwireError::Negotiation(_))));
        // The listener waits for another proposal until the dialer hangs up.
        assert!(matches!(listened, Err(PeerwireError::Io(_))));
    }

    #[tokio::test]
    async fn test_does_not_consume_trailing_bytes() {
        let (mut a, mut b) = duplex(1024);
        let protocols = names(&["/echo/1.0.0"]);

        let dial = async {
            let selected = Multiselect::new()
                .select_protocol(&mut a, Role::Dialer, &protocols)
                .await
                .unwrap();
            a.write_all(b"payload").await.unwrap();
            selected
        };
        let listen = async {
            let selected = Multiselect::new()
                .select_protocol(&mut b, Role::Listener, &protocols)
                .await
                .unwrap();
            let mut buf = [0u8; 7];
            b.read_exact(&mut buf).await.unwrap();
            (selected, buf)
        };

        let (_, (selected, buf)) = tokio::join!(dial, listen);
        assert_eq!(selected, "/echo/1.0.0");
        assert_eq!(&buf, b"payload");
    }

    #[tokio::test]
    async fn test_bad_header_is_rejected() {
        let (mut a, mut b) = duplex(1024);
        let protocols = names(&["/echo/1.0.0"]);

        b.write_all(&encode_message("/not-multistream").unwrap())
            .await
            .unwrap();
        let result = Multiselect::new()
            .select_protocol(&mut a, Role::Listener, &protocols)
            .await;
        assert!(matches!(result, Err(PeerwireError::Negotiation(_))));
    }
}
