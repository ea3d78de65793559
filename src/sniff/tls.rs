//! TLS ClientHello extraction
//!
//! Only the first client-to-server handshake message is needed to learn the
//! server name, so no handshake is ever attempted. The record layer is read
//! through a [`ReadOnly`] view of a [`Peek`](super::peek::Peek), fragments are
//! reassembled into one handshake message, and the message is parsed with
//! `tls-parser`.

use tls_parser::{
    parse_tls_extensions, parse_tls_message_handshake, SNIType, TlsExtension, TlsMessage,
    TlsMessageHandshake,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use super::classify::TLS_HANDSHAKE_RECORD;
use super::peek::{ReadOnly, Rewind};
use crate::error::SniffError;

const RECORD_HEADER_LEN: usize = 5;
const HANDSHAKE_HEADER_LEN: usize = 4;
/// Largest TLSPlaintext fragment a peer may send (2^14) plus expansion slack.
const MAX_RECORD_LEN: usize = 16384 + 2048;
const MAX_CLIENT_HELLO_LEN: usize = 64 * 1024;

/// Fields captured from a ClientHello.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientHello {
    /// `host_name` entry of the server_name extension, if any.
    pub server_name: Option<String>,
    /// Protocols offered in the ALPN extension.
    pub alpn: Vec<String>,
}

/// Peek a ClientHello from `stream` and return what it says.
///
/// All bytes read stay in `stream`. A ClientHello without a server_name
/// extension is not an error; only input that never yields a parseable
/// ClientHello is.
pub async fn read_client_hello<T>(stream: &mut Rewind<T>) -> Result<ClientHello, SniffError>
where
    T: AsyncRead + Unpin,
{
    let mut peek = stream.peek();
    let message = {
        let mut reader = ReadOnly::new(&mut peek);
        read_handshake_message(&mut reader).await?
    };
    let hello = parse_client_hello(&message)?;

    debug!(
        consumed = peek.consumed(),
        server_name = hello.server_name.as_deref().unwrap_or(""),
        alpn = ?hello.alpn,
        "peeked TLS ClientHello"
    );
    Ok(hello)
}

/// Read TLS records until the first handshake message is complete.
async fn read_handshake_message<R>(reader: &mut R) -> Result<Vec<u8>, SniffError>
where
    R: AsyncRead + Unpin,
{
    let mut message = Vec::new();

    loop {
        let mut header = [0u8; RECORD_HEADER_LEN];
        reader
            .read_exact(&mut header)
            .await
            .map_err(SniffError::from_read)?;

        if header[0] != TLS_HANDSHAKE_RECORD {
            return Err(SniffError::ClientHello(format!(
                "unexpected record content type {:#04x}",
                header[0]
            )));
        }

        let len = u16::from_be_bytes([header[3], header[4]]) as usize;
        if len == 0 || len > MAX_RECORD_LEN {
            return Err(SniffError::ClientHello(format!(
                "invalid record length {}",
                len
            )));
        }

        let start = message.len();
        message.resize(start + len, 0);
        reader
            .read_exact(&mut message[start..])
            .await
            .map_err(SniffError::from_read)?;

        if message.len() >= HANDSHAKE_HEADER_LEN {
            let body_len = u32::from_be_bytes([0, message[1], message[2], message[3]]) as usize;
            let total = HANDSHAKE_HEADER_LEN + body_len;
            if total > MAX_CLIENT_HELLO_LEN {
                return Err(SniffError::ClientHello(format!(
                    "handshake message too large ({} bytes)",
                    total
                )));
            }
            if message.len() >= total {
                message.truncate(total);
                return Ok(message);
            }
        }
    }
}

/// Parse a reassembled handshake message as a ClientHello.
pub(crate) fn parse_client_hello(message: &[u8]) -> Result<ClientHello, SniffError> {
    let (_, parsed) = parse_tls_message_handshake(message)
        .map_err(|e| SniffError::ClientHello(format!("malformed handshake: {:?}", e)))?;

    let contents = match parsed {
        TlsMessage::Handshake(TlsMessageHandshake::ClientHello(contents)) => contents,
        _ => {
            return Err(SniffError::ClientHello(
                "first handshake message is not a ClientHello".to_string(),
            ))
        }
    };

    let mut hello = ClientHello::default();
    let Some(ext) = contents.ext else {
        return Ok(hello);
    };

    let (_, extensions) = parse_tls_extensions(ext)
        .map_err(|e| SniffError::ClientHello(format!("malformed extensions: {:?}", e)))?;

    for extension in extensions {
        match extension {
            TlsExtension::SNI(names) => {
                if let Some((_, name)) = names.iter().find(|(t, _)| *t == SNIType::HostName) {
                    let name = std::str::from_utf8(name).map_err(|_| {
                        SniffError::ClientHello("server name is not valid UTF-8".to_string())
                    })?;
                    if !name.is_empty() {
                        hello.server_name = Some(name.to_string());
                    }
                }
            }
            TlsExtension::ALPN(protocols) => {
                hello.alpn = protocols
                    .iter()
                    .map(|p| String::from_utf8_lossy(p).into_owned())
                    .collect();
            }
            _ => {}
        }
    }

    Ok(hello)
}
