//! Non-destructive protocol sniffing
//!
//! Sniffing runs in stages over one [`Rewind`] reader. Each stage peeks, and
//! whatever it consumed is replayed to the next stage and finally to the relay,
//! so the upstream receives the client's bytes exactly as they were sent.

pub mod classify;
pub mod http;
pub mod peek;
pub mod tls;

pub use classify::{classify, Protocol};
pub use http::read_http_host;
pub use peek::{Peek, ReadOnly, Rewind};
pub use tls::{read_client_hello, ClientHello};

use tokio::io::AsyncRead;

use crate::error::SniffError;

/// What sniffing learned about a connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SniffOutcome {
    pub is_tls: bool,
    /// SNI for TLS, Host for HTTP. `None` when the client did not send one.
    pub hostname: Option<String>,
}

/// Classify the stream and extract the destination hostname.
///
/// On return, successful or not, `stream` still yields every byte the client
/// has sent.
pub async fn sniff<T>(stream: &mut Rewind<T>) -> Result<SniffOutcome, SniffError>
where
    T: AsyncRead + Unpin,
{
    match classify(stream).await? {
        Protocol::Tls => {
            let hello = read_client_hello(stream).await?;
            Ok(SniffOutcome {
                is_tls: true,
                hostname: hello.server_name,
            })
        }
        Protocol::Plain => {
            let hostname = read_http_host(stream).await?;
            Ok(SniffOutcome {
                is_tls: false,
                hostname,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_sniff_http() {
        let data = b"POST /submit HTTP/1.1\r\nHost: api.example:8443\r\nContent-Length: 2\r\n\r\nhi";
        let mut stream = Rewind::new(&data[..]);

        let outcome = sniff(&mut stream).await.unwrap();
        assert_eq!(
            outcome,
            SniffOutcome {
                is_tls: false,
                hostname: Some("api.example".to_string()),
            }
        );

        let mut replayed = Vec::new();
        stream.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(&replayed[..], &data[..]);
    }

    #[tokio::test]
    async fn test_sniff_tls() {
        let message = tls::tests::client_hello_message(Some("secure.example"));
        let mut data = vec![0x16, 0x03, 0x01];
        data.extend_from_slice(&(message.len() as u16).to_be_bytes());
        data.extend_from_slice(&message);
        let mut stream = Rewind::new(&data[..]);

        let outcome = sniff(&mut stream).await.unwrap();
        assert!(outcome.is_tls);
        assert_eq!(outcome.hostname.as_deref(), Some("secure.example"));
        assert_eq!(stream.buffered(), data.len());
    }

    #[tokio::test]
    async fn test_failed_sniff_preserves_bytes() {
        let data = b"\x16\x03\x01\x00\x05hello";
        let mut stream = Rewind::new(&data[..]);

        assert!(sniff(&mut stream).await.is_err());

        let mut replayed = Vec::new();
        stream.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(&replayed[..], &data[..]);
    }
}
