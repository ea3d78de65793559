//! Plain TCP dialer

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::{DialOptions, Dialer};
use crate::destination::Destination;
use crate::Result;

/// Connects straight to the target.
///
/// Used on its own when no forward proxy sits between this host and the
/// destination, and by the proxy dialers to reach the proxy server.
#[derive(Debug, Clone, Default)]
pub struct DirectDialer {
    options: DialOptions,
}

impl DirectDialer {
    pub fn new(options: DialOptions) -> Self {
        Self { options }
    }

    /// Connect to `host:port`, resolving `host` if it is not an IP literal.
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream> {
        let stream = timeout(self.options.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| {
                anyhow!(
                    "connect to {}:{} timed out after {:?}",
                    host,
                    port,
                    self.options.connect_timeout
                )
            })?
            .with_context(|| format!("connect to {}:{}", host, port))?;

        self.configure(&stream)?;
        debug!(host, port, "connected");
        Ok(stream)
    }

    fn configure(&self, stream: &TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        if let Some(idle) = self.options.keepalive {
            let keepalive = TcpKeepalive::new().with_time(idle);
            SockRef::from(stream)
                .set_tcp_keepalive(&keepalive)
                .context("set TCP keepalive")?;
        }
        Ok(())
    }
}

#[async_trait]
impl Dialer for DirectDialer {
    async fn dial(&self, dest: &Destination) -> Result<TcpStream> {
        self.connect(&dest.host.to_string(), dest.port).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_dial_ip_destination() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let dialer = DirectDialer::default();
        let stream = dialer
            .dial(&Destination::from_socket_addr(addr))
            .await
            .unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dialer = DirectDialer::new(DialOptions {
            connect_timeout: Duration::from_secs(5),
            keepalive: None,
        });
        let err = dialer.connect("127.0.0.1", addr.port()).await.unwrap_err();
        assert!(format!("{:#}", err).contains("connect to 127.0.0.1"));
    }
}
