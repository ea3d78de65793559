//! HTTP CONNECT tunnel dialer

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use base64::Engine;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::{Dialer, DirectDialer, ProxyAuth};
use crate::destination::Destination;
use crate::Result;

const MAX_RESPONSE_HEAD: usize = 8 * 1024;
const MAX_RESPONSE_HEADERS: usize = 32;

/// Dials destinations through an HTTP proxy using `CONNECT`.
#[derive(Debug, Clone)]
pub struct HttpConnectDialer {
    proxy: DirectDialer,
    host: String,
    port: u16,
    auth: Option<ProxyAuth>,
}

impl HttpConnectDialer {
    pub fn new(proxy: DirectDialer, host: String, port: u16, auth: Option<ProxyAuth>) -> Self {
        Self {
            proxy,
            host,
            port,
            auth,
        }
    }
}

#[async_trait]
impl Dialer for HttpConnectDialer {
    async fn dial(&self, dest: &Destination) -> Result<TcpStream> {
        let mut stream = self.proxy.connect(&self.host, self.port).await?;
        establish_tunnel(&mut stream, dest, self.auth.as_ref()).await?;
        debug!(dest = %dest, "HTTP CONNECT tunnel established");
        Ok(stream)
    }
}

/// Send `CONNECT` for `dest` and wait for a 2xx response.
///
/// The response head is read one byte at a time so nothing tunneled after it
/// is consumed.
pub async fn establish_tunnel<S>(
    stream: &mut S,
    dest: &Destination,
    auth: Option<&ProxyAuth>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut request = format!(
        "CONNECT {dest} HTTP/1.1\r\nHost: {dest}\r\nProxy-Connection: Keep-Alive\r\n",
        dest = dest
    );
    if let Some(auth) = auth {
        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", auth.username, auth.password));
        request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", credentials));
    }
    request.push_str("\r\n");

    stream.write_all(request.as_bytes()).await?;

    let mut head = Vec::with_capacity(256);
    loop {
        let byte = stream
            .read_u8()
            .await
            .map_err(|e| anyhow!("HTTP proxy closed before responding: {}", e))?;
        head.push(byte);
        if head.ends_with(b"\r\n\r\n") {
            break;
        }
        if head.len() >= MAX_RESPONSE_HEAD {
            bail!("HTTP proxy response head exceeds {} bytes", MAX_RESPONSE_HEAD);
        }
    }

    let mut headers = [httparse::EMPTY_HEADER; MAX_RESPONSE_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    match response.parse(&head) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => bail!("incomplete HTTP proxy response"),
        Err(e) => bail!("malformed HTTP proxy response: {}", e),
    }

    let code = response.code.unwrap_or(0);
    if !(200..300).contains(&code) {
        bail!(
            "HTTP proxy refused CONNECT {}: {} {}",
            dest,
            code,
            response.reason.unwrap_or("")
        );
    }
    Ok(())
}
