//! SOCKS5 client (RFC 1928, RFC 1929)

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::{Dialer, DirectDialer, ProxyAuth};
use crate::destination::{Destination, TargetAddr};
use crate::Result;

pub const SOCKS5_VERSION: u8 = 0x05;
pub const SOCKS5_CMD_CONNECT: u8 = 0x01;
pub const SOCKS5_RESERVED: u8 = 0x00;

pub const SOCKS5_ADDR_IPV4: u8 = 0x01;
pub const SOCKS5_ADDR_DOMAIN: u8 = 0x03;
pub const SOCKS5_ADDR_IPV6: u8 = 0x04;

pub const SOCKS5_AUTH_NONE: u8 = 0x00;
pub const SOCKS5_AUTH_USERPASS: u8 = 0x02;
pub const SOCKS5_AUTH_UNACCEPTABLE: u8 = 0xFF;

pub const SOCKS5_REPLY_SUCCESS: u8 = 0x00;

pub const SOCKS5_USERPASS_VERSION: u8 = 0x01;
pub const SOCKS5_USERPASS_SUCCESS: u8 = 0x00;

fn address_type(addr: &TargetAddr) -> u8 {
    match addr {
        TargetAddr::Ipv4(_) => SOCKS5_ADDR_IPV4,
        TargetAddr::Ipv6(_) => SOCKS5_ADDR_IPV6,
        TargetAddr::Domain(_) => SOCKS5_ADDR_DOMAIN,
    }
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}

/// Client side of a SOCKS5 session over an established stream.
pub struct Socks5Client<S> {
    stream: S,
}

impl<S> Socks5Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Negotiate a method and authenticate, then CONNECT to `target:port`.
    ///
    /// Returns the bound address reported by the server.
    pub async fn connect(
        &mut self,
        target: &TargetAddr,
        port: u16,
        auth: Option<&ProxyAuth>,
    ) -> Result<(TargetAddr, u16)> {
        let methods: &[u8] = if auth.is_some() {
            &[SOCKS5_AUTH_NONE, SOCKS5_AUTH_USERPASS]
        } else {
            &[SOCKS5_AUTH_NONE]
        };
        self.send_greeting(methods).await?;

        match (self.receive_auth_method().await?, auth) {
            (SOCKS5_AUTH_NONE, _) => {}
            (SOCKS5_AUTH_USERPASS, Some(auth)) => {
                self.authenticate_username_password(&auth.username, &auth.password)
                    .await?
            }
            (SOCKS5_AUTH_UNACCEPTABLE, _) => {
                return Err(anyhow!("SOCKS5 server accepted none of the offered methods"))
            }
            (method, _) => {
                return Err(anyhow!(
                    "SOCKS5 server selected unoffered method {:#04x}",
                    method
                ))
            }
        }

        self.send_connect_request(target, port).await?;
        let (reply, bind_addr, bind_port) = self.receive_connect_response().await?;
        if reply != SOCKS5_REPLY_SUCCESS {
            return Err(anyhow!(
                "SOCKS5 CONNECT failed: {} ({:#04x})",
                reply_message(reply),
                reply
            ));
        }
        Ok((bind_addr, bind_port))
    }

    async fn send_greeting(&mut self, methods: &[u8]) -> Result<()> {
        let mut greeting = Vec::with_capacity(2 + methods.len());
        greeting.push(SOCKS5_VERSION);
        greeting.push(methods.len() as u8);
        greeting.extend_from_slice(methods);

        self.stream
            .write_all(&greeting)
            .await
            .map_err(|e| anyhow!("Failed to send greeting: {}", e))?;
        Ok(())
    }

    async fn receive_auth_method(&mut self) -> Result<u8> {
        let mut response = [0u8; 2];
        self.stream
            .read_exact(&mut response)
            .await
            .map_err(|e| anyhow!("Failed to read auth method response: {}", e))?;

        if response[0] != SOCKS5_VERSION {
            return Err(anyhow!(
                "Invalid SOCKS version in auth response: {}",
                response[0]
            ));
        }
        Ok(response[1])
    }

    async fn authenticate_username_password(&mut self, username: &str, password: &str) -> Result<()> {
        let mut request = Vec::with_capacity(3 + username.len() + password.len());
        request.push(SOCKS5_USERPASS_VERSION);
        request.push(username.len() as u8);
        request.extend_from_slice(username.as_bytes());
        request.push(password.len() as u8);
        request.extend_from_slice(password.as_bytes());

        self.stream
            .write_all(&request)
            .await
            .map_err(|e| anyhow!("Failed to send auth request: {}", e))?;

        let mut response = [0u8; 2];
        self.stream
            .read_exact(&mut response)
            .await
            .map_err(|e| anyhow!("Failed to read auth response: {}", e))?;

        if response[0] != SOCKS5_USERPASS_VERSION {
            return Err(anyhow!("Invalid auth response version: {}", response[0]));
        }
        if response[1] != SOCKS5_USERPASS_SUCCESS {
            return Err(anyhow!("SOCKS5 authentication failed"));
        }
        Ok(())
    }

    async fn send_connect_request(&mut self, target: &TargetAddr, port: u16) -> Result<()> {
        // VER CMD RSV ATYP
        let mut request = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_CONNECT,
            SOCKS5_RESERVED,
            address_type(target),
        ];

        match target {
            TargetAddr::Ipv4(ip) => request.extend_from_slice(&ip.octets()),
            TargetAddr::Ipv6(ip) => request.extend_from_slice(&ip.octets()),
            TargetAddr::Domain(domain) => {
                if domain.is_empty() || domain.len() > 255 {
                    return Err(anyhow!("Invalid domain name length: {}", domain.len()));
                }
                request.push(domain.len() as u8);
                request.extend_from_slice(domain.as_bytes());
            }
        }
        request.extend_from_slice(&port.to_be_bytes());

        self.stream
            .write_all(&request)
            .await
            .map_err(|e| anyhow!("Failed to send connect request: {}", e))?;
        Ok(())
    }

    async fn receive_connect_response(&mut self) -> Result<(u8, TargetAddr, u16)> {
        let mut header = [0u8; 4];
        self.stream
            .read_exact(&mut header)
            .await
            .map_err(|e| anyhow!("Failed to read connect response header: {}", e))?;

        let [version, reply, _reserved, atyp] = header;
        if version != SOCKS5_VERSION {
            return Err(anyhow!("Invalid SOCKS version in response: {}", version));
        }

        let bind_addr = match atyp {
            SOCKS5_ADDR_IPV4 => {
                let mut octets = [0u8; 4];
                self.stream.read_exact(&mut octets).await?;
                TargetAddr::Ipv4(octets.into())
            }
            SOCKS5_ADDR_IPV6 => {
                let mut octets = [0u8; 16];
                self.stream.read_exact(&mut octets).await?;
                TargetAddr::Ipv6(octets.into())
            }
            SOCKS5_ADDR_DOMAIN => {
                let len = self.stream.read_u8().await? as usize;
                let mut name = vec![0u8; len];
                self.stream.read_exact(&mut name).await?;
                TargetAddr::Domain(
                    String::from_utf8(name)
                        .map_err(|e| anyhow!("Invalid UTF-8 in bind domain name: {}", e))?,
                )
            }
            _ => return Err(anyhow!("Unsupported bind address type: {}", atyp)),
        };
        let bind_port = self.stream.read_u16().await?;

        Ok((reply, bind_addr, bind_port))
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Dials destinations through a SOCKS5 proxy.
///
/// Hostnames are sent to the proxy unresolved.
#[derive(Debug, Clone)]
pub struct Socks5Dialer {
    proxy: DirectDialer,
    host: String,
    port: u16,
    auth: Option<ProxyAuth>,
}

impl Socks5Dialer {
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
impl Dialer for Socks5Dialer {
    async fn dial(&self, dest: &Destination) -> Result<TcpStream> {
        let stream = self.proxy.connect(&self.host, self.port).await?;

        let mut client = Socks5Client::new(stream);
        let (bind_addr, bind_port) = client
            .connect(&dest.host, dest.port, self.auth.as_ref())
            .await?;
        debug!(dest = %dest, bind = %Destination::new(bind_addr, bind_port), "SOCKS5 tunnel established");

        Ok(client.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_connect_domain_without_auth() {
        let mock = Builder::new()
            .write(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_NONE])
            .read(&[SOCKS5_VERSION, SOCKS5_AUTH_NONE])
            .write(&[
                0x05, 0x01, 0x00, 0x03, 11, b'e', b'x', b'a', b'm', b'p', b'l', b'e', b'.', b'c',
                b'o', b'm', 0x01, 0xbb,
            ])
            .read(&[0x05, 0x00, 0x00, 0x01, 10, 0, 0, 1, 0x04, 0x38])
            .build();

        let mut client = Socks5Client::new(mock);
        let target = TargetAddr::Domain("example.com".to_string());
        let (bind, port) = client.connect(&target, 443, None).await.unwrap();
        assert_eq!(bind, TargetAddr::Ipv4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(port, 1080);
    }

    #[tokio::test]
    async fn test_connect_with_userpass() {
        let auth = ProxyAuth {
            username: "bob".to_string(),
            password: "pw".to_string(),
        };
        let mock = Builder::new()
            .write(&[SOCKS5_VERSION, 2, SOCKS5_AUTH_NONE, SOCKS5_AUTH_USERPASS])
            .read(&[SOCKS5_VERSION, SOCKS5_AUTH_USERPASS])
            .write(&[0x01, 3, b'b', b'o', b'b', 2, b'p', b'w'])
            .read(&[0x01, 0x00])
            .write(&[0x05, 0x01, 0x00, 0x01, 192, 0, 2, 1, 0x00, 0x50])
            .read(&[0x05, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .build();

        let mut client = Socks5Client::new(mock);
        let target = TargetAddr::Ipv4(Ipv4Addr::new(192, 0, 2, 1));
        client.connect(&target, 80, Some(&auth)).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_reply() {
        let mock = Builder::new()
            .write(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_NONE])
            .read(&[SOCKS5_VERSION, SOCKS5_AUTH_NONE])
            .write(&[0x05, 0x01, 0x00, 0x01, 192, 0, 2, 1, 0x00, 0x50])
            .read(&[0x05, 0x05, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .build();

        let mut client = Socks5Client::new(mock);
        let target = TargetAddr::Ipv4(Ipv4Addr::new(192, 0, 2, 1));
        let err = client.connect(&target, 80, None).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_no_acceptable_method() {
        let mock = Builder::new()
            .write(&[SOCKS5_VERSION, 1, SOCKS5_AUTH_NONE])
            .read(&[SOCKS5_VERSION, SOCKS5_AUTH_UNACCEPTABLE])
            .build();

        let mut client = Socks5Client::new(mock);
        let target = TargetAddr::Domain("example.com".to_string());
        assert!(client.connect(&target, 443, None).await.is_err());
    }
}
