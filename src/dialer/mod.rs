//! Upstream dialers
//!
//! Every proxied connection leaves through a [`Dialer`]. The configured proxy
//! URL selects the implementation: SOCKS5 or HTTP CONNECT, both reaching the
//! proxy server itself through a [`DirectDialer`].

pub mod direct;
pub mod http;
pub mod socks5;

pub use direct::DirectDialer;
pub use http::HttpConnectDialer;
pub use socks5::Socks5Dialer;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use tokio::net::TcpStream;
use url::Url;

use crate::destination::Destination;
use crate::Result;

const DEFAULT_SOCKS5_PORT: u16 = 1080;

/// Opens a connection to a destination.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, dest: &Destination) -> Result<TcpStream>;
}

/// Socket options for connections the proxy opens itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DialOptions {
    pub connect_timeout: Duration,
    /// Idle time before TCP keepalive probes start. `None` disables keepalive.
    pub keepalive: Option<Duration>,
}

impl Default for DialOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            keepalive: Some(Duration::from_secs(180)),
        }
    }
}

/// Forward-proxy protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyScheme {
    Socks5,
    Http,
}

/// Credentials taken from the userinfo of a proxy URL.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ProxyAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Parsed forward-proxy URL.
///
/// Accepted forms are `socks5://[user:pass@]host[:port]`, `socks5h://…`
/// (same behavior: hostnames are always resolved by the proxy) and
/// `http://[user:pass@]host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyUrl {
    pub scheme: ProxyScheme,
    pub host: String,
    pub port: u16,
    pub auth: Option<ProxyAuth>,
}

impl ProxyUrl {
    pub fn parse(s: &str) -> Result<Self> {
        let url = Url::parse(s).with_context(|| format!("invalid proxy URL '{}'", s))?;

        let scheme = match url.scheme() {
            "socks5" | "socks5h" => ProxyScheme::Socks5,
            "http" => ProxyScheme::Http,
            other => bail!("unsupported proxy scheme '{}'", other),
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| anyhow!("proxy URL '{}' has no host", s))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();

        let port = match (url.port_or_known_default(), scheme) {
            (Some(port), _) => port,
            (None, ProxyScheme::Socks5) => DEFAULT_SOCKS5_PORT,
            (None, ProxyScheme::Http) => bail!("proxy URL '{}' has no port", s),
        };

        let auth = if url.username().is_empty() {
            None
        } else {
            Some(ProxyAuth {
                username: decode_userinfo(url.username())?,
                password: decode_userinfo(url.password().unwrap_or_default())?,
            })
        };

        if let (ProxyScheme::Socks5, Some(auth)) = (scheme, &auth) {
            if auth.username.len() > 255 || auth.password.len() > 255 {
                bail!("SOCKS5 credentials must be at most 255 bytes each");
            }
        }

        Ok(Self {
            scheme,
            host,
            port,
            auth,
        })
    }
}

impl FromStr for ProxyUrl {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ProxyUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.scheme {
            ProxyScheme::Socks5 => "socks5",
            ProxyScheme::Http => "http",
        };
        write!(f, "{}://", scheme)?;
        if let Some(auth) = &self.auth {
            write!(f, "{}:***@", auth.username)?;
        }
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Percent-decode one userinfo component of a proxy URL.
fn decode_userinfo(raw: &str) -> Result<String> {
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .context("proxy URL credentials are not valid UTF-8")?;
    Ok(decoded.into_owned())
}

/// Build the dialer for a proxy URL.
pub fn from_url(url: &ProxyUrl, options: DialOptions) -> Arc<dyn Dialer> {
    let direct = DirectDialer::new(options);
    match url.scheme {
        ProxyScheme::Socks5 => Arc::new(Socks5Dialer::new(
            direct,
            url.host.clone(),
            url.port,
            url.auth.clone(),
        )),
        ProxyScheme::Http => Arc::new(HttpConnectDialer::new(
            direct,
            url.host.clone(),
            url.port,
            url.auth.clone(),
        )),
    }
}
