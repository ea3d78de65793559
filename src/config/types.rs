//! Configuration Types

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::destination::Mode;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub logging: LoggingConfig,
}

/// Listener and per-connection limits
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub mode: Mode,
    /// Grace period for running connections once shutdown starts.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    /// Upper bound on reading the ClientHello or HTTP request head.
    #[serde(with = "humantime_serde")]
    pub sniff_timeout: Duration,
    pub max_connections: usize,
}

/// Forward proxy every connection is dialed through
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// `socks5://`, `socks5h://` or `http://` URL, credentials optional.
    pub proxy_url: String,
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
    /// TCP keepalive idle time on the proxy socket; `0s` disables it.
    #[serde(with = "humantime_serde")]
    pub keepalive: Duration,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("unknown log format '{}' (expected text or json)", other),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 1081)),
            mode: Mode::Direct,
            shutdown_timeout: Duration::from_secs(60),
            sniff_timeout: Duration::from_secs(10),
            max_connections: 10_000,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            proxy_url: String::new(),
            dial_timeout: Duration::from_secs(30),
            keepalive: Duration::from_secs(180),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl UpstreamConfig {
    /// Keepalive setting for the dialer; `None` when disabled.
    pub fn keepalive(&self) -> Option<Duration> {
        (!self.keepalive.is_zero()).then_some(self.keepalive)
    }
}
