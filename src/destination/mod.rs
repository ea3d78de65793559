//! Destination resolution
//!
//! The base destination comes from the socket: its local address in direct
//! mode, or the pre-NAT address in redirect mode. Sniffing may then swap the
//! host for a hostname; the port always stays the base port.

pub mod original_dst;

pub use original_dst::{OriginalDst, SockOptOriginalDst};

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;

use crate::error::ProxyError;

/// Host part of a destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetAddr {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl TargetAddr {
    /// Interpret `host` as an IP literal (brackets allowed) or a domain name.
    pub fn parse(host: &str) -> Self {
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        match bare.parse::<IpAddr>() {
            Ok(ip) => Self::from_ip(ip),
            Err(_) => TargetAddr::Domain(host.to_string()),
        }
    }

    pub fn from_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => TargetAddr::Ipv4(v4),
            IpAddr::V6(v6) => TargetAddr::Ipv6(v6),
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ipv4(ip) => write!(f, "{}", ip),
            TargetAddr::Ipv6(ip) => write!(f, "{}", ip),
            TargetAddr::Domain(domain) => f.write_str(domain),
        }
    }
}

/// Where a proxied connection is headed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub host: TargetAddr,
    pub port: u16,
}

impl Destination {
    pub fn new(host: TargetAddr, port: u16) -> Self {
        Self { host, port }
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self {
            host: TargetAddr::from_ip(addr.ip()),
            port: addr.port(),
        }
    }

    /// Replace the host with a sniffed hostname, keeping the port.
    ///
    /// `None` and empty names leave the destination untouched.
    pub fn with_hostname(self, hostname: Option<&str>) -> Self {
        match hostname {
            Some(name) if !name.is_empty() => Self {
                host: TargetAddr::parse(name),
                port: self.port,
            },
            _ => self,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            TargetAddr::Ipv6(ip) => write!(f, "[{}]:{}", ip, self.port),
            host => write!(f, "{}:{}", host, self.port),
        }
    }
}

/// How the base destination of a connection is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Connections are routed to the proxy's own address; use the local address.
    #[default]
    Direct,
    /// Connections were rewritten by NAT; use the original destination.
    #[serde(alias = "nat")]
    Redirect,
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(Mode::Direct),
            "redirect" | "nat" => Ok(Mode::Redirect),
            other => anyhow::bail!("unknown mode '{}' (expected direct or redirect)", other),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Direct => "direct",
            Mode::Redirect => "redirect",
        })
    }
}

/// Computes the base destination of accepted connections.
#[derive(Clone)]
pub struct Resolver {
    mode: Mode,
    original_dst: Arc<dyn OriginalDst>,
}

impl Resolver {
    pub fn new(mode: Mode) -> Self {
        Self::with_lookup(mode, Arc::new(SockOptOriginalDst))
    }

    /// Use a custom original-destination lookup for redirect mode.
    pub fn with_lookup(mode: Mode, original_dst: Arc<dyn OriginalDst>) -> Self {
        Self { mode, original_dst }
    }

    pub fn base_destination(&self, stream: &TcpStream) -> Result<Destination, ProxyError> {
        let addr = match self.mode {
            Mode::Direct => stream.local_addr(),
            Mode::Redirect => self.original_dst.original_dst(stream),
        }
        .map_err(ProxyError::Resolution)?;

        Ok(Destination::from_socket_addr(addr))
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver").field("mode", &self.mode).finish()
    }
}
