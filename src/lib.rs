//! transocks
//!
//! Transparent TCP proxy. Connections redirected to it by NAT rules (or routed
//! to it directly) are inspected without being altered: a TLS ClientHello
//! yields the SNI, a plain HTTP request yields its Host. The hostname replaces
//! the IP of the original destination and the connection is relayed through
//! a SOCKS5 or HTTP CONNECT forward proxy.

pub mod config;
pub mod connection;
pub mod destination;
pub mod dialer;
pub mod error;
pub mod relay;
pub mod resource;
pub mod shutdown;
pub mod sniff;

pub use config::Config;
pub use connection::{ConnectionHandler, ConnectionManager};
pub use destination::{Destination, Mode, Resolver};
pub use error::{ProxyError, SniffError};
pub use resource::ResourceManager;
pub use shutdown::ShutdownCoordinator;

/// Common error type for startup, configuration and dialing
pub type Result<T> = anyhow::Result<T>;
