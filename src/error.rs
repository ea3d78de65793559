//! Per-connection error taxonomy
//!
//! Every error here is scoped to a single proxied connection. The handler turns
//! them into log events; none of them reach the accept loop.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::relay::RelayStats;

/// Failure while inspecting the first bytes of a client connection.
#[derive(Debug, Error)]
pub enum SniffError {
    #[error("connection closed before any protocol data was received")]
    Eof,

    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    #[error("invalid TLS ClientHello: {0}")]
    ClientHello(String),

    #[error("invalid HTTP request: {0}")]
    Http(String),

    #[error("sniffing timed out after {0:?}")]
    Timeout(Duration),
}

impl SniffError {
    /// Map a read failure, folding a premature EOF into [`SniffError::Eof`].
    pub(crate) fn from_read(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            SniffError::Eof
        } else {
            SniffError::Io(err)
        }
    }
}

/// Error that ends a proxied connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to resolve destination: {0}")]
    Resolution(#[source] io::Error),

    #[error(transparent)]
    Sniff(#[from] SniffError),

    #[error("failed to connect to proxy server: {0:#}")]
    Dial(#[source] anyhow::Error),

    #[error("force-closed while {0}")]
    Aborted(&'static str),

    #[error("relay failed after {:?}: {source}", stats.elapsed)]
    Relay {
        #[source]
        source: io::Error,
        stats: RelayStats,
    },
}

impl ProxyError {
    /// Short label for the failure category, used as the log message.
    pub fn category(&self) -> &'static str {
        match self {
            ProxyError::Resolution(_) => "resolution failed",
            ProxyError::Sniff(_) => "sniff failed",
            ProxyError::Dial(_) => "dial failed",
            ProxyError::Aborted(_) => "proxy aborted",
            ProxyError::Relay { .. } => "proxy ends with an error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unexpected_eof_maps_to_eof() {
        let err = SniffError::from_read(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert!(matches!(err, SniffError::Eof));

        let err = SniffError::from_read(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(matches!(err, SniffError::Io(_)));
    }

    #[test]
    fn test_categories() {
        let err = ProxyError::Sniff(SniffError::Eof);
        assert_eq!(err.category(), "sniff failed");
        assert_eq!(err.to_string(), "connection closed before any protocol data was received");

        let err = ProxyError::Dial(anyhow::anyhow!("connection refused"));
        assert_eq!(err.category(), "dial failed");
        assert!(err.to_string().contains("connection refused"));

        let err = ProxyError::Aborted("dialing");
        assert_eq!(err.category(), "proxy aborted");
        assert_eq!(err.to_string(), "force-closed while dialing");
    }
}
