//! Byte-stream transports and the half-close capability

use std::io;
use std::net::Shutdown;
use std::sync::Arc;

use socket2::{SockRef, Socket};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

/// Closes one direction of a connection while the other stays usable.
pub trait HalfClose: Send + Sync {
    /// Stop receiving; further reads see EOF.
    fn close_read(&self) -> io::Result<()>;
    /// Send FIN to the peer.
    fn close_write(&self) -> io::Result<()>;
}

/// A connection the relay can pump bytes through.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Half-close handle, if the transport supports it.
    ///
    /// Must be taken before the transport is split. The handle may keep the
    /// underlying connection alive, so it should live no longer than the
    /// transport's own halves.
    fn half_close(&self) -> Option<Arc<dyn HalfClose>> {
        None
    }
}

impl Transport for TcpStream {
    fn half_close(&self) -> Option<Arc<dyn HalfClose>> {
        match TcpHalfClose::new(self) {
            Ok(handle) => Some(Arc::new(handle)),
            Err(e) => {
                tracing::debug!(error = %e, "half-close unavailable");
                None
            }
        }
    }
}

impl Transport for DuplexStream {}

/// `shutdown(2)` on a duplicate of a TCP socket descriptor.
#[derive(Debug)]
pub struct TcpHalfClose(Socket);

impl TcpHalfClose {
    pub fn new(stream: &TcpStream) -> io::Result<Self> {
        SockRef::from(stream).try_clone().map(Self)
    }
}

impl HalfClose for TcpHalfClose {
    fn close_read(&self) -> io::Result<()> {
        self.0.shutdown(Shutdown::Read)
    }

    fn close_write(&self) -> io::Result<()> {
        self.0.shutdown(Shutdown::Write)
    }
}
