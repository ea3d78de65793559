//! NAT original-destination lookup

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpStream;

/// Recovers the address a redirected connection was originally sent to.
pub trait OriginalDst: Send + Sync {
    fn original_dst(&self, stream: &TcpStream) -> io::Result<SocketAddr>;
}

/// Reads `SO_ORIGINAL_DST` / `IP6T_SO_ORIGINAL_DST` from the accepted socket.
///
/// Only netfilter (Linux, Android) records the pre-NAT destination. Every
/// other platform reports `ErrorKind::Unsupported`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SockOptOriginalDst;

impl OriginalDst for SockOptOriginalDst {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn original_dst(&self, stream: &TcpStream) -> io::Result<SocketAddr> {
        let sock = socket2::SockRef::from(stream);

        // IPv4 clients of a dual-stack listener show up as v4-mapped v6
        // addresses; netfilter tracks them in the IPv4 table.
        let addr = match stream.local_addr()? {
            SocketAddr::V4(_) => sock.original_dst()?,
            SocketAddr::V6(v6) if v6.ip().to_ipv4_mapped().is_some() => sock.original_dst()?,
            SocketAddr::V6(_) => sock.original_dst_ipv6()?,
        };

        addr.as_socket().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "original destination is not an inet address",
            )
        })
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn original_dst(&self, _stream: &TcpStream) -> io::Result<SocketAddr> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "original destination lookup requires netfilter",
        ))
    }
}
