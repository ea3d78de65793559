//! Relay Engine

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinSet;
use tracing::debug;

use super::pool::BufferPool;
use super::transport::{HalfClose, Transport};
use crate::error::ProxyError;
use crate::sniff::Rewind;

/// Direction of a pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// client to upstream
    Upstream,
    /// upstream to client
    Downstream,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Upstream => "client->upstream",
            Direction::Downstream => "upstream->client",
        })
    }
}

/// Outcome counters of one relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_up: u64,
    pub bytes_down: u64,
    pub elapsed: Duration,
}

/// Copies bytes both ways between a client and its upstream.
#[derive(Debug, Clone, Default)]
pub struct RelayEngine {
    pool: BufferPool,
}

impl RelayEngine {
    pub fn new(pool: BufferPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Relay until both directions finish, or until `force_close` resolves.
    ///
    /// `client` may still hold sniffed bytes; they reach the upstream first.
    /// Each direction runs in its own task. When a direction ends, its buffer
    /// goes back to the pool, then the destination's write side and the
    /// source's read side are half-closed where supported. The first error
    /// in completion order fails the relay; EOF is not an error. Resolving
    /// `force_close` aborts both tasks, which drops and closes the
    /// connections.
    pub async fn relay<C, U, F>(
        &self,
        client: Rewind<C>,
        upstream: U,
        force_close: F,
    ) -> Result<RelayStats, ProxyError>
    where
        C: Transport,
        U: Transport,
        F: Future<Output = ()>,
    {
        let start = Instant::now();
        let up_count = Arc::new(AtomicU64::new(0));
        let down_count = Arc::new(AtomicU64::new(0));

        let (prefix, client) = client.into_parts();
        let client_hc = client.half_close();
        let upstream_hc = upstream.half_close();
        let (client_rd, client_wr) = split(client);
        let (upstream_rd, upstream_wr) = split(upstream);
        let client_rd = Rewind::new_buffered(client_rd, prefix);

        let mut pumps = JoinSet::new();
        pumps.spawn(pump(
            Direction::Upstream,
            client_rd,
            upstream_wr,
            Ends {
                dst: upstream_hc.clone(),
                src: client_hc.clone(),
            },
            self.pool.clone(),
            Arc::clone(&up_count),
        ));
        pumps.spawn(pump(
            Direction::Downstream,
            upstream_rd,
            client_wr,
            Ends {
                dst: client_hc,
                src: upstream_hc,
            },
            self.pool.clone(),
            Arc::clone(&down_count),
        ));

        tokio::pin!(force_close);
        let mut first_error: Option<io::Error> = None;

        loop {
            tokio::select! {
                joined = pumps.join_next() => {
                    let Some(joined) = joined else { break };
                    let result = joined.unwrap_or_else(|e| Err(io::Error::other(e)));
                    if let Err(e) = result {
                        first_error.get_or_insert(e);
                    }
                }
                _ = &mut force_close => {
                    debug!("force-closing relay");
                    pumps.abort_all();
                    while pumps.join_next().await.is_some() {}
                    first_error.get_or_insert_with(|| {
                        io::Error::new(io::ErrorKind::ConnectionAborted, "relay force-closed")
                    });
                    break;
                }
            }
        }

        let stats = RelayStats {
            bytes_up: up_count.load(Ordering::Relaxed),
            bytes_down: down_count.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        };

        match first_error {
            None => Ok(stats),
            Some(source) => Err(ProxyError::Relay { source, stats }),
        }
    }
}

/// Half-close handles a pump applies when it finishes.
struct Ends {
    dst: Option<Arc<dyn HalfClose>>,
    src: Option<Arc<dyn HalfClose>>,
}

async fn pump<R, W>(
    direction: Direction,
    mut reader: R,
    mut writer: W,
    ends: Ends,
    pool: BufferPool,
    copied: Arc<AtomicU64>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = pool.checkout();
    let result = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) => break Err(e),
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            break Err(e);
        }
        copied.fetch_add(n as u64, Ordering::Relaxed);
    };
    drop(buf);

    if let Some(dst) = ends.dst {
        if let Err(e) = dst.close_write() {
            debug!(%direction, error = %e, "close_write failed");
        }
    }
    if let Some(src) = ends.src {
        if let Err(e) = src.close_read() {
            debug!(%direction, error = %e, "close_read failed");
        }
    }

    debug!(
        %direction,
        bytes = copied.load(Ordering::Relaxed),
        ok = result.is_ok(),
        "pump finished"
    );
    result
}
