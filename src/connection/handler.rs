//! Per-connection pipeline
//!
//! resolve base destination -> sniff -> refine host -> dial -> relay

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::timeout;
use tracing::{error, field, info, info_span, Instrument, Span};

use crate::destination::Resolver;
use crate::dialer::Dialer;
use crate::error::{ProxyError, SniffError};
use crate::relay::{RelayEngine, RelayStats};
use crate::sniff::{sniff, Rewind};

pub const DEFAULT_SNIFF_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-connection inputs from the accept loop.
#[derive(Debug)]
pub struct ConnectionContext {
    pub id: u64,
    pub client_addr: SocketAddr,
    /// Fires when lingering connections must be torn down.
    pub force_close: broadcast::Receiver<()>,
}

/// Runs the proxy pipeline for accepted connections.
pub struct ConnectionHandler {
    resolver: Resolver,
    dialer: Arc<dyn Dialer>,
    relay: RelayEngine,
    sniff_timeout: Duration,
    dial_timeout: Duration,
}

impl ConnectionHandler {
    pub fn new(resolver: Resolver, dialer: Arc<dyn Dialer>, relay: RelayEngine) -> Self {
        Self {
            resolver,
            dialer,
            relay,
            sniff_timeout: DEFAULT_SNIFF_TIMEOUT,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, sniff_timeout: Duration, dial_timeout: Duration) -> Self {
        self.sniff_timeout = sniff_timeout;
        self.dial_timeout = dial_timeout;
        self
    }

    /// Proxy one connection to completion. Failures are logged, never returned.
    pub async fn handle(&self, ctx: ConnectionContext, stream: TcpStream) {
        let span = info_span!(
            "access",
            id = ctx.id,
            client_addr = %ctx.client_addr,
            dest_addr = field::Empty,
            is_tls = field::Empty,
        );

        async move {
            match self.proxy(stream, ctx.force_close).await {
                Ok(stats) => info!(
                    elapsed = stats.elapsed.as_secs_f64(),
                    bytes_up = stats.bytes_up,
                    bytes_down = stats.bytes_down,
                    "proxy ends"
                ),
                Err(ProxyError::Relay { source, stats }) => error!(
                    elapsed = stats.elapsed.as_secs_f64(),
                    bytes_up = stats.bytes_up,
                    bytes_down = stats.bytes_down,
                    error = %source,
                    "proxy ends with an error"
                ),
                Err(e) => error!(error = %e, "{}", e.category()),
            }
        }
        .instrument(span)
        .await
    }

    async fn proxy(
        &self,
        stream: TcpStream,
        force_close: broadcast::Receiver<()>,
    ) -> Result<RelayStats, ProxyError> {
        let base = self.resolver.base_destination(&stream)?;

        // Force-close applies to sniffing and dialing as well as the relay.
        let force = force_closed(force_close);
        tokio::pin!(force);

        let mut client = Rewind::new(stream);
        let outcome = tokio::select! {
            sniffed = timeout(self.sniff_timeout, sniff(&mut client)) => {
                sniffed.map_err(|_| SniffError::Timeout(self.sniff_timeout))??
            }
            _ = &mut force => return Err(ProxyError::Aborted("sniffing")),
        };

        let span = Span::current();
        span.record("is_tls", outcome.is_tls);

        let dest = base.with_hostname(outcome.hostname.as_deref());
        span.record("dest_addr", field::display(&dest));

        let upstream = tokio::select! {
            dialed = timeout(self.dial_timeout, self.dialer.dial(&dest)) => dialed
                .map_err(|_| {
                    ProxyError::Dial(anyhow!("dial {} timed out after {:?}", dest, self.dial_timeout))
                })?
                .map_err(ProxyError::Dial)?,
            _ = &mut force => return Err(ProxyError::Aborted("dialing")),
        };

        info!("proxy starts");
        self.relay.relay(client, upstream, force).await
    }
}

/// Resolves on force-close. A dropped sender never forces anything.
async fn force_closed(mut rx: broadcast::Receiver<()>) {
    match rx.recv().await {
        Ok(()) | Err(RecvError::Lagged(_)) => {}
        Err(RecvError::Closed) => std::future::pending().await,
    }
}
