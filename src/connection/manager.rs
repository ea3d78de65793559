//! Connection Manager Implementation

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use super::handler::{ConnectionContext, ConnectionHandler};
use crate::config::Config;
use crate::destination::Resolver;
use crate::dialer::{self, DialOptions, ProxyUrl};
use crate::relay::{BufferPool, RelayEngine};
use crate::resource::ResourceManager;
use crate::Result;

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// How long aborted connections get to unwind after force-close.
const FORCE_CLOSE_GRACE: Duration = Duration::from_secs(5);
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Accepts connections and runs each through the [`ConnectionHandler`].
pub struct ConnectionManager {
    handler: Arc<ConnectionHandler>,
    resource_manager: Arc<ResourceManager>,
    active_connections: Arc<AtomicUsize>,
    next_connection_id: AtomicU64,
    force_close_tx: broadcast::Sender<()>,
    shutdown_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(
        handler: ConnectionHandler,
        resource_manager: ResourceManager,
        shutdown_timeout: Duration,
    ) -> Self {
        let (force_close_tx, _) = broadcast::channel(1);
        Self {
            handler: Arc::new(handler),
            resource_manager: Arc::new(resource_manager),
            active_connections: Arc::new(AtomicUsize::new(0)),
            next_connection_id: AtomicU64::new(1),
            force_close_tx,
            shutdown_timeout,
        }
    }

    /// Wire resolver, dialer, buffer pool and limits from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let proxy_url = ProxyUrl::parse(&config.upstream.proxy_url)?;
        let dialer = dialer::from_url(
            &proxy_url,
            DialOptions {
                connect_timeout: config.upstream.dial_timeout,
                keepalive: config.upstream.keepalive(),
            },
        );
        info!("Forwarding through {}", proxy_url);

        let handler = ConnectionHandler::new(
            Resolver::new(config.server.mode),
            dialer,
            RelayEngine::new(BufferPool::default()),
        )
        .with_timeouts(config.server.sniff_timeout, config.upstream.dial_timeout);

        Ok(Self::new(
            handler,
            ResourceManager::new(config.server.max_connections),
            config.server.shutdown_timeout,
        ))
    }

    pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
        info!("Binding TCP listener to {}", addr);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;
        info!("Successfully bound to {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind `addr` and serve until `shutdown` resolves.
    pub async fn run<F>(&self, addr: SocketAddr, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = Self::bind(addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Accept connections until `shutdown` resolves, then drain.
    ///
    /// Draining waits up to the shutdown timeout for running connections,
    /// then force-closes whatever is left.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Starting connection acceptance loop");

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!("Accepted connection from {}", addr);

                            let connection_slot = match self.resource_manager.acquire_connection_slot() {
                                Ok(slot) => slot,
                                Err(_) => {
                                    warn!("Connection limit reached, rejecting connection from {}", addr);
                                    continue;
                                }
                            };

                            let ctx = ConnectionContext {
                                id: self.next_connection_id.fetch_add(1, Ordering::Relaxed),
                                client_addr: addr,
                                force_close: self.force_close_tx.subscribe(),
                            };
                            let handler = Arc::clone(&self.handler);
                            let active_connections = Arc::clone(&self.active_connections);

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            tokio::spawn(async move {
                                let _connection_slot = connection_slot;
                                handler.handle(ctx, stream).await;
                                active_connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                            sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Received shutdown signal, stopping connection acceptance");
                    break;
                }
            }
        }

        drop(listener);
        info!("Connection acceptance loop stopped");
        self.drain().await;
        Ok(())
    }

    async fn drain(&self) {
        let start_time = Instant::now();
        info!(
            "Waiting for {} active connections to close (timeout: {:?})",
            self.get_active_connections(),
            self.shutdown_timeout
        );

        if self.wait_for_connections(self.shutdown_timeout).await {
            info!("All connections closed gracefully in {:?}", start_time.elapsed());
            return;
        }

        warn!(
            "Shutdown timeout reached after {:?} with {} connections still active, force-closing",
            start_time.elapsed(),
            self.get_active_connections()
        );
        if self.force_close_tx.send(()).is_err() {
            debug!("No connection is listening for force-close");
        }

        if !self.wait_for_connections(FORCE_CLOSE_GRACE).await {
            warn!(
                "{} connections still active after force-close",
                self.get_active_connections()
            );
        }
    }

    /// Poll until no connection is active. Returns false on timeout.
    async fn wait_for_connections(&self, limit: Duration) -> bool {
        let start_time = Instant::now();
        while self.get_active_connections() > 0 {
            if start_time.elapsed() >= limit {
                return false;
            }
            sleep(DRAIN_POLL_INTERVAL).await;
        }
        true
    }

    pub fn get_active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}
