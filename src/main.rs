//! transocks - transparent proxy forwarding through SOCKS5 or HTTP CONNECT

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use transocks::config::{Config, ConfigManager, LogFormat};
use transocks::{ConnectionManager, Mode, ShutdownCoordinator};

/// CLI arguments for transocks
#[derive(Parser, Debug)]
#[command(name = "transocks")]
#[command(about = "Transparent proxy that forwards through SOCKS5 or HTTP CONNECT")]
#[command(version)]
#[command(long_about = "
Transparent proxy that forwards through SOCKS5 or HTTP CONNECT.

The destination of each connection is its local address (direct mode) or
the NAT original destination (redirect mode). A TLS SNI or HTTP Host found
in the first bytes replaces the destination host; the port is kept.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  TRANSOCKS_LISTEN_ADDR       - Listen address (e.g., 127.0.0.1:1081)
  TRANSOCKS_MODE              - direct or redirect (alias: nat)
  TRANSOCKS_PROXY_URL         - socks5://, socks5h:// or http:// proxy URL
  TRANSOCKS_SHUTDOWN_TIMEOUT  - Grace period on shutdown (e.g., 1m)
  TRANSOCKS_SNIFF_TIMEOUT     - Limit for reading SNI / Host (e.g., 10s)
  TRANSOCKS_MAX_CONNECTIONS   - Maximum concurrent connections
  TRANSOCKS_DIAL_TIMEOUT      - Limit for dialing through the proxy
  TRANSOCKS_KEEPALIVE         - TCP keepalive to the proxy (0s disables)
  TRANSOCKS_LOG_LEVEL         - trace, debug, info, warn, error
  TRANSOCKS_LOG_FORMAT        - text or json
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, default_value = "transocks.toml")]
    pub config: PathBuf,

    /// Listen address (overrides config file)
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,

    /// Destination mode: direct or redirect
    #[arg(short, long)]
    pub mode: Option<Mode>,

    /// Forward proxy URL
    #[arg(short = 'x', long)]
    pub proxy_url: Option<String>,

    /// Grace period for running connections on shutdown (e.g., 30s)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub shutdown_timeout: Option<Duration>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long)]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // CLI args > config file > environment > defaults
    let mut config = ConfigManager::load(&args.config)?;
    config.merge_with_cli_args(
        args.listen,
        args.mode,
        args.proxy_url.as_deref(),
        args.shutdown_timeout,
        args.log_level.as_deref(),
    );

    init_tracing(&config, args.verbose)?;

    config
        .validate()
        .context("Final configuration validation failed")?;

    if args.validate_config {
        info!("Configuration is valid");
        info!("  Listen address: {}", config.server.listen_addr);
        info!("  Mode: {}", config.server.mode);
        info!("  Max connections: {}", config.server.max_connections);
        info!("  Shutdown timeout: {:?}", config.server.shutdown_timeout);
        info!("  Sniff timeout: {:?}", config.server.sniff_timeout);
        info!("  Dial timeout: {:?}", config.upstream.dial_timeout);
        return Ok(());
    }

    info!("Starting transocks v{}", env!("CARGO_PKG_VERSION"));
    info!("Listen address: {}", config.server.listen_addr);
    info!("Mode: {}", config.server.mode);

    let manager = ConnectionManager::from_config(&config)?;
    let shutdown_coordinator = ShutdownCoordinator::new();
    let shutdown = shutdown_coordinator.requested();

    let signals = shutdown_coordinator.clone();
    tokio::spawn(async move {
        if let Err(e) = signals.listen_for_signals().await {
            error!("Error setting up signal handlers: {}", e);
        }
    });

    manager.run(config.server.listen_addr, shutdown).await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let log_level = if verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    match config.logging.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_level(true),
            )
            .try_init(),
    }
    .context("Failed to initialize logging")?;

    Ok(())
}
