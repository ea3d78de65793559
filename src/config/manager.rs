//! Configuration Manager

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};

use super::{Config, LogFormat};
use crate::destination::Mode;
use crate::dialer::ProxyUrl;
use crate::Result;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from a TOML file. Missing keys take their defaults.
    pub fn load_from_file(path: &Path) -> Result<Config> {
        tracing::info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from `TRANSOCKS_*` environment variables over defaults.
    pub fn load_from_env() -> Result<Config> {
        let mut config = Config::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// The file if it exists, otherwise the environment.
    pub fn load(path: &Path) -> Result<Config> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!(
                "Config file {} not found, checking environment variables",
                path.display()
            );
            Self::load_from_env()
        }
    }
}

impl Config {
    /// Override fields from environment-style `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("TRANSOCKS_LISTEN_ADDR") {
            self.server.listen_addr = addr
                .parse::<SocketAddr>()
                .with_context(|| format!("Invalid TRANSOCKS_LISTEN_ADDR: {}", addr))?;
        }

        if let Some(mode) = lookup("TRANSOCKS_MODE") {
            self.server.mode = mode
                .parse::<Mode>()
                .with_context(|| format!("Invalid TRANSOCKS_MODE: {}", mode))?;
        }

        if let Some(timeout) = lookup("TRANSOCKS_SHUTDOWN_TIMEOUT") {
            self.server.shutdown_timeout = parse_duration("TRANSOCKS_SHUTDOWN_TIMEOUT", &timeout)?;
        }

        if let Some(timeout) = lookup("TRANSOCKS_SNIFF_TIMEOUT") {
            self.server.sniff_timeout = parse_duration("TRANSOCKS_SNIFF_TIMEOUT", &timeout)?;
        }

        if let Some(max_conn) = lookup("TRANSOCKS_MAX_CONNECTIONS") {
            self.server.max_connections = max_conn
                .parse::<usize>()
                .with_context(|| format!("Invalid TRANSOCKS_MAX_CONNECTIONS: {}", max_conn))?;
        }

        if let Some(url) = lookup("TRANSOCKS_PROXY_URL") {
            self.upstream.proxy_url = url;
        }

        if let Some(timeout) = lookup("TRANSOCKS_DIAL_TIMEOUT") {
            self.upstream.dial_timeout = parse_duration("TRANSOCKS_DIAL_TIMEOUT", &timeout)?;
        }

        if let Some(keepalive) = lookup("TRANSOCKS_KEEPALIVE") {
            self.upstream.keepalive = parse_duration("TRANSOCKS_KEEPALIVE", &keepalive)?;
        }

        if let Some(level) = lookup("TRANSOCKS_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("TRANSOCKS_LOG_FORMAT") {
            self.logging.format = format
                .parse::<LogFormat>()
                .with_context(|| format!("Invalid TRANSOCKS_LOG_FORMAT: {}", format))?;
        }

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .context("Server configuration validation failed")?;
        self.validate_upstream_config()
            .context("Upstream configuration validation failed")?;
        self.validate_logging_config()
            .context("Logging configuration validation failed")?;
        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if self.server.max_connections > 1_000_000 {
            bail!("max_connections cannot exceed 1,000,000");
        }

        if self.server.sniff_timeout.is_zero() {
            bail!("sniff_timeout must be greater than 0");
        }

        if self.server.shutdown_timeout > Duration::from_secs(3600) {
            bail!("shutdown_timeout cannot exceed 1 hour");
        }

        Ok(())
    }

    fn validate_upstream_config(&self) -> Result<()> {
        if self.upstream.proxy_url.is_empty() {
            bail!("proxy_url is required");
        }

        ProxyUrl::parse(&self.upstream.proxy_url)?;

        if self.upstream.dial_timeout.is_zero() {
            bail!("dial_timeout must be greater than 0");
        }

        Ok(())
    }

    fn validate_logging_config(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            bail!(
                "logging.level must be one of: {}",
                VALID_LOG_LEVELS.join(", ")
            );
        }
        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(
        &mut self,
        listen: Option<SocketAddr>,
        mode: Option<Mode>,
        proxy_url: Option<&str>,
        shutdown_timeout: Option<Duration>,
        log_level: Option<&str>,
    ) {
        if let Some(addr) = listen {
            self.server.listen_addr = addr;
            tracing::info!("CLI override: listen address set to {}", addr);
        }

        if let Some(mode) = mode {
            self.server.mode = mode;
            tracing::info!("CLI override: mode set to {}", mode);
        }

        if let Some(url) = proxy_url {
            self.upstream.proxy_url = url.to_string();
            tracing::info!("CLI override: proxy URL set");
        }

        if let Some(timeout) = shutdown_timeout {
            self.server.shutdown_timeout = timeout;
            tracing::info!("CLI override: shutdown timeout set to {:?}", timeout);
        }

        if let Some(level) = log_level {
            self.logging.level = level.to_string();
        }
    }
}

fn parse_duration(key: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).with_context(|| format!("Invalid {}: {}", key, value))
}
