//! Application configuration
//!
//! Assembled from defaults in `core::constants`, environment variables and
//! CLI flags (CLI wins). The broker tunables live in `broker::TopicConfig`
//! and are resolved the same way.

use anyhow::{Context, Result};
use std::net::SocketAddr;

use crate::broker::TopicConfig;

use super::cli::Cli;
use super::constants::{DEFAULT_HOST, DEFAULT_PORT};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    /// Resolve the bind address
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        let ip = self
            .host
            .parse()
            .with_context(|| format!("invalid host address: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Top-level application configuration
#[derive(Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub topic: TopicConfig,
}

impl AppConfig {
    /// Load configuration from CLI flags and environment
    pub fn load(cli: &Cli) -> Result<Self> {
        let server = ServerConfig {
            host: cli.host.clone().unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.unwrap_or(DEFAULT_PORT),
        };

        // Fail fast on an unparseable host instead of at bind time
        server.bind_addr()?;

        Ok(Self {
            server,
            topic: TopicConfig::default(),
        })
    }
}
