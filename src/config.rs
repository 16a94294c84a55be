//! Runtime configuration for nodes, routing clients and the HTTP transport,
//! plus the node binary's command line.

use crate::membership::types::ShardMapState;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Storage node settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Period of the background expiration sweep.
    pub sweep_interval: Duration,
    /// Upper bound on a single snapshot request to a peer during migration.
    pub migration_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(1),
            migration_timeout: Duration::from_secs(5),
        }
    }
}

/// Routing client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline for a whole Get/Set/Delete call, write fan-out included.
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP transport settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Send attempts on connection-level failures. HTTP error responses are
    /// never retried.
    pub attempts: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            attempts: 2,
        }
    }
}

/// Command line of `shardkv-node`.
#[derive(Debug, Parser)]
#[command(name = "shardkv-node", about = "Sharded in-memory key-value storage node")]
pub struct NodeArgs {
    /// Name of this node in the shard map.
    #[arg(long)]
    pub node: String,

    /// Shard map JSON file.
    #[arg(long)]
    pub shard_map: PathBuf,

    /// Listen address. Defaults to the node's address and port in the shard map.
    #[arg(long)]
    pub bind: Option<String>,

    #[arg(long, default_value_t = 1000)]
    pub sweep_interval_ms: u64,

    #[arg(long, default_value_t = 5000)]
    pub migration_timeout_ms: u64,

    /// Re-read the shard map file at this period and apply changes.
    #[arg(long)]
    pub reload_interval_ms: Option<u64>,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl NodeArgs {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            sweep_interval: Duration::from_millis(self.sweep_interval_ms.max(1)),
            migration_timeout: Duration::from_millis(self.migration_timeout_ms.max(1)),
        }
    }
}

/// Reads and validates a shard map file.
pub fn load_shard_map(path: &Path) -> Result<ShardMapState> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read shard map {}", path.display()))?;
    let state: ShardMapState = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse shard map {}", path.display()))?;
    state
        .validate()
        .with_context(|| format!("invalid shard map {}", path.display()))?;
    Ok(state)
}
