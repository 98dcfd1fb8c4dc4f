//! gridq.toml configuration parser.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// gRPC listen address.
    pub listen_addr: String,
    /// Data directory for the persistent state store.
    pub data_dir: PathBuf,
    pub lease: LeaseConfig,
    pub auth: AuthConfig,
    /// Capacity of the (queue, job_set) → id mapping cache.
    pub job_set_cache_capacity: usize,
}

/// Lease negotiation tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Renewal deadline granted on issue and on each renewal, seconds.
    pub ttl_secs: u64,
    /// Interval of the background expiry sweep, seconds.
    pub expiry_sweep_secs: u64,
    /// Upper bound on jobs offered in one streamed batch.
    pub max_batch_size: usize,
}

/// Token-cache tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// TTL for cached valid identities, seconds.
    pub token_ttl_secs: u64,
    /// TTL for cached invalid tokens (negative cache), seconds.
    pub invalid_token_ttl_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:50071".to_string(),
            data_dir: PathBuf::from("/var/lib/gridq"),
            lease: LeaseConfig::default(),
            auth: AuthConfig::default(),
            job_set_cache_capacity: 4096,
        }
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 120,
            expiry_sweep_secs: 15,
            max_batch_size: 256,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: 300,
            invalid_token_ttl_secs: 60,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }
}
