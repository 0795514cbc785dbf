//! Configuration schema and loader for ringkv nodes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Cluster-unique identifier of this node. Used in vector clocks and on
    /// the hash ring, so it must never be reused for a different node.
    pub node_id: String,

    /// This node's listen address.
    pub listen: SocketAddr,

    /// Cluster / quorum settings.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Grace period for in-flight requests on shutdown, in seconds.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,

    /// Optional Prometheus metrics HTTP port.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Peer nodes (everything in the cluster except this node).
    #[serde(default)]
    pub peers: Vec<PeerConfig>,

    /// Replication factor (N).
    #[serde(default = "default_n")]
    pub n: usize,

    /// Write quorum (W).
    #[serde(default = "default_w")]
    pub w: usize,

    /// Read quorum (R).
    #[serde(default = "default_r")]
    pub r: usize,

    /// Virtual nodes per physical node on the hash ring.
    #[serde(default = "default_vnodes")]
    pub vnodes: usize,

    /// Per-peer request timeout in milliseconds.
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,

    /// Overall deadline for a read or write operation in milliseconds.
    #[serde(default = "default_op_deadline_ms")]
    pub op_deadline_ms: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            n: default_n(),
            w: default_w(),
            r: default_r(),
            vnodes: default_vnodes(),
            rpc_timeout_ms: default_rpc_timeout_ms(),
            op_deadline_ms: default_op_deadline_ms(),
        }
    }
}

/// One peer entry: `id` plus its `host:port` address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub id: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory for WAL and snapshots. Each node stores under
    /// `<data_dir>/<node_id>`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Seconds between automatic snapshots.
    #[serde(default = "default_snapshot_interval_secs")]
    pub snapshot_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_interval_secs: default_snapshot_interval_secs(),
        }
    }
}

// --- Defaults ---

fn default_n() -> usize {
    3
}
fn default_w() -> usize {
    2
}
fn default_r() -> usize {
    2
}
fn default_vnodes() -> usize {
    150
}
fn default_rpc_timeout_ms() -> u64 {
    3000
}
fn default_op_deadline_ms() -> u64 {
    5000
}
fn default_snapshot_interval_secs() -> u64 {
    60
}
fn default_shutdown_grace_secs() -> u64 {
    15
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl NodeConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_id.is_empty() {
            return Err(ConfigError::Invalid("node_id must not be empty".into()));
        }
        if self.cluster.n == 0 {
            return Err(ConfigError::Invalid("cluster.n must be > 0".into()));
        }
        if self.cluster.w == 0 || self.cluster.r == 0 {
            return Err(ConfigError::Invalid(
                "cluster.w and cluster.r must be > 0".into(),
            ));
        }
        if self.cluster.w > self.cluster.n {
            return Err(ConfigError::Invalid(format!(
                "cluster.w ({}) must be <= cluster.n ({})",
                self.cluster.w, self.cluster.n
            )));
        }
        if self.cluster.r > self.cluster.n {
            return Err(ConfigError::Invalid(format!(
                "cluster.r ({}) must be <= cluster.n ({})",
                self.cluster.r, self.cluster.n
            )));
        }
        if self.cluster.w + self.cluster.r <= self.cluster.n {
            return Err(ConfigError::Invalid(format!(
                "W ({}) + R ({}) must be > N ({}) for quorum overlap",
                self.cluster.w, self.cluster.r, self.cluster.n
            )));
        }

        let mut seen = HashSet::new();
        for peer in &self.cluster.peers {
            if peer.id == self.node_id {
                return Err(ConfigError::Invalid(format!(
                    "peer id {} duplicates node_id",
                    peer.id
                )));
            }
            if !seen.insert(&peer.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate peer id {}",
                    peer.id
                )));
            }
        }
        Ok(())
    }
}

/// Load a `NodeConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<NodeConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    load_from_str(&contents)
}

/// Load a `NodeConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<NodeConfig, ConfigError> {
    let config: NodeConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
