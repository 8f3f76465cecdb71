//! Configuration management for DFS nodes

use crate::error::{DfsError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Wire-level settings shared by every node
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Largest accepted gRPC message in bytes
    pub max_message_size: u32,
    /// Timeout for a single unary request
    pub request_timeout_ms: u64,
    /// Timeout for establishing a connection
    pub connect_timeout_ms: u64,
    /// Slowest upload rate tolerated, in bytes per second; extends the
    /// request timeout of a block push in proportion to its size
    pub min_transfer_rate: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_message_size: crate::DEFAULT_MAX_MESSAGE_SIZE,
            request_timeout_ms: 30_000,
            connect_timeout_ms: 2_000,
            min_transfer_rate: 1024 * 1024,
        }
    }
}

impl NetworkConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Deadline for moving `bytes` in one streamed call
    pub fn transfer_timeout(&self, bytes: u64) -> Duration {
        let rate = self.min_transfer_rate.max(1);
        self.request_timeout() + Duration::from_millis(bytes.saturating_mul(1000) / rate)
    }
}

/// How the coordinator finds data-nodes at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Number of ordinal-indexed workers to dial
    pub worker_count: usize,
    /// Host name pattern, `{}` is replaced with the ordinal
    pub host_pattern: String,
    /// Port every worker listens on
    pub base_port: u16,
    /// Explicit addresses; when non-empty the pattern is ignored
    pub static_addresses: Vec<String>,
    /// Timeout for the identity lookup sent to each worker
    pub lookup_timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            host_pattern: "worker-{}.worker-headless".to_string(),
            base_port: 50051,
            static_addresses: Vec::new(),
            lookup_timeout_ms: 2_000,
        }
    }
}

impl DiscoveryConfig {
    /// Addresses to contact, in ordinal order
    pub fn addresses(&self) -> Vec<String> {
        if !self.static_addresses.is_empty() {
            return self.static_addresses.clone();
        }
        (0..self.worker_count)
            .map(|i| format!("{}:{}", self.host_pattern.replace("{}", &i.to_string()), self.base_port))
            .collect()
    }
}

/// Coordinator log replication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub enabled: bool,
    /// Explicit peer addresses; when empty they are derived from the pattern
    pub peers: Vec<String>,
    /// Number of coordinators in the cluster, self included
    pub cluster_size: usize,
    /// Peer host name pattern, `{}` is replaced with the ordinal
    pub peer_pattern: String,
    pub peer_port: u16,
    /// Acknowledgements required, the local write counts as one
    pub required_acks: usize,
    pub timeout_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            peers: Vec::new(),
            cluster_size: 3,
            peer_pattern: "master-{}.master-headless.datalake.svc.cluster.local".to_string(),
            peer_port: 50055,
            required_acks: crate::DEFAULT_REPLICATION_QUORUM,
            timeout_ms: 5_000,
        }
    }
}

impl ReplicationConfig {
    /// Peer addresses excluding the host named `own_hostname`
    pub fn peer_addresses(&self, own_hostname: &str) -> Vec<String> {
        if !self.peers.is_empty() {
            return self.peers.clone();
        }
        (0..self.cluster_size)
            .filter_map(|i| {
                let host = self.peer_pattern.replace("{}", &i.to_string());
                let short = host.split('.').next().unwrap_or(&host);
                if short == own_hostname {
                    None
                } else {
                    Some(format!("{}:{}", host, self.peer_port))
                }
            })
            .collect()
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Coordinator ID (restored from the snapshot or generated if not specified)
    pub node_id: Option<String>,
    /// Address for the RPC listener
    pub bind_address: String,
    /// Directory holding the snapshot and the operation log
    pub data_dir: PathBuf,
    pub discovery: DiscoveryConfig,
    pub replication: ReplicationConfig,
    pub network: NetworkConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            bind_address: "0.0.0.0:50055".to_string(),
            data_dir: PathBuf::from("/data"),
            discovery: DiscoveryConfig::default(),
            replication: ReplicationConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl MasterConfig {
    /// Load configuration from a TOML, YAML or JSON file
    pub async fn from_file(path: &str) -> Result<Self> {
        load_config_file(path).await
    }

    /// Like `from_file`, but a missing file yields the defaults
    pub async fn load_or_default(path: &str) -> Result<Self> {
        Ok(load_config_file_if_present(path).await?.unwrap_or_default())
    }

    /// Apply `DFS_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("DFS_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(port) = env_port("GRPC_PORT") {
            self.bind_address = format!("0.0.0.0:{}", port);
        }
        if let Ok(count) = std::env::var("DFS_WORKER_COUNT") {
            match count.parse() {
                Ok(n) => self.discovery.worker_count = n,
                Err(_) => tracing::warn!("Ignoring invalid DFS_WORKER_COUNT: {}", count),
            }
        }
        if let Ok(workers) = std::env::var("DFS_WORKERS") {
            self.discovery.static_addresses = split_list(&workers);
        }
        if let Ok(peers) = std::env::var("DFS_MASTER_PEERS") {
            self.replication.peers = split_list(&peers);
            self.replication.enabled = !self.replication.peers.is_empty();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.replication.enabled && self.replication.required_acks == 0 {
            return Err(DfsError::ConfigError(
                "replication.required_acks must be at least 1".to_string(),
            ));
        }
        if self.discovery.static_addresses.is_empty() && self.discovery.worker_count == 0 {
            return Err(DfsError::ConfigError(
                "discovery needs a worker_count or static_addresses".to_string(),
            ));
        }
        Ok(())
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join("master_node_state.json")
    }

    pub fn oplog_path(&self) -> PathBuf {
        self.data_dir.join("master_op.log")
    }
}

/// Data-node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Worker ID (restored from the state file or generated if not specified)
    pub worker_id: Option<Uuid>,
    /// Address for the RPC listener
    pub bind_address: String,
    /// Address reported to the coordinator; derived from the host name when unset
    pub advertise_address: Option<String>,
    /// Address for the HTTP read path and metrics
    pub http_bind_address: String,
    /// Directory holding `<id>.bin` and `<id>.checksum` files
    pub storage_dir: PathBuf,
    /// Seconds between integrity scans
    pub integrity_check_interval_secs: u64,
    /// Verify a block against its checksum before serving it
    pub verify_on_read: bool,
    pub network: NetworkConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: None,
            bind_address: "0.0.0.0:50051".to_string(),
            advertise_address: None,
            http_bind_address: "0.0.0.0:8080".to_string(),
            storage_dir: PathBuf::from("/data"),
            integrity_check_interval_secs: 3600,
            verify_on_read: true,
            network: NetworkConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a TOML, YAML or JSON file
    pub async fn from_file(path: &str) -> Result<Self> {
        load_config_file(path).await
    }

    /// Like `from_file`, but a missing file yields the defaults
    pub async fn load_or_default(path: &str) -> Result<Self> {
        Ok(load_config_file_if_present(path).await?.unwrap_or_default())
    }

    /// Apply `GRPC_PORT`, `HTTP_PORT` and `DFS_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("DFS_DATA_DIR") {
            self.storage_dir = PathBuf::from(dir);
        }
        if let Some(port) = env_port("GRPC_PORT") {
            self.bind_address = format!("0.0.0.0:{}", port);
        }
        if let Some(port) = env_port("HTTP_PORT") {
            self.http_bind_address = format!("0.0.0.0:{}", port);
        }
        if let Ok(address) = std::env::var("DFS_ADVERTISE_ADDRESS") {
            self.advertise_address = Some(address);
        }
    }

    pub fn integrity_check_interval(&self) -> Duration {
        Duration::from_secs(self.integrity_check_interval_secs.max(1))
    }

    pub fn state_path(&self) -> PathBuf {
        self.storage_dir.join("worker_node_state.json")
    }

    /// Address other nodes should dial: the configured one, or
    /// `<hostname>.worker-headless:<port>`
    pub fn resolved_advertise_address(&self) -> String {
        if let Some(address) = &self.advertise_address {
            return address.clone();
        }
        let port = self
            .bind_address
            .rsplit(':')
            .next()
            .unwrap_or("50051")
            .to_string();
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        format!("{}.worker-headless:{}", hostname, port)
    }
}

/// Read a config file, choosing the format by extension
pub async fn load_config_file<T: DeserializeOwned>(path: &str) -> Result<T> {
    load_config_file_if_present(path)
        .await?
        .ok_or_else(|| DfsError::ConfigError(format!("Config file {} not found", path)))
}

/// Read a config file; `None` only when it does not exist
pub async fn load_config_file_if_present<T: DeserializeOwned>(path: &str) -> Result<Option<T>> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("Config file {} not found, using defaults", path);
            return Ok(None);
        }
        Err(e) => {
            return Err(DfsError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path, e
            )))
        }
    };
    parse_config(path, &content).map(Some)
}

fn parse_config<T: DeserializeOwned>(path: &str, content: &str) -> Result<T> {
    if path.ends_with(".toml") {
        toml::from_str(content)
            .map_err(|e| DfsError::ConfigError(format!("Failed to parse TOML config: {}", e)))
    } else if path.ends_with(".yaml") || path.ends_with(".yml") {
        serde_yaml::from_str(content)
            .map_err(|e| DfsError::ConfigError(format!("Failed to parse YAML config: {}", e)))
    } else if path.ends_with(".json") {
        serde_json::from_str(content)
            .map_err(|e| DfsError::ConfigError(format!("Failed to parse JSON config: {}", e)))
    } else {
        Err(DfsError::ConfigError("Unknown config file format".to_string()))
    }
}

fn env_port(name: &str) -> Option<u16> {
    let raw = std::env::var(name).ok()?;
    match raw.trim_start_matches(':').parse() {
        Ok(port) => Some(port),
        Err(_) => {
            tracing::warn!("Ignoring invalid {}: {}", name, raw);
            None
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
