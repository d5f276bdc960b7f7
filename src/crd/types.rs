//! Shared types for MysqlCluster specifications
//!
//! - [`ClusterMode`] - replication technology the cluster runs
//! - [`ClusterPhase`] - coarse lifecycle phase reported in status
//! - [`StorageConfig`] - data volume sizing and retention after deletion
//! - [`ProxySqlSpec`] - optional ProxySQL routing tier
//! - [`Condition`] - Kubernetes-style status conditions

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Replication technology of a cluster
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ClusterMode {
    /// Group replication with a single writable primary
    #[default]
    #[serde(rename = "MGRSP")]
    MgrSinglePrimary,

    /// Group replication with every member writable
    #[serde(rename = "MGRMP")]
    MgrMultiPrimary,

    /// Galera synchronous multi-master
    GaleraCluster,

    /// Classic source/replica with semi-synchronous acknowledgement
    SemiSync,
}

impl ClusterMode {
    /// Whether the mode is driven by MySQL group replication
    pub fn is_group_replication(&self) -> bool {
        matches!(
            self,
            ClusterMode::MgrSinglePrimary | ClusterMode::MgrMultiPrimary
        )
    }
}

impl std::fmt::Display for ClusterMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterMode::MgrSinglePrimary => write!(f, "MGRSP"),
            ClusterMode::MgrMultiPrimary => write!(f, "MGRMP"),
            ClusterMode::GaleraCluster => write!(f, "GaleraCluster"),
            ClusterMode::SemiSync => write!(f, "SemiSync"),
        }
    }
}

impl std::str::FromStr for ClusterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MGRSP" => Ok(ClusterMode::MgrSinglePrimary),
            "MGRMP" => Ok(ClusterMode::MgrMultiPrimary),
            "GaleraCluster" => Ok(ClusterMode::GaleraCluster),
            "SemiSync" => Ok(ClusterMode::SemiSync),
            other => Err(format!("unknown cluster mode: {other}")),
        }
    }
}

/// Lifecycle phase reported in `status.phase`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClusterPhase {
    #[default]
    NotReady,
    Running,
    Terminating,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterPhase::NotReady => write!(f, "NotReady"),
            ClusterPhase::Running => write!(f, "Running"),
            ClusterPhase::Terminating => write!(f, "Terminating"),
        }
    }
}

/// Data volume configuration
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Storage class name (e.g., "standard", "ssd")
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
    /// Size of each member's PersistentVolumeClaim (e.g., "20Gi")
    #[serde(default = "default_storage_size")]
    pub size: String,
    /// Hours a claim is kept after its cluster is deleted
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u32,
}

fn default_storage_class() -> String {
    "standard".to_string()
}

fn default_storage_size() -> String {
    "20Gi".to_string()
}

fn default_retention_hours() -> u32 {
    168
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_class: default_storage_class(),
            size: default_storage_size(),
            retention_hours: default_retention_hours(),
        }
    }
}

/// ProxySQL routing tier in front of the cluster
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxySqlSpec {
    #[serde(default = "default_proxy_replicas")]
    pub replicas: i32,
    #[serde(default = "default_admin_port")]
    pub admin_port: u16,
    /// Client-facing MySQL port
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default = "default_writer_hostgroup")]
    pub writer_hostgroup: i64,
    #[serde(default = "default_reader_hostgroup")]
    pub reader_hostgroup: i64,
    /// Per-backend connection cap written to mysql_servers
    #[serde(default = "default_max_connections")]
    pub max_connections: i64,
}

fn default_proxy_replicas() -> i32 {
    2
}

fn default_admin_port() -> u16 {
    6032
}

fn default_proxy_port() -> u16 {
    6033
}

fn default_writer_hostgroup() -> i64 {
    10
}

fn default_reader_hostgroup() -> i64 {
    20
}

fn default_max_connections() -> i64 {
    1000
}

impl Default for ProxySqlSpec {
    fn default() -> Self {
        Self {
            replicas: default_proxy_replicas(),
            admin_port: default_admin_port(),
            port: default_proxy_port(),
            writer_hostgroup: default_writer_hostgroup(),
            reader_hostgroup: default_reader_hostgroup(),
            max_connections: default_max_connections(),
        }
    }
}

/// Kubernetes-style status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready", "ProxySynced")
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False", or "Unknown"
    pub status: String,
    pub last_transition_time: String,
    /// Machine-readable reason
    pub reason: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(type_: &str, status: bool, reason: &str, message: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        }
    }

    /// Create a new Ready condition
    pub fn ready(status: bool, reason: &str, message: &str) -> Self {
        Self::new("Ready", status, reason, message)
    }

    /// Set the observed generation for this condition
    pub fn with_observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }
}
