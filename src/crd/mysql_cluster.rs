//! MysqlCluster Custom Resource Definition
//!
//! A MysqlCluster declares a set of MySQL replicas running one replication
//! mode, optionally fronted by a ProxySQL tier.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{ClusterMode, ClusterPhase, Condition, ProxySqlSpec, StorageConfig};

/// Largest group replication membership MySQL accepts
pub const MAX_GROUP_REPLICATION_MEMBERS: i32 = 9;

/// Structured validation error for `MysqlClusterSpec`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
    pub how_to_fix: String,
}

impl SpecValidationError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        how_to_fix: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            how_to_fix: how_to_fix.into(),
        }
    }
}

impl std::fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} ({})", self.field, self.message, self.how_to_fix)
    }
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "mysql.operator.dev",
    version = "v1alpha1",
    kind = "MysqlCluster",
    namespaced,
    status = "MysqlClusterStatus",
    shortname = "mysql",
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".spec.mode"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Master","type":"string","jsonPath":".status.master"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MysqlClusterSpec {
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    #[serde(default)]
    pub mode: ClusterMode,

    /// MySQL image tag
    #[serde(default = "default_version")]
    pub version: String,

    /// Secret holding root, replication, application and ProxySQL credentials
    pub secret_name: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// SemiSync only: the first two members are both masters replicating
    /// from each other
    #[serde(default)]
    pub dual_master: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxysql: Option<ProxySqlSpec>,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Deadline for all database and proxy operations in one pass
    #[serde(default = "default_operation_timeout_seconds")]
    pub operation_timeout_seconds: u64,
}

fn default_replicas() -> i32 {
    3
}

fn default_version() -> String {
    "8.0".to_string()
}

fn default_port() -> u16 {
    3306
}

fn default_operation_timeout_seconds() -> u64 {
    30
}

impl MysqlClusterSpec {
    /// Validate the spec
    ///
    /// Collects every problem rather than stopping at the first one.
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors: Vec<SpecValidationError> = Vec::new();

        if self.replicas < 1 {
            errors.push(SpecValidationError::new(
                "spec.replicas",
                format!("replicas must be at least 1, got {}", self.replicas),
                "Set spec.replicas to 1 or greater.",
            ));
        }

        if self.mode.is_group_replication() && self.replicas > MAX_GROUP_REPLICATION_MEMBERS {
            errors.push(SpecValidationError::new(
                "spec.replicas",
                format!(
                    "group replication supports at most {} members",
                    MAX_GROUP_REPLICATION_MEMBERS
                ),
                "Lower spec.replicas or use SemiSync mode.",
            ));
        }

        if self.secret_name.trim().is_empty() {
            errors.push(SpecValidationError::new(
                "spec.secretName",
                "secretName must not be empty",
                "Reference a Secret containing at least the root-password key.",
            ));
        }

        if self.dual_master {
            if self.mode != ClusterMode::SemiSync {
                errors.push(SpecValidationError::new(
                    "spec.dualMaster",
                    "dualMaster is only supported in SemiSync mode",
                    "Set spec.mode to SemiSync or remove spec.dualMaster.",
                ));
            }
            if self.replicas < 2 {
                errors.push(SpecValidationError::new(
                    "spec.dualMaster",
                    "dualMaster requires at least 2 replicas",
                    "Set spec.replicas to 2 or greater.",
                ));
            }
        }

        if self.operation_timeout_seconds == 0 {
            errors.push(SpecValidationError::new(
                "spec.operationTimeoutSeconds",
                "operationTimeoutSeconds must be positive",
                "Set spec.operationTimeoutSeconds to a value such as 30.",
            ));
        }

        if let Some(ref proxysql) = self.proxysql {
            if proxysql.replicas < 1 {
                errors.push(SpecValidationError::new(
                    "spec.proxysql.replicas",
                    "proxysql.replicas must be at least 1",
                    "Set spec.proxysql.replicas to 1 or greater, or remove spec.proxysql.",
                ));
            }
            if proxysql.writer_hostgroup == proxysql.reader_hostgroup {
                errors.push(SpecValidationError::new(
                    "spec.proxysql.readerHostgroup",
                    "writer and reader hostgroups must differ",
                    "Choose distinct values for writerHostgroup and readerHostgroup.",
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn container_image(&self) -> String {
        format!("mysql:{}", self.version)
    }
}

/// Observed state of a MysqlCluster
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MysqlClusterStatus {
    #[serde(default)]
    pub phase: ClusterPhase,

    /// Every declared member, in ordinal order
    #[serde(default)]
    pub members: Vec<String>,

    /// Members reporting running replication
    #[serde(default)]
    pub healthy_members: Vec<String>,

    /// Member currently acting as master or primary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub master: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
