//! Error types for the MySQL operator
//!
//! One error enum covers the reconciler, the cluster strategies and the
//! ProxySQL synchronizer. Node-local variants (`ConnectFailed`,
//! `QueryFailed`, `NodeTimeout`, `AlreadyRunning`) are absorbed by aggregate
//! operations; structural variants abort the reconciliation pass.

use std::time::Duration;

use thiserror::Error;

use crate::crd::ClusterMode;

#[derive(Error, Debug)]
pub enum Error {
    /// Could not open a connection to a MySQL or ProxySQL endpoint
    #[error("Failed to connect to {host}: {source}")]
    ConnectFailed {
        host: String,
        #[source]
        source: sqlx::Error,
    },

    /// A statement failed on an open connection
    #[error("Query failed on {host}: {source}")]
    QueryFailed {
        host: String,
        #[source]
        source: sqlx::Error,
    },

    /// Replication is already active on the node; not a real failure
    #[error("Replication already running on {host}")]
    AlreadyRunning { host: String },

    /// No node reported itself as master
    #[error("No master found in cluster")]
    MasterNotFound,

    /// One node did not answer within the per-node timeout
    #[error("Timed out after {after:?} waiting for {host}")]
    NodeTimeout { host: String, after: Duration },

    /// The caller-supplied deadline elapsed
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// The caller cancelled the operation before it started
    #[error("Operation cancelled")]
    OperationCancelled,

    /// Bootstrapping or joining a node failed
    #[error("Bootstrap or join failed on {host}: {source}")]
    BootstrapOrJoinFailed {
        host: String,
        #[source]
        source: Box<Error>,
    },

    /// A single ProxySQL admin row could not be written
    #[error("Admin sync failed for {table} row {key}: {source}")]
    AdminSyncFailed {
        table: String,
        key: String,
        #[source]
        source: Box<Error>,
    },

    /// Cluster mode is recognized but has no strategy implementation
    #[error("Cluster mode {0} is not supported")]
    UnsupportedMode(ClusterMode),

    /// Spec validation failed
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Operator or resource configuration is unusable
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Config document text could not be parsed
    #[error("Config parse error at line {line}: {message}")]
    ConfigParse { line: usize, message: String },

    /// Credentials secret lacks a required key
    #[error("Secret {secret} is missing key {key}")]
    MissingSecretKey { secret: String, key: String },

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Filesystem error while writing rendered config
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Finalizer helper failed
    #[error("Finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),
}

impl From<kube::runtime::finalizer::Error<Error>> for Error {
    fn from(e: kube::runtime::finalizer::Error<Error>) -> Self {
        Error::FinalizerError(Box::new(e))
    }
}

impl Error {
    /// Whether the controller should requeue quickly after this error
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::ConnectFailed { .. }
            | Error::QueryFailed { .. }
            | Error::NodeTimeout { .. }
            | Error::MasterNotFound
            | Error::DeadlineExceeded
            | Error::OperationCancelled
            | Error::AdminSyncFailed { .. }
            | Error::BootstrapOrJoinFailed { .. } => true,
            Error::KubeError(kube::Error::Api(e)) => e.code >= 500 || e.code == 429,
            Error::KubeError(_) => true,
            Error::FinalizerError(_) => true,
            Error::AlreadyRunning { .. }
            | Error::UnsupportedMode(_)
            | Error::ValidationError(_)
            | Error::ConfigError(_)
            | Error::ConfigParse { .. }
            | Error::MissingSecretKey { .. }
            | Error::SerializationError(_)
            | Error::IoError(_) => false,
        }
    }

    /// Short category used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ConnectFailed { .. } => "connect",
            Error::QueryFailed { .. } => "query",
            Error::NodeTimeout { .. } => "node_timeout",
            Error::AlreadyRunning { .. } => "already_running",
            Error::MasterNotFound => "master_not_found",
            Error::DeadlineExceeded => "deadline",
            Error::OperationCancelled => "cancelled",
            Error::BootstrapOrJoinFailed { .. } => "bootstrap_or_join",
            Error::AdminSyncFailed { .. } => "admin_sync",
            Error::UnsupportedMode(_) => "unsupported_mode",
            Error::ValidationError(_) => "validation",
            Error::ConfigError(_) | Error::ConfigParse { .. } => "config",
            Error::MissingSecretKey { .. } => "secret",
            Error::KubeError(_) => "kube",
            Error::SerializationError(_) => "serialization",
            Error::IoError(_) => "io",
            Error::FinalizerError(_) => "finalizer",
        }
    }

    pub(crate) fn query(host: &str, source: sqlx::Error) -> Self {
        Error::QueryFailed {
            host: host.to_string(),
            source,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
