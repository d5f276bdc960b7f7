//! Connection seams used by the cluster strategies.

use async_trait::async_trait;

use super::dsn::Dsn;
use crate::error::Result;

/// Account used by replicas to pull from their source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicationCredentials {
    pub user: String,
    pub password: String,
}

/// Opens one short-lived session per call
#[async_trait]
pub trait NodeConnector: Send + Sync {
    /// Fails with `Error::ConnectFailed` when the node cannot be reached.
    async fn connect(&self, dsn: &Dsn) -> Result<Box<dyn NodeSession>>;
}

/// Replication administration on a single MySQL node
#[async_trait]
pub trait NodeSession: Send {
    /// `@@server_uuid` of the node
    async fn server_uuid(&mut self) -> Result<String>;

    /// Whether `uuid` is recorded as the group's primary member
    async fn is_primary_member(&mut self, uuid: &str) -> Result<bool>;

    /// Whether this node is an ONLINE group replication member
    async fn group_replication_running(&mut self) -> Result<bool>;

    /// Whether group replication is started on this node, ONLINE or still
    /// RECOVERING. A node in either state must not be joined again.
    async fn group_replication_active(&mut self) -> Result<bool>;

    /// Start a brand-new replication group from this node
    async fn bootstrap_group(&mut self) -> Result<()>;

    /// Join the group this node's seeds belong to
    async fn join_group(&mut self, credentials: &ReplicationCredentials) -> Result<()>;

    /// `rpl_semi_sync_master_enabled = ON`
    async fn semi_sync_master_enabled(&mut self) -> Result<bool>;

    /// Replica IO and SQL threads both running
    async fn replica_running(&mut self) -> Result<bool>;

    /// Enable semi-sync master mode and make the node writable
    async fn promote_semi_sync_master(&mut self) -> Result<()>;

    /// Point this node's replication at `source` and start it
    async fn replicate_from(
        &mut self,
        source: &Dsn,
        credentials: &ReplicationCredentials,
        read_only: bool,
    ) -> Result<()>;
}
