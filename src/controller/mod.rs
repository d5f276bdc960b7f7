//! Controller module for MysqlCluster reconciliation
//! This module contains the main controller loop, the per-pass cluster and
//! proxy driving logic, status computation, data volume retention and leader
//! election.

mod finalizers;
mod leader;
#[cfg(feature = "metrics")]
pub mod metrics;
mod reconciler;
#[cfg(test)]
mod reconciler_test;
pub mod retention;
pub mod status;
pub mod topology;

pub use finalizers::{has_finalizer, is_being_deleted, MYSQL_CLUSTER_FINALIZER};
pub use leader::{claim, LeaderElector, LeaseClaim, LEASE_NAME};
pub use reconciler::{
    observe_cluster, run_controller, sync_proxies, ClusterObservation, ControllerState,
    ProxyFailure, ProxyPlan,
};
pub use retention::run_retention_sweeper;
