//! Finalizer handling for MysqlCluster deletion
//!
//! The finalizer holds a deleted MysqlCluster until cleanup has marked its
//! data volumes for retention. The kube-rs `finalizer` helper adds and
//! removes it; the predicates here are used for status and logging.

use kube::ResourceExt;

use crate::crd::MysqlCluster;

/// Finalizer name used to protect MysqlCluster resources
pub const MYSQL_CLUSTER_FINALIZER: &str = "mysqlcluster.mysql.operator.dev/finalizer";

/// A deletion timestamp means deletion was requested and the finalizer is
/// holding the object.
pub fn is_being_deleted(cluster: &MysqlCluster) -> bool {
    cluster.metadata.deletion_timestamp.is_some()
}

pub fn has_finalizer(cluster: &MysqlCluster) -> bool {
    cluster
        .finalizers()
        .iter()
        .any(|f| f == MYSQL_CLUSTER_FINALIZER)
}
