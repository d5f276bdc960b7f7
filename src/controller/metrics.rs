//! Prometheus metrics for the MySQL operator
//!
//! # Exported metrics
//! The `/metrics` endpoint (when built with `--features metrics`) exports:
//! - `mysql_reconcile_duration_seconds` (histogram): reconcile duration labeled by controller.
//! - `mysql_reconcile_errors_total` (counter): reconcile errors labeled by controller and kind.
//! - `mysql_cluster_members` (gauge): declared members labeled by namespace/name/mode.
//! - `mysql_cluster_healthy_members` (gauge): members with running replication.
//! - `mysql_proxysql_sync_failures_total` (counter): admin rows that failed to sync, by table.

use std::sync::atomic::{AtomicI64, AtomicU64};

use once_cell::sync::Lazy;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

/// Labels for operator reconcile metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReconcileLabels {
    /// Controller name, e.g. "mysqlcluster"
    pub controller: String,
}

/// Labels for operator error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub controller: String,
    /// Error category, see `Error::kind`
    pub kind: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterLabels {
    pub namespace: String,
    pub name: String,
    pub mode: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProxyLabels {
    pub namespace: String,
    pub name: String,
    pub table: String,
}

/// Histogram tracking reconcile duration (seconds)
pub static RECONCILE_DURATION_SECONDS: Lazy<Family<ReconcileLabels, Histogram>> = Lazy::new(|| {
    fn reconcile_histogram() -> Histogram {
        // 1ms .. ~32s across 16 buckets.
        Histogram::new(exponential_buckets(0.001, 2.0, 16))
    }

    Family::new_with_constructor(reconcile_histogram)
});

pub static RECONCILE_ERRORS_TOTAL: Lazy<Family<ErrorLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static CLUSTER_MEMBERS: Lazy<Family<ClusterLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static CLUSTER_HEALTHY_MEMBERS: Lazy<Family<ClusterLabels, Gauge<i64, AtomicI64>>> =
    Lazy::new(Family::default);

pub static PROXYSQL_SYNC_FAILURES_TOTAL: Lazy<Family<ProxyLabels, Counter<u64, AtomicU64>>> =
    Lazy::new(Family::default);

pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let mut registry = Registry::default();

    registry.register(
        "mysql_reconcile_duration_seconds",
        "Duration of reconcile loops in seconds",
        RECONCILE_DURATION_SECONDS.clone(),
    );
    registry.register(
        "mysql_reconcile_errors_total",
        "Total number of reconcile errors",
        RECONCILE_ERRORS_TOTAL.clone(),
    );
    registry.register(
        "mysql_cluster_members",
        "Declared members of the MySQL cluster",
        CLUSTER_MEMBERS.clone(),
    );
    registry.register(
        "mysql_cluster_healthy_members",
        "Members reporting running replication",
        CLUSTER_HEALTHY_MEMBERS.clone(),
    );
    registry.register(
        "mysql_proxysql_sync_failures_total",
        "ProxySQL admin rows that failed to sync",
        PROXYSQL_SYNC_FAILURES_TOTAL.clone(),
    );

    registry
});

/// Observe a reconcile duration in seconds.
pub fn observe_reconcile_duration_seconds(controller: &str, seconds: f64) {
    let labels = ReconcileLabels {
        controller: controller.to_string(),
    };
    RECONCILE_DURATION_SECONDS
        .get_or_create(&labels)
        .observe(seconds);
}

/// Increment the reconcile error counter.
pub fn inc_reconcile_error(controller: &str, kind: &str) {
    let labels = ErrorLabels {
        controller: controller.to_string(),
        kind: kind.to_string(),
    };
    RECONCILE_ERRORS_TOTAL.get_or_create(&labels).inc();
}

/// Record declared and healthy member counts of one cluster
pub fn set_cluster_members(namespace: &str, name: &str, mode: &str, members: i64, healthy: i64) {
    let labels = ClusterLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
        mode: mode.to_string(),
    };
    CLUSTER_MEMBERS.get_or_create(&labels).set(members);
    CLUSTER_HEALTHY_MEMBERS.get_or_create(&labels).set(healthy);
}

/// Drop the gauges of a deleted cluster
pub fn remove_cluster(namespace: &str, name: &str, mode: &str) {
    let labels = ClusterLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
        mode: mode.to_string(),
    };
    CLUSTER_MEMBERS.remove(&labels);
    CLUSTER_HEALTHY_MEMBERS.remove(&labels);
}

pub fn inc_proxysql_sync_failures(namespace: &str, name: &str, table: &str, count: u64) {
    let labels = ProxyLabels {
        namespace: namespace.to_string(),
        name: name.to_string(),
        table: table.to_string(),
    };
    PROXYSQL_SYNC_FAILURES_TOTAL.get_or_create(&labels).inc_by(count);
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text::encode;

    #[test]
    fn test_cluster_gauges_are_exported() {
        set_cluster_members("metrics-test", "db", "MGRSP", 3, 2);
        inc_proxysql_sync_failures("metrics-test", "db", "mysql_servers", 2);

        let mut out = String::new();
        encode(&mut out, &REGISTRY).unwrap();
        assert!(out.contains("mysql_cluster_members{namespace=\"metrics-test\",name=\"db\",mode=\"MGRSP\"} 3"));
        assert!(out.contains("mysql_cluster_healthy_members{namespace=\"metrics-test\",name=\"db\",mode=\"MGRSP\"} 2"));
        assert!(out.contains("mysql_proxysql_sync_failures_total{namespace=\"metrics-test\",name=\"db\",table=\"mysql_servers\"} 2"));
    }

    #[test]
    fn test_remove_cluster_drops_series() {
        set_cluster_members("metrics-test", "gone", "SemiSync", 2, 2);
        remove_cluster("metrics-test", "gone", "SemiSync");

        let mut out = String::new();
        encode(&mut out, &REGISTRY).unwrap();
        assert!(!out.contains("name=\"gone\""));
    }
}
