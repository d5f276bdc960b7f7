//! Data volume retention after cluster deletion
//!
//! Deleting a MysqlCluster does not delete its PersistentVolumeClaims.
//! Cleanup stamps each claim with a `retain-until` time; a background
//! sweeper deletes claims whose time has passed and whose cluster has not
//! come back. Re-creating the cluster clears the marks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::topology::{instance_selector, INSTANCE_LABEL};
use crate::crd::MysqlCluster;
use crate::error::Result;

pub const RETAIN_UNTIL_ANNOTATION: &str = "mysql.operator.dev/retain-until";

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

const FIELD_MANAGER: &str = "mysql-operator";

pub fn retain_until(now: DateTime<Utc>, retention_hours: u32) -> DateTime<Utc> {
    now + chrono::Duration::hours(i64::from(retention_hours))
}

/// Parsed retention mark; `None` when absent or malformed
pub fn retention_mark(pvc: &PersistentVolumeClaim) -> Option<DateTime<Utc>> {
    pvc.annotations()
        .get(RETAIN_UNTIL_ANNOTATION)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// A claim is expired only when it carries a valid mark in the past
pub fn is_expired(pvc: &PersistentVolumeClaim, now: DateTime<Utc>) -> bool {
    retention_mark(pvc).is_some_and(|until| until <= now)
}

/// Name of the cluster that owned the claim
pub fn owning_cluster(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.labels().get(INSTANCE_LABEL).map(String::as_str)
}

fn annotation_patch(value: Option<&str>) -> serde_json::Value {
    json!({
        "metadata": {
            "annotations": {
                RETAIN_UNTIL_ANNOTATION: value
            }
        }
    })
}

async fn cluster_claims(api: &Api<PersistentVolumeClaim>, cluster: &str) -> Result<Vec<PersistentVolumeClaim>> {
    let params = ListParams::default().labels(&instance_selector(cluster));
    Ok(api.list(&params).await?.items)
}

/// Stamp every claim of `cluster` with its retention deadline.
///
/// Returns the number of claims marked.
pub async fn mark_for_retention(client: &Client, cluster: &MysqlCluster) -> Result<usize> {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let name = cluster.name_any();
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), &namespace);

    let until = retain_until(Utc::now(), cluster.spec.storage.retention_hours).to_rfc3339();
    let claims = cluster_claims(&api, &name).await?;
    for pvc in &claims {
        api.patch(
            &pvc.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&annotation_patch(Some(&until))),
        )
        .await?;
    }

    info!(
        "Marked {} PVC(s) of {}/{} for retention until {}",
        claims.len(),
        namespace,
        name,
        until
    );
    Ok(claims.len())
}

/// Remove retention marks from claims adopted by a live cluster
pub async fn clear_retention_marks(client: &Client, cluster: &MysqlCluster) -> Result<usize> {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), &namespace);

    let mut cleared = 0;
    for pvc in cluster_claims(&api, &cluster.name_any()).await? {
        if !pvc.annotations().contains_key(RETAIN_UNTIL_ANNOTATION) {
            continue;
        }
        api.patch(
            &pvc.name_any(),
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&annotation_patch(None)),
        )
        .await?;
        debug!("Cleared retention mark on PVC {}", pvc.name_any());
        cleared += 1;
    }
    Ok(cleared)
}

/// Delete expired claims whose cluster no longer exists.
///
/// `namespace` limits the sweep; `None` covers the whole cluster.
pub async fn sweep_expired(client: &Client, namespace: Option<&str>) -> Result<usize> {
    let claims: Api<PersistentVolumeClaim> = match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let now = Utc::now();
    let mut deleted = 0;

    for pvc in claims.list(&ListParams::default().labels(INSTANCE_LABEL)).await?.items {
        if !is_expired(&pvc, now) {
            continue;
        }
        let (Some(ns), Some(cluster)) = (pvc.namespace(), owning_cluster(&pvc)) else {
            continue;
        };

        let clusters: Api<MysqlCluster> = Api::namespaced(client.clone(), &ns);
        if clusters.get_opt(cluster).await?.is_some() {
            debug!("Cluster {}/{} exists again, keeping PVC {}", ns, cluster, pvc.name_any());
            continue;
        }

        let api: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), &ns);
        api.delete(&pvc.name_any(), &DeleteParams::default()).await?;
        info!("Deleted expired PVC {}/{}", ns, pvc.name_any());
        deleted += 1;
    }
    Ok(deleted)
}

/// Sweep on an interval while this replica holds leadership
pub async fn run_retention_sweeper(client: Client, namespace: Option<String>, is_leader: Arc<AtomicBool>) {
    let mut interval = tokio::time::interval(SWEEP_INTERVAL);
    loop {
        interval.tick().await;
        if !is_leader.load(Ordering::Relaxed) {
            continue;
        }
        match sweep_expired(&client, namespace.as_deref()).await {
            Ok(0) => {}
            Ok(n) => info!("Retention sweep deleted {} PVC(s)", n),
            Err(e) if e.is_retriable() => warn!("Retention sweep failed: {}", e),
            Err(e) => error!("Retention sweep failed: {:?}", e),
        }
    }
}
