//! Main reconciler for MysqlCluster resources
//!
//! Implements the controller pattern using kube-rs runtime. Each pass
//! validates the spec, brings every member up through the cluster strategy,
//! pushes the resulting topology into ProxySQL and writes status once.

use std::slice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{Event, Secret};
use kube::{
    api::{Api, Patch, PatchParams, PostParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event as FinalizerEvent},
        watcher::Config,
    },
    Resource, ResourceExt,
};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};

use super::finalizers::{has_finalizer, is_being_deleted, MYSQL_CLUSTER_FINALIZER};
#[cfg(feature = "metrics")]
use super::metrics;
use super::retention::{clear_retention_marks, mark_for_retention};
use super::status::{
    build_status, invalid_spec_status, names_of, requeue_after, terminating_status, PassOutcome,
    ProxyOutcome,
};
use super::topology::{self, Credentials};
use crate::cluster::{ClusterStrategy, StartReport, StrategyOptions};
use crate::crd::{MysqlCluster, MysqlClusterStatus};
use crate::deadline::{is_context_error, OpContext};
use crate::error::{Error, Result};
use crate::mysql::{Dsn, MysqlConnector, NodeConnector};
use crate::proxysql::{
    AdminConnector, AdminTable, MysqlServer, MysqlUser, ProxyAdminConnector, ProxySqlServer,
    ProxySynchronizer,
};

#[cfg(feature = "metrics")]
const CONTROLLER_NAME: &str = "mysqlcluster";
const FIELD_MANAGER: &str = "mysql-operator";
const NON_LEADER_REQUEUE: Duration = Duration::from_secs(15);
/// Longest a single node or proxy call may take before it is given up on
const NODE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub operator_namespace: String,
    /// Restrict the watch to one namespace; `None` watches all
    pub watch_namespace: Option<String>,
    pub is_leader: Arc<AtomicBool>,
    pub node_connector: Arc<dyn NodeConnector>,
    pub admin_connector: Arc<dyn AdminConnector>,
}

impl ControllerState {
    /// State with the sqlx-backed MySQL and ProxySQL connectors
    pub fn new(
        client: Client,
        operator_namespace: String,
        watch_namespace: Option<String>,
        is_leader: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client,
            operator_namespace,
            watch_namespace,
            is_leader,
            node_connector: Arc::new(MysqlConnector),
            admin_connector: Arc::new(ProxyAdminConnector),
        }
    }

    fn clusters(&self) -> Api<MysqlCluster> {
        match &self.watch_namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let clusters = state.clusters();

    info!(
        "Starting MysqlCluster controller (operator namespace {}, watching {})",
        state.operator_namespace,
        state.watch_namespace.as_deref().unwrap_or("all namespaces")
    );

    // Verify CRD exists
    match clusters.list(&Default::default()).await {
        Ok(_) => info!("MysqlCluster CRD is available"),
        Err(e) => {
            error!(
                "MysqlCluster CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError(
                "MysqlCluster CRD not installed".to_string(),
            ));
        }
    }

    Controller::new(clusters, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    Ok(())
}

/// Emit a Kubernetes Event against the cluster
async fn emit_event(
    client: &Client,
    cluster: &MysqlCluster,
    event_type: &str,
    reason: &str,
    message: &str,
) -> Result<()> {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let events: Api<Event> = Api::namespaced(client.clone(), &namespace);

    let time = chrono::Utc::now();
    let event = Event {
        metadata: kube::api::ObjectMeta {
            generate_name: Some(format!("{}-event-", cluster.name_any())),
            ..Default::default()
        },
        type_: Some(event_type.to_string()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
        involved_object: cluster.object_ref(&()),
        first_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(time)),
        last_timestamp: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(time)),
        count: Some(1),
        ..Default::default()
    };

    events.create(&PostParams::default(), &event).await?;
    Ok(())
}

async fn emit_event_or_warn(client: &Client, cluster: &MysqlCluster, event_type: &str, reason: &str, message: &str) {
    if let Err(e) = emit_event(client, cluster, event_type, reason, message).await {
        warn!("Failed to emit {} event: {}", reason, e);
    }
}

async fn patch_status(client: &Client, cluster: &MysqlCluster, status: &MysqlClusterStatus) -> Result<()> {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<MysqlCluster> = Api::namespaced(client.clone(), &namespace);

    api.patch_status(
        &cluster.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&json!({ "status": status })),
    )
    .await?;
    Ok(())
}

/// The main reconciliation function
///
/// Non-leaders requeue without touching the cluster.
#[instrument(skip(ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<MysqlCluster>, ctx: Arc<ControllerState>) -> Result<Action> {
    if !ctx.is_leader.load(Ordering::Relaxed) {
        debug!("Not the leader, skipping {}", obj.name_any());
        return Ok(Action::requeue(NON_LEADER_REQUEUE));
    }

    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    let api: Api<MysqlCluster> = Api::namespaced(ctx.client.clone(), &namespace);

    debug!(
        "Reconciling MysqlCluster {}/{} (mode {}, finalizer {}, deleting {})",
        namespace,
        obj.name_any(),
        obj.spec.mode,
        has_finalizer(&obj),
        is_being_deleted(&obj)
    );

    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();

    let result = finalizer(&api, MYSQL_CLUSTER_FINALIZER, obj, |event| async {
        match event {
            FinalizerEvent::Apply(cluster) => apply_cluster(&ctx, &cluster).await,
            FinalizerEvent::Cleanup(cluster) => cleanup_cluster(&ctx, &cluster).await,
        }
    })
    .await
    .map_err(Error::from);

    #[cfg(feature = "metrics")]
    {
        metrics::observe_reconcile_duration_seconds(CONTROLLER_NAME, started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            metrics::inc_reconcile_error(CONTROLLER_NAME, e.kind());
        }
    }

    result
}

/// Drive the live cluster toward the spec and record what was observed
#[instrument(skip(ctx, cluster), fields(name = %cluster.name_any(), namespace = cluster.namespace()))]
async fn apply_cluster(ctx: &ControllerState, cluster: &MysqlCluster) -> Result<Action> {
    let client = &ctx.client;
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let name = cluster.name_any();
    let previous = cluster.status.as_ref();
    let generation = cluster.metadata.generation;

    if let Err(errors) = cluster.spec.validate() {
        let message = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        warn!("Invalid spec for {}/{}: {}", namespace, name, message);
        patch_status(client, cluster, &invalid_spec_status(previous, generation, &message)).await?;
        emit_event_or_warn(client, cluster, "Warning", "InvalidSpec", &message).await;
        return Err(Error::ValidationError(message));
    }

    if let Err(e) = clear_retention_marks(client, cluster).await {
        warn!("Failed to clear retention marks for {}/{}: {}", namespace, name, e);
    }

    let secrets: Api<Secret> = Api::namespaced(client.clone(), &namespace);
    let credentials = Credentials::from_secret(&secrets.get(&cluster.spec.secret_name).await?)?;
    let members = topology::members(cluster, &credentials);

    let strategy = match ClusterStrategy::for_mode(
        cluster.spec.mode,
        members.iter().map(|m| m.dsn.clone()).collect(),
        ctx.node_connector.clone(),
        StrategyOptions {
            replication: credentials.replication(),
            dual_master: cluster.spec.dual_master,
        },
    ) {
        Ok(strategy) => strategy,
        Err(e) => {
            let message = e.to_string();
            patch_status(client, cluster, &invalid_spec_status(previous, generation, &message)).await?;
            return Err(e);
        }
    };

    let op = OpContext::with_timeout(Duration::from_secs(cluster.spec.operation_timeout_seconds))
        .with_node_timeout(NODE_TIMEOUT);
    let observation = observe_cluster(&strategy, &op).await;

    if let Ok(report) = &observation.start {
        if let Some(host) = report.bootstrapped() {
            emit_event_or_warn(
                client,
                cluster,
                "Normal",
                "Bootstrapped",
                &format!("Bootstrapped {} cluster from {}", cluster.spec.mode, host),
            )
            .await;
        }
    }

    let proxy = match &cluster.spec.proxysql {
        None => ProxyOutcome::Disabled,
        Some(spec) => {
            let proxies = topology::proxy_admin_dsns(cluster, &credentials);
            let plan = ProxyPlan {
                servers: topology::desired_servers(&members, observation.master.as_ref(), spec),
                peers: topology::desired_peers(&proxies),
                users: topology::desired_users(&credentials, spec),
                retired_servers: topology::retired_member_hosts(
                    &name,
                    &namespace,
                    previous.map(|s| s.members.as_slice()).unwrap_or_default(),
                    &members,
                ),
            };
            let failures = sync_proxies(&ctx.admin_connector, &proxies, &plan, &op.renewed()).await?;
            if failures.is_empty() {
                ProxyOutcome::Synced {
                    proxies: proxies.len(),
                }
            } else {
                #[cfg(feature = "metrics")]
                for failure in &failures {
                    metrics::inc_proxysql_sync_failures(&namespace, &name, failure.table(), 1);
                }
                ProxyOutcome::RowFailures(failures.iter().map(ToString::to_string).collect())
            }
        }
    };

    let outcome = PassOutcome {
        members: members.iter().map(|m| m.name.clone()).collect(),
        healthy_members: names_of(&members, &observation.healthy),
        master: observation
            .master
            .as_ref()
            .and_then(|m| names_of(&members, slice::from_ref(m)).into_iter().next()),
        start_error: observation.start.as_ref().err().map(ToString::to_string),
        proxy,
    };
    let status = build_status(previous, generation, &outcome);
    patch_status(client, cluster, &status).await?;

    #[cfg(feature = "metrics")]
    metrics::set_cluster_members(
        &namespace,
        &name,
        &cluster.spec.mode.to_string(),
        outcome.members.len() as i64,
        outcome.healthy_members.len() as i64,
    );

    info!(
        "MysqlCluster {}/{} is {} ({}/{} healthy, master {})",
        namespace,
        name,
        status.phase,
        outcome.healthy_members.len(),
        outcome.members.len(),
        outcome.master.as_deref().unwrap_or("none")
    );

    observation.start?;
    Ok(Action::requeue(requeue_after(status.phase)))
}

/// Mark the cluster's data volumes for retention before the finalizer is
/// released
#[instrument(skip(ctx, cluster), fields(name = %cluster.name_any(), namespace = cluster.namespace()))]
async fn cleanup_cluster(ctx: &ControllerState, cluster: &MysqlCluster) -> Result<Action> {
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    let name = cluster.name_any();

    info!("Cleaning up MysqlCluster: {}/{}", namespace, name);

    if let Err(e) = patch_status(&ctx.client, cluster, &terminating_status(cluster.status.as_ref())).await {
        warn!("Failed to set Terminating phase on {}/{}: {}", namespace, name, e);
    }

    mark_for_retention(&ctx.client, cluster).await?;

    #[cfg(feature = "metrics")]
    metrics::remove_cluster(&namespace, &name, &cluster.spec.mode.to_string());

    Ok(Action::await_change())
}

/// Error policy determines how to handle reconciliation errors
fn error_policy(cluster: Arc<MysqlCluster>, error: &Error, _ctx: Arc<ControllerState>) -> Action {
    error!("Reconciliation error for {}: {:?}", cluster.name_any(), error);

    let retry_duration = if error.is_retriable() {
        Duration::from_secs(15)
    } else {
        Duration::from_secs(60)
    };

    Action::requeue(retry_duration)
}

/// What the strategy reported during one pass
#[derive(Debug)]
pub struct ClusterObservation {
    pub start: Result<StartReport>,
    pub healthy: Vec<Dsn>,
    pub master: Option<Dsn>,
}

/// `start_cluster`, then `healthy_members`, then `find_master`.
///
/// A failed start is carried in the observation so health and status are
/// still reported; probe failures only shrink the healthy set. Health and
/// master discovery each run on a renewed context, so a start phase that
/// spent the deadline on a hung node does not leave them nothing.
pub async fn observe_cluster(strategy: &ClusterStrategy, ctx: &OpContext) -> ClusterObservation {
    let start = strategy.start_cluster(ctx).await;
    if let Err(e) = &start {
        warn!("Failed to start {} cluster: {}", strategy.mode(), e);
    }

    let healthy = strategy.healthy_members(&ctx.renewed()).await.unwrap_or_else(|e| {
        warn!("Health scan aborted: {}", e);
        Vec::new()
    });

    let master = match strategy.find_master(&ctx.renewed()).await {
        Ok(masters) => masters.into_iter().next(),
        Err(Error::MasterNotFound) => None,
        Err(e) => {
            warn!("Master discovery failed: {}", e);
            None
        }
    };

    ClusterObservation {
        start,
        healthy,
        master,
    }
}

/// Admin rows every proxy replica should hold
#[derive(Clone, Debug, Default)]
pub struct ProxyPlan {
    pub servers: Vec<MysqlServer>,
    pub peers: Vec<ProxySqlServer>,
    pub users: Vec<MysqlUser>,
    /// Backends of members removed by a scale-down, deleted by hostname.
    /// No other row is ever deleted.
    pub retired_servers: Vec<String>,
}

/// One admin row that failed on one proxy
#[derive(Debug)]
pub struct ProxyFailure {
    pub proxy: String,
    pub error: Error,
}

impl ProxyFailure {
    pub fn table(&self) -> &str {
        match &self.error {
            Error::AdminSyncFailed { table, .. } => table,
            _ => "unknown",
        }
    }
}

impl std::fmt::Display for ProxyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.proxy, self.error)
    }
}

/// Push `plan` into every proxy in turn.
///
/// An unreachable proxy or an exhausted context fails the whole call; row
/// failures are collected and the sync carries on.
pub async fn sync_proxies(
    connector: &Arc<dyn AdminConnector>,
    proxies: &[Dsn],
    plan: &ProxyPlan,
    ctx: &OpContext,
) -> Result<Vec<ProxyFailure>> {
    let mut failures = Vec::new();
    for admin in proxies {
        let sync = ProxySynchronizer::new(connector.clone(), admin.clone());
        let errors = sync_proxy(&sync, plan, ctx).await?;
        failures.extend(errors.into_iter().map(|error| ProxyFailure {
            proxy: admin.host.clone(),
            error,
        }));
    }
    Ok(failures)
}

async fn sync_proxy(sync: &ProxySynchronizer, plan: &ProxyPlan, ctx: &OpContext) -> Result<Vec<Error>> {
    let mut report = sync.upsert_servers(ctx, &plan.servers).await?;
    report.merge(sync.upsert_peers(ctx, &plan.peers).await?);
    report.merge(sync.upsert_users(ctx, &plan.users).await?);
    let mut failures = report.failures;

    for host in &plan.retired_servers {
        if let Err(e) = sync.remove_server(ctx, host).await {
            failures.push(removal_failure(AdminTable::MysqlServers, host, e)?);
        }
    }

    for table in [
        AdminTable::MysqlServers,
        AdminTable::MysqlUsers,
        AdminTable::ProxySqlServers,
    ] {
        sync.load_to_runtime(ctx, table).await?;
    }

    debug!(
        "Synced {} with {} row failure(s)",
        sync.admin(),
        failures.len()
    );
    Ok(failures)
}

/// Context errors and timeouts propagate; anything else becomes a row
/// failure
fn removal_failure(table: AdminTable, key: &str, e: Error) -> Result<Error> {
    if is_context_error(&e) || matches!(e, Error::NodeTimeout { .. }) {
        return Err(e);
    }
    Ok(Error::AdminSyncFailed {
        table: table.name().to_string(),
        key: key.to_string(),
        source: Box::new(e),
    })
}
