//! Cluster strategies
//!
//! A strategy knows how one replication technology discovers its master,
//! bootstraps or joins nodes, and reports member health. Strategies keep no
//! state between calls: every call re-derives the topology from live queries
//! against the nodes it was built with.
//!
//! - [`GroupReplication`]: single-primary MySQL group replication (`MGRSP`)
//! - [`SemiSyncReplication`]: source/replica with semi-sync acknowledgement

mod group_replication;
mod semi_sync;


use std::future::Future;
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

pub use group_replication::GroupReplication;
pub use semi_sync::{SemiSyncReplication, SemiSyncRole};

use crate::crd::ClusterMode;
use crate::deadline::{is_context_error, OpContext};
use crate::error::{Error, Result};
use crate::mysql::{Dsn, NodeConnector, ReplicationCredentials};

/// Options shared by every strategy
#[derive(Clone, Debug)]
pub struct StrategyOptions {
    pub replication: ReplicationCredentials,
    /// SemiSync only
    pub dual_master: bool,
}

/// What `start_cluster` did to one node
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NodeAction {
    Bootstrapped,
    Joined,
    AlreadyRunning,
}

/// Per-node outcome of `start_cluster`, in declared order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartReport {
    pub actions: Vec<(String, NodeAction)>,
}

impl StartReport {
    fn record(&mut self, node: &Dsn, action: NodeAction) {
        self.actions.push((node.host.clone(), action));
    }

    pub fn bootstrapped(&self) -> Option<&str> {
        self.actions
            .iter()
            .find(|(_, a)| *a == NodeAction::Bootstrapped)
            .map(|(host, _)| host.as_str())
    }

    pub fn count(&self, action: &NodeAction) -> usize {
        self.actions.iter().filter(|(_, a)| a == action).count()
    }
}

/// Whether the cluster already has a master at the start of a call
#[derive(Clone, Debug, PartialEq, Eq)]
enum MasterState {
    NoMaster,
    HasMaster(Dsn),
}

impl MasterState {
    /// Initial state from a `find_master` result
    fn from_discovery(found: Result<Vec<Dsn>>) -> Result<Self> {
        match found {
            Ok(masters) => match masters.into_iter().next() {
                Some(master) => Ok(MasterState::HasMaster(master)),
                None => Ok(MasterState::NoMaster),
            },
            Err(Error::MasterNotFound) => Ok(MasterState::NoMaster),
            Err(e) => Err(e),
        }
    }
}

/// Replication strategy selected by cluster mode
pub enum ClusterStrategy {
    SinglePrimary(GroupReplication),
    SemiSync(SemiSyncReplication),
}

impl ClusterStrategy {
    /// Build the strategy for `mode` over `nodes`.
    ///
    /// `MGRMP` and `GaleraCluster` are recognized modes without an
    /// implementation and fail with `Error::UnsupportedMode`.
    pub fn for_mode(
        mode: ClusterMode,
        nodes: Vec<Dsn>,
        connector: Arc<dyn NodeConnector>,
        options: StrategyOptions,
    ) -> Result<Self> {
        match mode {
            ClusterMode::MgrSinglePrimary => Ok(ClusterStrategy::SinglePrimary(
                GroupReplication::new(nodes, connector, options.replication),
            )),
            ClusterMode::SemiSync => Ok(ClusterStrategy::SemiSync(SemiSyncReplication::new(
                nodes,
                connector,
                options.replication,
                options.dual_master,
            ))),
            ClusterMode::MgrMultiPrimary | ClusterMode::GaleraCluster => {
                Err(Error::UnsupportedMode(mode))
            }
        }
    }

    pub fn mode(&self) -> ClusterMode {
        match self {
            ClusterStrategy::SinglePrimary(_) => ClusterMode::MgrSinglePrimary,
            ClusterStrategy::SemiSync(_) => ClusterMode::SemiSync,
        }
    }

    pub fn nodes(&self) -> &[Dsn] {
        match self {
            ClusterStrategy::SinglePrimary(s) => s.nodes(),
            ClusterStrategy::SemiSync(s) => s.nodes(),
        }
    }

    /// Nodes currently acting as master, or `Error::MasterNotFound`
    pub async fn find_master(&self, ctx: &OpContext) -> Result<Vec<Dsn>> {
        match self {
            ClusterStrategy::SinglePrimary(s) => s.find_master(ctx).await,
            ClusterStrategy::SemiSync(s) => s.find_master(ctx).await,
        }
    }

    /// Bootstrap or join every node; safe to call on every pass
    pub async fn start_cluster(&self, ctx: &OpContext) -> Result<StartReport> {
        match self {
            ClusterStrategy::SinglePrimary(s) => s.start_cluster(ctx).await,
            ClusterStrategy::SemiSync(s) => s.start_cluster(ctx).await,
        }
    }

    /// Nodes with running replication, probed concurrently
    pub async fn healthy_members(&self, ctx: &OpContext) -> Result<Vec<Dsn>> {
        match self {
            ClusterStrategy::SinglePrimary(s) => s.healthy_members(ctx).await,
            ClusterStrategy::SemiSync(s) => s.healthy_members(ctx).await,
        }
    }
}

/// Probe every node concurrently and keep those answering `true`.
///
/// Waits for all probes. A failed probe only excludes its node. The result
/// keeps declared order.
async fn probe_all<'a, F, Fut>(ctx: &OpContext, nodes: &'a [Dsn], probe: F) -> Result<Vec<Dsn>>
where
    F: Fn(&'a Dsn) -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    ctx.check()?;

    let probes: Vec<_> = nodes
        .iter()
        .map(|node| ctx.run_on(&node.host, probe(node)))
        .collect();
    let results = join_all(probes).await;

    let mut healthy = Vec::new();
    for (node, result) in nodes.iter().zip(results) {
        match result {
            Ok(true) => healthy.push(node.clone()),
            Ok(false) => debug!("Replication not running on {}", node.host),
            Err(e) => warn!("Health probe failed for {}: {}", node.host, e),
        }
    }
    Ok(healthy)
}

/// Wrap a node failure during bootstrap/join, leaving context errors as-is
fn bring_up_failed(node: &Dsn, e: Error) -> Error {
    if is_context_error(&e) {
        e
    } else {
        Error::BootstrapOrJoinFailed {
            host: node.host.clone(),
            source: Box::new(e),
        }
    }
}
