//! Semi-synchronous source/replica replication
//!
//! One master (or, in dual-master mode, the first two members replicating
//! from each other) takes writes; every other member replicates from the
//! master read-only.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{
    bring_up_failed, probe_all, MasterState, NodeAction, StartReport,
};
use crate::deadline::{is_context_error, OpContext};
use crate::error::{Error, Result};
use crate::mysql::{Dsn, NodeConnector, NodeSession, ReplicationCredentials};

/// Role a node should end up in after `start_cluster`
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SemiSyncRole {
    /// Writable semi-sync master, optionally replicating from a dual peer
    Master { peer: Option<Dsn> },
    /// Read-only replica of `source`
    Replica { source: Dsn },
}

pub struct SemiSyncReplication {
    nodes: Vec<Dsn>,
    connector: Arc<dyn NodeConnector>,
    credentials: ReplicationCredentials,
    dual_master: bool,
}

impl SemiSyncReplication {
    pub fn new(
        nodes: Vec<Dsn>,
        connector: Arc<dyn NodeConnector>,
        credentials: ReplicationCredentials,
        dual_master: bool,
    ) -> Self {
        Self {
            nodes,
            connector,
            credentials,
            dual_master,
        }
    }

    pub fn nodes(&self) -> &[Dsn] {
        &self.nodes
    }

    /// First node, in declared order, with semi-sync master mode enabled
    pub async fn find_master(&self, ctx: &OpContext) -> Result<Vec<Dsn>> {
        ctx.check()?;

        for node in &self.nodes {
            match ctx.run_on(&node.host, self.probe_master(node)).await {
                Ok(true) => return Ok(vec![node.clone()]),
                Ok(false) => {}
                Err(e) if is_context_error(&e) => return Err(e),
                Err(e) => warn!("Skipping {} during master discovery: {}", node.host, e),
            }
        }
        Err(Error::MasterNotFound)
    }

    async fn probe_master(&self, node: &Dsn) -> Result<bool> {
        let mut session = self.connector.connect(node).await?;
        session.semi_sync_master_enabled().await
    }

    /// Target role of every node given the current master.
    ///
    /// Without a master, node 0 becomes the master. In dual-master mode the
    /// first two nodes are masters of each other as long as the current
    /// master is one of them.
    pub fn plan(&self, master: Option<&Dsn>) -> Vec<(Dsn, SemiSyncRole)> {
        let Some(anchor) = master.or_else(|| self.nodes.first()) else {
            return Vec::new();
        };

        let pair: Option<(&Dsn, &Dsn)> = match (self.dual_master, self.nodes.first(), self.nodes.get(1)) {
            (true, Some(a), Some(b)) if anchor == a || anchor == b => Some((a, b)),
            (true, _, _) => {
                warn!(
                    "Master {} is outside the dual-master pair, running single-master",
                    anchor.host
                );
                None
            }
            _ => None,
        };

        self.nodes
            .iter()
            .map(|node| {
                let role = match pair {
                    Some((a, b)) if node == a => SemiSyncRole::Master {
                        peer: Some(b.clone()),
                    },
                    Some((a, b)) if node == b => SemiSyncRole::Master {
                        peer: Some(a.clone()),
                    },
                    _ if node == anchor => SemiSyncRole::Master { peer: None },
                    _ => SemiSyncRole::Replica {
                        source: anchor.clone(),
                    },
                };
                (node.clone(), role)
            })
            .collect()
    }

    /// Promote the master(s) and point every other node at the master.
    pub async fn start_cluster(&self, ctx: &OpContext) -> Result<StartReport> {
        let mut state = MasterState::from_discovery(self.find_master(ctx).await)?;
        let plan = match &state {
            MasterState::NoMaster => {
                info!("No semi-sync master found, bootstrapping from the first member");
                self.plan(None)
            }
            MasterState::HasMaster(master) => {
                debug!("Semi-sync master is {}", master.host);
                self.plan(Some(master))
            }
        };

        let mut report = StartReport::default();
        for (node, role) in &plan {
            let bootstrap = state == MasterState::NoMaster;

            match ctx.run_on(&node.host, self.bring_up(node, role)).await {
                Ok(()) => {
                    let action = match role {
                        SemiSyncRole::Master { .. } if bootstrap => NodeAction::Bootstrapped,
                        _ => NodeAction::Joined,
                    };
                    info!("{:?} {} as {:?}", action, node.host, role);
                    if bootstrap && matches!(role, SemiSyncRole::Master { .. }) {
                        state = MasterState::HasMaster(node.clone());
                    }
                    report.record(node, action);
                }
                Err(Error::AlreadyRunning { .. }) => {
                    debug!("Replication already running on {}", node.host);
                    if bootstrap && matches!(role, SemiSyncRole::Master { .. }) {
                        state = MasterState::HasMaster(node.clone());
                    }
                    report.record(node, NodeAction::AlreadyRunning);
                }
                Err(e) => return Err(bring_up_failed(node, e)),
            }
        }

        Ok(report)
    }

    async fn bring_up(&self, node: &Dsn, role: &SemiSyncRole) -> Result<()> {
        let mut session = self.connector.connect(node).await?;
        if role_satisfied(session.as_mut(), role).await? {
            return Err(Error::AlreadyRunning {
                host: node.host.clone(),
            });
        }

        match role {
            SemiSyncRole::Master { peer } => {
                session.promote_semi_sync_master().await?;
                if let Some(peer) = peer {
                    session
                        .replicate_from(peer, &self.credentials, false)
                        .await?;
                }
            }
            SemiSyncRole::Replica { source } => {
                session
                    .replicate_from(source, &self.credentials, true)
                    .await?;
            }
        }
        Ok(())
    }

    /// Members that are semi-sync masters or running replicas
    pub async fn healthy_members(&self, ctx: &OpContext) -> Result<Vec<Dsn>> {
        probe_all(ctx, &self.nodes, |node| self.probe_running(node)).await
    }

    async fn probe_running(&self, node: &Dsn) -> Result<bool> {
        let mut session = self.connector.connect(node).await?;
        if session.semi_sync_master_enabled().await? {
            return Ok(true);
        }
        session.replica_running().await
    }
}

async fn role_satisfied(session: &mut dyn NodeSession, role: &SemiSyncRole) -> Result<bool> {
    match role {
        SemiSyncRole::Master { peer: None } => session.semi_sync_master_enabled().await,
        SemiSyncRole::Master { peer: Some(_) } => {
            Ok(session.semi_sync_master_enabled().await? && session.replica_running().await?)
        }
        SemiSyncRole::Replica { .. } => session.replica_running().await,
    }
}
