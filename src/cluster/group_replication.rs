//! Single-primary group replication (MGRSP)

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{
    bring_up_failed, probe_all, MasterState, NodeAction, StartReport,
};
use crate::deadline::{is_context_error, OpContext};
use crate::error::{Error, Result};
use crate::mysql::{Dsn, NodeConnector, ReplicationCredentials};

pub struct GroupReplication {
    nodes: Vec<Dsn>,
    connector: Arc<dyn NodeConnector>,
    credentials: ReplicationCredentials,
}

impl GroupReplication {
    pub fn new(
        nodes: Vec<Dsn>,
        connector: Arc<dyn NodeConnector>,
        credentials: ReplicationCredentials,
    ) -> Self {
        Self {
            nodes,
            connector,
            credentials,
        }
    }

    pub fn nodes(&self) -> &[Dsn] {
        &self.nodes
    }

    /// Nodes whose server_uuid is the group's primary member.
    ///
    /// Unreachable nodes are logged and skipped.
    pub async fn find_master(&self, ctx: &OpContext) -> Result<Vec<Dsn>> {
        ctx.check()?;

        let mut masters = Vec::new();
        for node in &self.nodes {
            match ctx.run_on(&node.host, self.is_primary(node)).await {
                Ok(true) => masters.push(node.clone()),
                Ok(false) => {}
                Err(e) if is_context_error(&e) => return Err(e),
                Err(e) => warn!("Skipping {} during master discovery: {}", node.host, e),
            }
        }

        if masters.len() > 1 {
            warn!(
                "Group reports {} primaries: {:?}",
                masters.len(),
                masters.iter().map(|m| m.host.as_str()).collect::<Vec<_>>()
            );
        }

        if masters.is_empty() {
            Err(Error::MasterNotFound)
        } else {
            Ok(masters)
        }
    }

    async fn is_primary(&self, node: &Dsn) -> Result<bool> {
        let mut session = self.connector.connect(node).await?;
        let uuid = session.server_uuid().await?;
        session.is_primary_member(&uuid).await
    }

    /// Bootstrap node 0 when no primary exists, then join everyone else.
    pub async fn start_cluster(&self, ctx: &OpContext) -> Result<StartReport> {
        let mut state = MasterState::from_discovery(self.find_master(ctx).await)?;
        let mut report = StartReport::default();

        match &state {
            MasterState::NoMaster => info!("No group primary found, bootstrapping a new group"),
            MasterState::HasMaster(master) => debug!("Group primary is {}", master.host),
        }

        for (index, node) in self.nodes.iter().enumerate() {
            let bootstrap = index == 0 && state == MasterState::NoMaster;

            match ctx.run_on(&node.host, self.bring_up(node, bootstrap)).await {
                Ok(action) => {
                    info!("{:?} {} into the group", action, node.host);
                    if bootstrap {
                        state = MasterState::HasMaster(node.clone());
                    }
                    report.record(node, action);
                }
                Err(Error::AlreadyRunning { .. }) => {
                    debug!("Group replication already running on {}", node.host);
                    if state == MasterState::NoMaster {
                        state = MasterState::HasMaster(node.clone());
                    }
                    report.record(node, NodeAction::AlreadyRunning);
                }
                Err(e) => return Err(bring_up_failed(node, e)),
            }
        }

        Ok(report)
    }

    async fn bring_up(&self, node: &Dsn, bootstrap: bool) -> Result<NodeAction> {
        let mut session = self.connector.connect(node).await?;
        // A RECOVERING member is already joining; issuing another join would
        // restart its recovery.
        if session.group_replication_active().await? {
            return Err(Error::AlreadyRunning {
                host: node.host.clone(),
            });
        }

        if bootstrap {
            session.bootstrap_group().await?;
            Ok(NodeAction::Bootstrapped)
        } else {
            session.join_group(&self.credentials).await?;
            Ok(NodeAction::Joined)
        }
    }

    /// Members that are ONLINE in the group
    pub async fn healthy_members(&self, ctx: &OpContext) -> Result<Vec<Dsn>> {
        probe_all(ctx, &self.nodes, |node| self.probe_running(node)).await
    }

    async fn probe_running(&self, node: &Dsn) -> Result<bool> {
        let mut session = self.connector.connect(node).await?;
        session.group_replication_running().await
    }
}
