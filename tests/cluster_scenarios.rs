//! End-to-end reconcile passes against a simulated set of MySQL nodes.
//!
//! Each scenario drives `observe_cluster` and folds the result into a
//! status exactly as the controller does, without a Kubernetes API server.
//! Run with: cargo test --test cluster_scenarios

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mysql_k8s::cluster::{ClusterStrategy, NodeAction, StrategyOptions};
use mysql_k8s::controller::status::{
    build_status, find_condition, names_of, PassOutcome, ProxyOutcome, CONDITION_TYPE_READY,
};
use mysql_k8s::controller::topology::{self, Credentials, Member};
use mysql_k8s::controller::observe_cluster;
use mysql_k8s::crd::{ClusterPhase, MysqlCluster, MysqlClusterStatus};
use mysql_k8s::deadline::OpContext;
use mysql_k8s::mysql::{Dsn, NodeConnector, NodeSession, ReplicationCredentials};
use mysql_k8s::{Error, Result};

#[derive(Default)]
struct Node {
    uuid: String,
    group_online: bool,
    semi_sync_master: bool,
    source: Option<String>,
}

#[derive(Default)]
struct Sim {
    nodes: HashMap<String, Node>,
    down: HashSet<String>,
    hung: HashSet<String>,
    primary_uuid: Option<String>,
}

/// Shared view of every simulated node
#[derive(Clone, Default)]
struct SimCluster(Arc<Mutex<Sim>>);

impl SimCluster {
    fn new(members: &[Member]) -> Self {
        let sim = SimCluster::default();
        for (i, member) in members.iter().enumerate() {
            sim.0.lock().unwrap().nodes.insert(
                member.dsn.host.clone(),
                Node {
                    uuid: format!("uuid-{i}"),
                    ..Default::default()
                },
            );
        }
        sim
    }

    fn take_down(&self, host: &str) {
        self.0.lock().unwrap().down.insert(host.to_string());
    }

    /// The node keeps its TCP port open but stops answering
    fn hang(&self, host: &str) {
        self.0.lock().unwrap().hung.insert(host.to_string());
    }
}

struct SimSession {
    host: String,
    sim: SimCluster,
}

impl SimSession {
    fn node<T>(&self, f: impl FnOnce(&mut Sim, &str) -> T) -> T {
        let mut sim = self.sim.0.lock().unwrap();
        f(&mut sim, &self.host)
    }
}

#[async_trait]
impl NodeConnector for SimCluster {
    async fn connect(&self, dsn: &Dsn) -> Result<Box<dyn NodeSession>> {
        let (down, hung) = {
            let sim = self.0.lock().unwrap();
            (sim.down.contains(&dsn.host), sim.hung.contains(&dsn.host))
        };
        if down {
            return Err(Error::ConnectFailed {
                host: dsn.host.clone(),
                source: sqlx::Error::Protocol("connection refused".to_string()),
            });
        }
        if hung {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(Box::new(SimSession {
            host: dsn.host.clone(),
            sim: self.clone(),
        }))
    }
}

#[async_trait]
impl NodeSession for SimSession {
    async fn server_uuid(&mut self) -> Result<String> {
        Ok(self.node(|s, h| s.nodes[h].uuid.clone()))
    }

    async fn is_primary_member(&mut self, uuid: &str) -> Result<bool> {
        Ok(self.node(|s, _| s.primary_uuid.as_deref() == Some(uuid)))
    }

    async fn group_replication_running(&mut self) -> Result<bool> {
        Ok(self.node(|s, h| s.nodes[h].group_online))
    }

    async fn group_replication_active(&mut self) -> Result<bool> {
        self.group_replication_running().await
    }

    async fn bootstrap_group(&mut self) -> Result<()> {
        self.node(|s, h| {
            let node = s.nodes.get_mut(h).unwrap();
            node.group_online = true;
            s.primary_uuid = Some(node.uuid.clone());
        });
        Ok(())
    }

    async fn join_group(&mut self, _credentials: &ReplicationCredentials) -> Result<()> {
        self.node(|s, h| s.nodes.get_mut(h).unwrap().group_online = true);
        Ok(())
    }

    async fn semi_sync_master_enabled(&mut self) -> Result<bool> {
        Ok(self.node(|s, h| s.nodes[h].semi_sync_master))
    }

    async fn replica_running(&mut self) -> Result<bool> {
        Ok(self.node(|s, h| {
            s.nodes[h]
                .source
                .as_ref()
                .is_some_and(|src| !s.down.contains(src))
        }))
    }

    async fn promote_semi_sync_master(&mut self) -> Result<()> {
        self.node(|s, h| s.nodes.get_mut(h).unwrap().semi_sync_master = true);
        Ok(())
    }

    async fn replicate_from(
        &mut self,
        source: &Dsn,
        _credentials: &ReplicationCredentials,
        _read_only: bool,
    ) -> Result<()> {
        self.node(|s, h| s.nodes.get_mut(h).unwrap().source = Some(source.host.clone()));
        Ok(())
    }
}

fn cluster(mode: &str, replicas: i32, dual_master: bool) -> MysqlCluster {
    let mut cluster: MysqlCluster = serde_json::from_value(serde_json::json!({
        "apiVersion": "mysql.operator.dev/v1alpha1",
        "kind": "MysqlCluster",
        "metadata": { "name": "db", "namespace": "prod", "generation": 2 },
        "spec": {
            "replicas": replicas,
            "mode": mode,
            "secretName": "db-credentials",
            "dualMaster": dual_master,
        }
    }))
    .unwrap();
    cluster.status = None;
    cluster
}

fn credentials() -> Credentials {
    Credentials {
        root_user: "root".to_string(),
        root_password: "root-pw".to_string(),
        replication_user: "repl".to_string(),
        replication_password: "repl-pw".to_string(),
        app_user: None,
        app_password: None,
        proxysql_admin_user: "admin".to_string(),
        proxysql_admin_password: "admin".to_string(),
    }
}

struct Pass {
    members: Vec<Member>,
    strategy: ClusterStrategy,
}

impl Pass {
    fn new(cluster: &MysqlCluster, sim: &SimCluster) -> Self {
        let creds = credentials();
        let members = topology::members(cluster, &creds);
        let strategy = ClusterStrategy::for_mode(
            cluster.spec.mode,
            members.iter().map(|m| m.dsn.clone()).collect(),
            Arc::new(sim.clone()),
            StrategyOptions {
                replication: creds.replication(),
                dual_master: cluster.spec.dual_master,
            },
        )
        .unwrap();
        Pass { members, strategy }
    }

    async fn run(&self, previous: Option<&MysqlClusterStatus>) -> (Result<NodeActions>, MysqlClusterStatus) {
        let ctx = OpContext::with_timeout(Duration::from_secs(5)).with_node_timeout(Duration::from_secs(1));
        let observation = observe_cluster(&self.strategy, &ctx).await;

        let outcome = PassOutcome {
            members: self.members.iter().map(|m| m.name.clone()).collect(),
            healthy_members: names_of(&self.members, &observation.healthy),
            master: observation
                .master
                .as_ref()
                .and_then(|m| names_of(&self.members, std::slice::from_ref(m)).pop()),
            start_error: observation.start.as_ref().err().map(|e| e.to_string()),
            proxy: ProxyOutcome::Disabled,
        };
        let status = build_status(previous, Some(2), &outcome);
        let actions = observation.start.map(|report| NodeActions {
            bootstrapped: report.bootstrapped().map(str::to_string),
            joined: report.count(&NodeAction::Joined),
            already_running: report.count(&NodeAction::AlreadyRunning),
        });
        (actions, status)
    }
}

#[derive(Debug)]
struct NodeActions {
    bootstrapped: Option<String>,
    joined: usize,
    already_running: usize,
}

#[tokio::test]
async fn fresh_single_primary_cluster_bootstraps_and_runs() {
    let cluster = cluster("MGRSP", 3, false);
    let sim = SimCluster::new(&topology::members(&cluster, &credentials()));
    let pass = Pass::new(&cluster, &sim);

    let (actions, status) = pass.run(None).await;
    let actions = tokio_test::assert_ok!(actions);

    assert_eq!(
        actions.bootstrapped.as_deref(),
        Some(topology::member_host("db", "prod", 0).as_str())
    );
    assert_eq!(actions.joined, 2);
    assert_eq!(status.phase, ClusterPhase::Running);
    assert_eq!(status.healthy_members.len(), 3);
    assert_eq!(status.master.as_deref(), Some("db-mysql-0"));
    assert_eq!(status.observed_generation, Some(2));
    let ready = find_condition(&status.conditions, CONDITION_TYPE_READY).unwrap();
    assert_eq!(ready.status, "True");
    assert_eq!(ready.reason, "AllMembersHealthy");

    // A second pass finds everything in place and keeps the transition time.
    let (again, next) = pass.run(Some(&status)).await;
    let again = tokio_test::assert_ok!(again);
    assert_eq!(again.bootstrapped, None);
    assert_eq!(again.already_running, 3);
    let ready_again = find_condition(&next.conditions, CONDITION_TYPE_READY).unwrap();
    assert_eq!(ready_again.last_transition_time, ready.last_transition_time);
}

#[tokio::test]
async fn unreachable_member_reports_not_ready() {
    let cluster = cluster("MGRSP", 3, false);
    let members = topology::members(&cluster, &credentials());
    let sim = SimCluster::new(&members);
    let pass = Pass::new(&cluster, &sim);
    let (first, _) = pass.run(None).await;
    tokio_test::assert_ok!(first);

    sim.take_down(&members[2].dsn.host);

    // The health scan absorbs the unreachable member.
    let ctx = OpContext::with_timeout(Duration::from_secs(5));
    let healthy = tokio_test::assert_ok!(pass.strategy.healthy_members(&ctx).await);
    assert_eq!(healthy.len(), 2);

    // The pass still reports status before surfacing the failed rejoin.
    let (actions, status) = pass.run(None).await;
    assert!(matches!(actions, Err(Error::BootstrapOrJoinFailed { ref host, .. }) if *host == members[2].dsn.host));
    assert_eq!(status.phase, ClusterPhase::NotReady);
    assert_eq!(status.healthy_members, vec!["db-mysql-0", "db-mysql-1"]);
    assert_eq!(status.master.as_deref(), Some("db-mysql-0"));
    let ready = find_condition(&status.conditions, CONDITION_TYPE_READY).unwrap();
    assert_eq!(ready.status, "False");
    assert_eq!(ready.reason, "StartFailed");
    assert!(status.message.unwrap().starts_with("2/3 members healthy"));
}

#[tokio::test(start_paused = true)]
async fn hung_member_does_not_hide_the_rest_of_the_cluster() {
    let cluster = cluster("MGRSP", 3, false);
    let members = topology::members(&cluster, &credentials());
    let sim = SimCluster::new(&members);
    let pass = Pass::new(&cluster, &sim);
    let (first, status) = pass.run(None).await;
    tokio_test::assert_ok!(first);

    sim.hang(&members[1].dsn.host);

    let (actions, status) = pass.run(Some(&status)).await;
    match actions {
        Err(Error::BootstrapOrJoinFailed { ref host, ref source }) => {
            assert_eq!(*host, members[1].dsn.host);
            assert!(matches!(**source, Error::NodeTimeout { .. }));
        }
        other => panic!("expected the hung member to fail its rejoin, got {other:?}"),
    }
    assert_eq!(status.healthy_members, vec!["db-mysql-0", "db-mysql-2"]);
    assert_eq!(status.master.as_deref(), Some("db-mysql-0"));
    assert_eq!(status.phase, ClusterPhase::NotReady);
}

#[tokio::test]
async fn semi_sync_dual_master_pairs_first_two_members() {
    let cluster = cluster("SemiSync", 3, true);
    let sim = SimCluster::new(&topology::members(&cluster, &credentials()));
    let pass = Pass::new(&cluster, &sim);

    let (actions, status) = pass.run(None).await;
    tokio_test::assert_ok!(actions);

    assert_eq!(status.phase, ClusterPhase::Running);
    assert_eq!(status.master.as_deref(), Some("db-mysql-0"));
    assert!(status.healthy_members.contains(&"db-mysql-1".to_string()));

    let sim = sim.0.lock().unwrap();
    let host = |i| topology::member_host("db", "prod", i);
    assert!(sim.nodes[&host(0)].semi_sync_master);
    assert!(sim.nodes[&host(1)].semi_sync_master);
    assert_eq!(sim.nodes[&host(0)].source, Some(host(1)));
    assert_eq!(sim.nodes[&host(1)].source, Some(host(0)));
    assert_eq!(sim.nodes[&host(2)].source, Some(host(0)));
}

#[tokio::test]
async fn unsupported_mode_is_rejected_before_contacting_nodes() {
    let cluster = cluster("GaleraCluster", 3, false);
    let members = topology::members(&cluster, &credentials());
    let result = ClusterStrategy::for_mode(
        cluster.spec.mode,
        members.iter().map(|m| m.dsn.clone()).collect(),
        Arc::new(SimCluster::default()),
        StrategyOptions {
            replication: credentials().replication(),
            dual_master: false,
        },
    );
    assert!(matches!(result, Err(Error::UnsupportedMode(_))));
}
