//! `proxysql.cnf` rendering for proxy pods
//!
//! The file only seeds ProxySQL on first start. Live topology changes go
//! through the admin interface (see `crate::proxysql`).

use super::nested::{entries, Block, NestedDocument};
use crate::crd::{ClusterMode, ProxySqlSpec};
use crate::error::{Error, Result};

pub const DEFAULT_DATADIR: &str = "/var/lib/proxysql";

/// Application account routed through the proxy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyUser {
    pub username: String,
    pub password: String,
    pub default_hostgroup: i64,
}

/// Inputs to [`render_proxysql`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxySqlParams {
    pub mode: ClusterMode,
    pub datadir: String,
    pub admin_user: String,
    pub admin_password: String,
    pub admin_port: u16,
    pub port: u16,
    pub max_connections: i64,
    pub writer_hostgroup: i64,
    pub reader_hostgroup: i64,
    /// Account ProxySQL monitors the backends with
    pub monitor_user: String,
    pub monitor_password: String,
    /// Database hosts and their port
    pub backends: Vec<(String, u16)>,
    pub users: Vec<ProxyUser>,
    /// Proxy peers, hostnames only; they share `admin_port`
    pub peers: Vec<String>,
}

impl ProxySqlParams {
    /// Start from the cluster's proxy spec with no backends, users or peers
    pub fn from_spec(
        spec: &ProxySqlSpec,
        mode: ClusterMode,
        admin: (&str, &str),
        monitor: (&str, &str),
    ) -> Self {
        Self {
            mode,
            datadir: DEFAULT_DATADIR.to_string(),
            admin_user: admin.0.to_string(),
            admin_password: admin.1.to_string(),
            admin_port: spec.admin_port,
            port: spec.port,
            max_connections: spec.max_connections,
            writer_hostgroup: spec.writer_hostgroup,
            reader_hostgroup: spec.reader_hostgroup,
            monitor_user: monitor.0.to_string(),
            monitor_password: monitor.1.to_string(),
            backends: Vec::new(),
            users: Vec::new(),
            peers: Vec::new(),
        }
    }

    /// Backup-writer and offline hostgroups for group replication; both sit
    /// above the writer and reader hostgroups so they never collide
    fn extra_hostgroups(&self) -> (i64, i64) {
        let top = self.writer_hostgroup.max(self.reader_hostgroup);
        (top + 1, top + 2)
    }
}

/// Render the seed configuration of one proxy pod
pub fn render_proxysql(params: &ProxySqlParams) -> Result<NestedDocument> {
    if params.writer_hostgroup == params.reader_hostgroup {
        return Err(Error::ConfigError(format!(
            "writer and reader hostgroup are both {}",
            params.writer_hostgroup
        )));
    }

    let mut doc = NestedDocument::new();
    doc.set_scalar("datadir", params.datadir.clone());

    doc.set_block(
        "admin_variables",
        Block::Map(entries([
            (
                "admin_credentials",
                format!("{}:{}", params.admin_user, params.admin_password),
            ),
            ("mysql_ifaces", format!("0.0.0.0:{}", params.admin_port)),
            ("refresh_interval", "2000".to_string()),
            ("cluster_username", params.admin_user.clone()),
            ("cluster_password", params.admin_password.clone()),
        ])),
    );

    doc.set_block(
        "mysql_variables",
        Block::Map(entries([
            ("threads", "4".to_string()),
            ("max_connections", params.max_connections.to_string()),
            ("interfaces", format!("0.0.0.0:{}", params.port)),
            ("default_schema", "information_schema".to_string()),
            ("server_version", "8.0.36".to_string()),
            ("monitor_username", params.monitor_user.clone()),
            ("monitor_password", params.monitor_password.clone()),
            ("monitor_connect_interval", "60000".to_string()),
            ("monitor_ping_interval", "10000".to_string()),
            ("monitor_read_only_interval", "1500".to_string()),
        ])),
    );

    // Every backend starts as a reader; the monitor or the operator moves
    // the master into the writer hostgroup.
    let servers = params
        .backends
        .iter()
        .map(|(host, port)| {
            entries([
                ("address", host.clone()),
                ("port", port.to_string()),
                ("hostgroup", params.reader_hostgroup.to_string()),
                ("max_connections", params.max_connections.to_string()),
            ])
        })
        .collect();
    doc.set_block("mysql_servers", Block::List(servers));

    let users = params
        .users
        .iter()
        .map(|user| {
            entries([
                ("username", user.username.clone()),
                ("password", user.password.clone()),
                ("default_hostgroup", user.default_hostgroup.to_string()),
                ("active", "1".to_string()),
            ])
        })
        .collect();
    doc.set_block("mysql_users", Block::List(users));

    doc.set_block(
        "mysql_query_rules",
        Block::List(vec![
            entries([
                ("rule_id", "1".to_string()),
                ("active", "1".to_string()),
                ("match_digest", "^SELECT .* FOR UPDATE$".to_string()),
                ("destination_hostgroup", params.writer_hostgroup.to_string()),
                ("apply", "1".to_string()),
            ]),
            entries([
                ("rule_id", "2".to_string()),
                ("active", "1".to_string()),
                ("match_digest", "^SELECT".to_string()),
                ("destination_hostgroup", params.reader_hostgroup.to_string()),
                ("apply", "1".to_string()),
            ]),
        ]),
    );

    doc.set_block("scheduler", Block::List(Vec::new()));

    let peers = params
        .peers
        .iter()
        .map(|peer| {
            entries([
                ("hostname", peer.clone()),
                ("port", params.admin_port.to_string()),
                ("weight", "0".to_string()),
            ])
        })
        .collect();
    doc.set_block("proxysql_servers", Block::List(peers));

    match params.mode {
        ClusterMode::SemiSync => {
            doc.set_block(
                "mysql_replication_hostgroups",
                Block::List(vec![entries([
                    ("writer_hostgroup", params.writer_hostgroup.to_string()),
                    ("reader_hostgroup", params.reader_hostgroup.to_string()),
                    ("comment", "semi-sync".to_string()),
                ])]),
            );
        }
        ClusterMode::MgrSinglePrimary | ClusterMode::MgrMultiPrimary => {
            let (backup_writer, offline) = params.extra_hostgroups();
            let max_writers = if params.mode == ClusterMode::MgrSinglePrimary {
                1
            } else {
                9
            };
            doc.set_block(
                "mysql_group_replication_hostgroups",
                Block::List(vec![entries([
                    ("writer_hostgroup", params.writer_hostgroup.to_string()),
                    ("backup_writer_hostgroup", backup_writer.to_string()),
                    ("reader_hostgroup", params.reader_hostgroup.to_string()),
                    ("offline_hostgroup", offline.to_string()),
                    ("active", "1".to_string()),
                    ("max_writers", max_writers.to_string()),
                    ("writer_is_also_reader", "0".to_string()),
                    ("max_transactions_behind", "100".to_string()),
                ])]),
            );
        }
        ClusterMode::GaleraCluster => return Err(Error::UnsupportedMode(params.mode)),
    }

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(mode: ClusterMode) -> ProxySqlParams {
        let mut p = ProxySqlParams::from_spec(
            &ProxySqlSpec::default(),
            mode,
            ("admin", "secret"),
            ("monitor", "monpw"),
        );
        p.backends = vec![("db-0".to_string(), 3306), ("db-1".to_string(), 3306)];
        p.users = vec![ProxyUser {
            username: "app".to_string(),
            password: "apppw".to_string(),
            default_hostgroup: 10,
        }];
        p.peers = vec!["proxy-0".to_string(), "proxy-1".to_string()];
        p
    }

    fn rows<'a>(doc: &'a NestedDocument, name: &str) -> &'a Vec<Vec<(String, String)>> {
        match doc.block(name) {
            Some(Block::List(rows)) => rows,
            other => panic!("expected list block {name}, got {other:?}"),
        }
    }

    #[test]
    fn test_group_replication_hostgroups() {
        let doc = render_proxysql(&params(ClusterMode::MgrSinglePrimary)).unwrap();
        let hostgroups = rows(&doc, "mysql_group_replication_hostgroups");
        assert_eq!(hostgroups.len(), 1);
        assert!(hostgroups[0].contains(&("backup_writer_hostgroup".to_string(), "21".to_string())));
        assert!(hostgroups[0].contains(&("offline_hostgroup".to_string(), "22".to_string())));
        assert!(doc.block("mysql_replication_hostgroups").is_none());
    }

    #[test]
    fn test_semi_sync_uses_replication_hostgroups() {
        let doc = render_proxysql(&params(ClusterMode::SemiSync)).unwrap();
        assert_eq!(rows(&doc, "mysql_replication_hostgroups").len(), 1);
        assert!(doc.block("mysql_group_replication_hostgroups").is_none());
    }

    #[test]
    fn test_servers_peers_and_users() {
        let doc = render_proxysql(&params(ClusterMode::SemiSync)).unwrap();
        assert_eq!(rows(&doc, "mysql_servers").len(), 2);
        assert_eq!(rows(&doc, "proxysql_servers").len(), 2);
        assert_eq!(rows(&doc, "mysql_users")[0][0], ("username".to_string(), "app".to_string()));

        let text = doc.to_string();
        assert!(text.starts_with("datadir=\"/var/lib/proxysql\"\n"));
        assert!(text.contains("admin_credentials=\"admin:secret\""));
        assert!(text.contains("{ hostname=\"proxy-0\", port=6032, weight=0 }"));
    }

    #[test]
    fn test_rejects_equal_hostgroups() {
        let mut p = params(ClusterMode::SemiSync);
        p.reader_hostgroup = p.writer_hostgroup;
        assert!(matches!(render_proxysql(&p), Err(Error::ConfigError(_))));
    }
}
