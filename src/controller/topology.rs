//! Naming conventions and desired topology derived from a MysqlCluster
//!
//! Everything here is pure: given the resource and its credentials secret,
//! compute member DSNs, ProxySQL admin endpoints and the admin table rows
//! every proxy should hold.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

use crate::crd::{MysqlCluster, ProxySqlSpec};
use crate::error::{Error, Result};
use crate::mysql::{Dsn, ReplicationCredentials};
use crate::proxysql::{MysqlServer, MysqlUser, ProxySqlServer};

/// PVC label selecting the data volumes of one cluster
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

pub fn statefulset_name(cluster: &str) -> String {
    format!("{cluster}-mysql")
}

pub fn headless_service_name(cluster: &str) -> String {
    format!("{cluster}-mysql-headless")
}

pub fn pod_name(cluster: &str, ordinal: i32) -> String {
    format!("{}-{}", statefulset_name(cluster), ordinal)
}

/// DNS suffix shared by every database pod of a cluster
pub fn member_domain(cluster: &str, namespace: &str) -> String {
    format!("{}.{}.svc", headless_service_name(cluster), namespace)
}

/// Stable DNS name of a database pod behind the headless service
pub fn member_host(cluster: &str, namespace: &str, ordinal: i32) -> String {
    format!("{}.{}", pod_name(cluster, ordinal), member_domain(cluster, namespace))
}

pub fn proxy_domain(cluster: &str, namespace: &str) -> String {
    format!("{cluster}-proxysql-headless.{namespace}.svc")
}

pub fn proxy_host(cluster: &str, namespace: &str, ordinal: i32) -> String {
    format!("{cluster}-proxysql-{ordinal}.{}", proxy_domain(cluster, namespace))
}

/// Credentials read from the secret named by `spec.secretName`
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub root_user: String,
    pub root_password: String,
    pub replication_user: String,
    pub replication_password: String,
    pub app_user: Option<String>,
    pub app_password: Option<String>,
    pub proxysql_admin_user: String,
    pub proxysql_admin_password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("root_user", &self.root_user)
            .field("replication_user", &self.replication_user)
            .field("app_user", &self.app_user)
            .field("proxysql_admin_user", &self.proxysql_admin_user)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    pub fn from_secret(secret: &Secret) -> Result<Self> {
        let name = secret.name_any();
        let values = secret_values(secret);
        let get = |key: &str| values.get(key).filter(|v| !v.is_empty()).cloned();

        let root_password = get("root-password").ok_or_else(|| Error::MissingSecretKey {
            secret: name.clone(),
            key: "root-password".to_string(),
        })?;
        let root_user = get("root-user").unwrap_or_else(|| "root".to_string());

        Ok(Self {
            replication_user: get("replication-user").unwrap_or_else(|| root_user.clone()),
            replication_password: get("replication-password")
                .unwrap_or_else(|| root_password.clone()),
            app_user: get("app-user"),
            app_password: get("app-password"),
            proxysql_admin_user: get("proxysql-admin-user").unwrap_or_else(|| "admin".to_string()),
            proxysql_admin_password: get("proxysql-admin-password")
                .unwrap_or_else(|| "admin".to_string()),
            root_user,
            root_password,
        })
    }

    pub fn replication(&self) -> ReplicationCredentials {
        ReplicationCredentials {
            user: self.replication_user.clone(),
            password: self.replication_password.clone(),
        }
    }

    /// Application account, when both halves are present
    pub fn app(&self) -> Option<(&str, &str)> {
        match (&self.app_user, &self.app_password) {
            (Some(user), Some(password)) => Some((user.as_str(), password.as_str())),
            _ => None,
        }
    }
}

/// `data` wins over `stringData` for the same key; non-UTF-8 values are skipped
fn secret_values(secret: &Secret) -> BTreeMap<String, String> {
    let mut values = secret.string_data.clone().unwrap_or_default();
    if let Some(data) = &secret.data {
        for (key, bytes) in data {
            if let Ok(value) = String::from_utf8(bytes.0.clone()) {
                values.insert(key.clone(), value);
            }
        }
    }
    values
}

/// One declared database pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub dsn: Dsn,
}

/// Members in ordinal order, connecting as the root account
pub fn members(cluster: &MysqlCluster, credentials: &Credentials) -> Vec<Member> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    (0..cluster.spec.replicas.max(0))
        .map(|ordinal| Member {
            name: pod_name(&name, ordinal),
            dsn: Dsn::new(
                member_host(&name, &namespace, ordinal),
                cluster.spec.port,
                credentials.root_user.as_str(),
                credentials.root_password.as_str(),
            ),
        })
        .collect()
}

/// Hosts of pods the previous pass recorded as members that the current
/// replica count no longer declares. Only this cluster's own pod names count.
pub fn retired_member_hosts(cluster: &str, namespace: &str, previous: &[String], current: &[Member]) -> Vec<String> {
    let prefix = format!("{}-", statefulset_name(cluster));
    previous
        .iter()
        .filter(|name| {
            name.strip_prefix(&prefix)
                .is_some_and(|ordinal| ordinal.parse::<u32>().is_ok())
        })
        .filter(|name| !current.iter().any(|m| &m.name == *name))
        .map(|name| format!("{}.{}", name, member_domain(cluster, namespace)))
        .collect()
}

/// Admin DSN of every proxy replica; empty without a ProxySQL tier
pub fn proxy_admin_dsns(cluster: &MysqlCluster, credentials: &Credentials) -> Vec<Dsn> {
    let Some(proxy) = &cluster.spec.proxysql else {
        return Vec::new();
    };
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_else(|| "default".to_string());
    (0..proxy.replicas.max(0))
        .map(|ordinal| {
            Dsn::new(
                proxy_host(&name, &namespace, ordinal),
                proxy.admin_port,
                credentials.proxysql_admin_user.as_str(),
                credentials.proxysql_admin_password.as_str(),
            )
        })
        .collect()
}

/// `mysql_servers` rows: the master in the writer hostgroup, every other
/// member in the reader hostgroup
pub fn desired_servers(members: &[Member], master: Option<&Dsn>, proxy: &ProxySqlSpec) -> Vec<MysqlServer> {
    members
        .iter()
        .map(|member| {
            let hostgroup = if Some(&member.dsn) == master {
                proxy.writer_hostgroup
            } else {
                proxy.reader_hostgroup
            };
            MysqlServer::new(hostgroup, member.dsn.host.as_str(), member.dsn.port)
                .with_max_connections(proxy.max_connections)
                .with_comment(member.name.as_str())
        })
        .collect()
}

/// `proxysql_servers` rows naming every proxy replica
pub fn desired_peers(proxies: &[Dsn]) -> Vec<ProxySqlServer> {
    proxies
        .iter()
        .map(|dsn| ProxySqlServer::new(dsn.host.as_str(), dsn.port))
        .collect()
}

/// `mysql_users` rows: root, plus the application account when configured.
/// Both route to the writer hostgroup by default.
pub fn desired_users(credentials: &Credentials, proxy: &ProxySqlSpec) -> Vec<MysqlUser> {
    let mut users = vec![MysqlUser::new(
        credentials.root_user.as_str(),
        credentials.root_password.as_str(),
        proxy.writer_hostgroup,
    )];
    if let Some((user, password)) = credentials.app() {
        if user != credentials.root_user {
            users.push(MysqlUser::new(user, password, proxy.writer_hostgroup));
        }
    }
    users
}

/// Labels selecting this cluster's PVCs
pub fn instance_selector(cluster: &str) -> String {
    format!("{INSTANCE_LABEL}={cluster}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::MysqlClusterSpec;
    use k8s_openapi::ByteString;

    fn secret(pairs: &[(&str, &str)]) -> Secret {
        let mut secret = Secret::default();
        secret.metadata.name = Some("db-secret".to_string());
        secret.data = Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
                .collect(),
        );
        secret
    }

    fn cluster(spec: serde_json::Value) -> MysqlCluster {
        let spec: MysqlClusterSpec = serde_json::from_value(spec).unwrap();
        let mut c = MysqlCluster::new("db", spec);
        c.metadata.namespace = Some("prod".to_string());
        c
    }

    #[test]
    fn test_names() {
        assert_eq!(statefulset_name("db"), "db-mysql");
        assert_eq!(pod_name("db", 2), "db-mysql-2");
        assert_eq!(member_host("db", "prod", 0), "db-mysql-0.db-mysql-headless.prod.svc");
        assert_eq!(
            proxy_host("db", "prod", 1),
            "db-proxysql-1.db-proxysql-headless.prod.svc"
        );
        assert_eq!(instance_selector("db"), "app.kubernetes.io/instance=db");
        assert_eq!(proxy_domain("db", "prod"), "db-proxysql-headless.prod.svc");
    }

    #[test]
    fn test_credentials_defaults() {
        let creds = Credentials::from_secret(&secret(&[("root-password", "pw")])).unwrap();
        assert_eq!(creds.root_user, "root");
        assert_eq!(creds.replication_user, "root");
        assert_eq!(creds.replication_password, "pw");
        assert_eq!(creds.proxysql_admin_user, "admin");
        assert_eq!(creds.proxysql_admin_password, "admin");
        assert!(creds.app().is_none());
    }

    #[test]
    fn test_credentials_missing_root_password() {
        let err = Credentials::from_secret(&secret(&[("root-user", "root")])).unwrap_err();
        match err {
            Error::MissingSecretKey { secret, key } => {
                assert_eq!(secret, "db-secret");
                assert_eq!(key, "root-password");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_credentials_from_string_data() {
        let mut s = Secret::default();
        s.string_data = Some(
            [("root-password".to_string(), "pw".to_string())]
                .into_iter()
                .collect(),
        );
        let creds = Credentials::from_secret(&s).unwrap();
        assert_eq!(creds.root_password, "pw");
    }

    #[test]
    fn test_credentials_debug_hides_passwords() {
        let creds = Credentials::from_secret(&secret(&[
            ("root-password", "hunter2"),
            ("app-user", "app"),
            ("app-password", "app-secret"),
        ]))
        .unwrap();
        let debug = format!("{creds:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("app-secret"));
    }

    #[test]
    fn test_members_follow_replica_count() {
        let c = cluster(serde_json::json!({ "secretName": "s", "replicas": 3, "port": 3307 }));
        let creds = Credentials::from_secret(&secret(&[("root-password", "pw")])).unwrap();
        let members = members(&c, &creds);

        let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, ["db-mysql-0", "db-mysql-1", "db-mysql-2"]);
        assert_eq!(members[1].dsn.host, "db-mysql-1.db-mysql-headless.prod.svc");
        assert_eq!(members[1].dsn.port, 3307);
        assert_eq!(members[1].dsn.username, "root");
    }

    #[test]
    fn test_retired_members_after_scale_down() {
        let c = cluster(serde_json::json!({ "secretName": "s", "replicas": 2 }));
        let creds = Credentials::from_secret(&secret(&[("root-password", "pw")])).unwrap();
        let current = members(&c, &creds);
        let previous: Vec<String> = ["db-mysql-0", "db-mysql-1", "db-mysql-2", "other-mysql-5", "db-mysql-x"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        assert_eq!(
            retired_member_hosts("db", "prod", &previous, &current),
            vec![member_host("db", "prod", 2)]
        );
        assert!(retired_member_hosts("db", "prod", &[], &current).is_empty());
    }

    #[test]
    fn test_proxy_admin_dsns() {
        let creds = Credentials::from_secret(&secret(&[
            ("root-password", "pw"),
            ("proxysql-admin-user", "radmin"),
        ]))
        .unwrap();

        let without = cluster(serde_json::json!({ "secretName": "s" }));
        assert!(proxy_admin_dsns(&without, &creds).is_empty());

        let with = cluster(serde_json::json!({ "secretName": "s", "proxysql": { "replicas": 2 } }));
        let dsns = proxy_admin_dsns(&with, &creds);
        assert_eq!(dsns.len(), 2);
        assert_eq!(dsns[0].port, 6032);
        assert_eq!(dsns[0].username, "radmin");
        assert_eq!(dsns[1].host, "db-proxysql-1.db-proxysql-headless.prod.svc");
    }

    #[test]
    fn test_desired_servers_split_by_master() {
        let c = cluster(serde_json::json!({ "secretName": "s", "replicas": 3 }));
        let creds = Credentials::from_secret(&secret(&[("root-password", "pw")])).unwrap();
        let members = members(&c, &creds);
        let proxy = ProxySqlSpec::default();

        let rows = desired_servers(&members, Some(&members[1].dsn), &proxy);
        let groups: Vec<i64> = rows.iter().map(|r| r.hostgroup_id).collect();
        assert_eq!(groups, [20, 10, 20]);
        assert_eq!(rows[0].comment, "db-mysql-0");
        assert_eq!(rows[0].max_connections, 1000);

        let leaderless = desired_servers(&members, None, &proxy);
        assert!(leaderless.iter().all(|r| r.hostgroup_id == 20));
    }

    #[test]
    fn test_desired_users() {
        let proxy = ProxySqlSpec::default();
        let root_only = Credentials::from_secret(&secret(&[("root-password", "pw")])).unwrap();
        assert_eq!(desired_users(&root_only, &proxy).len(), 1);

        let with_app = Credentials::from_secret(&secret(&[
            ("root-password", "pw"),
            ("app-user", "app"),
            ("app-password", "apw"),
        ]))
        .unwrap();
        let users = desired_users(&with_app, &proxy);
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].username, "app");
        assert_eq!(users[1].default_hostgroup, 10);
    }

    #[test]
    fn test_desired_peers() {
        let peers = desired_peers(&[Dsn::new("p-0", 6032, "admin", "admin")]);
        assert_eq!(peers, vec![ProxySqlServer::new("p-0", 6032)]);
    }
}
