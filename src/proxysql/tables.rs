//! Rows of the ProxySQL admin tables the operator manages
//!
//! Each row type knows its table, its natural key and how to map itself to
//! and from column values. Columns not listed here keep ProxySQL defaults.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::sql::SqlValue;

/// Admin tables the synchronizer writes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AdminTable {
    MysqlServers,
    MysqlUsers,
    ProxySqlServers,
}

impl AdminTable {
    pub fn name(&self) -> &'static str {
        match self {
            AdminTable::MysqlServers => "mysql_servers",
            AdminTable::MysqlUsers => "mysql_users",
            AdminTable::ProxySqlServers => "proxysql_servers",
        }
    }

    /// Module name used by `LOAD ... TO RUNTIME` / `SAVE ... TO DISK`
    pub fn module(&self) -> &'static str {
        match self {
            AdminTable::MysqlServers => "MYSQL SERVERS",
            AdminTable::MysqlUsers => "MYSQL USERS",
            AdminTable::ProxySqlServers => "PROXYSQL SERVERS",
        }
    }
}

impl fmt::Display for AdminTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row as read back from an admin table, by column name
pub type Record = BTreeMap<String, SqlValue>;

/// A row type of one admin table
pub trait AdminRow: Clone + Send + Sync + Sized {
    const TABLE: AdminTable;
    /// Natural key; upserts match on these columns
    const KEY_COLUMNS: &'static [&'static str];
    /// Every managed column, key columns included
    const COLUMNS: &'static [&'static str];

    /// Values aligned with `COLUMNS`
    fn values(&self) -> Vec<SqlValue>;

    fn from_record(record: &Record) -> Result<Self>;

    fn columns(&self) -> Vec<(&'static str, SqlValue)> {
        Self::COLUMNS.iter().copied().zip(self.values()).collect()
    }

    fn key(&self) -> Vec<(&'static str, SqlValue)> {
        self.columns()
            .into_iter()
            .filter(|(c, _)| Self::KEY_COLUMNS.contains(c))
            .collect()
    }

    /// Non-key columns, the ones an update rewrites
    fn assignments(&self) -> Vec<(&'static str, SqlValue)> {
        self.columns()
            .into_iter()
            .filter(|(c, _)| !Self::KEY_COLUMNS.contains(c))
            .collect()
    }

    /// Human-readable natural key, used in logs and errors
    fn key_label(&self) -> String {
        self.key()
            .iter()
            .map(|(_, v)| v.to_string())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn missing(table: AdminTable, column: &str) -> Error {
    Error::ConfigError(format!("{table} row has no usable '{column}' column"))
}

fn text(record: &Record, table: AdminTable, column: &str) -> Result<String> {
    match record.get(column) {
        Some(SqlValue::Text(s)) => Ok(s.clone()),
        Some(SqlValue::Int(v)) => Ok(v.to_string()),
        _ => Err(missing(table, column)),
    }
}

fn optional_text(record: &Record, column: &str) -> Option<String> {
    match record.get(column) {
        Some(SqlValue::Text(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn int(record: &Record, table: AdminTable, column: &str) -> Result<i64> {
    record
        .get(column)
        .and_then(SqlValue::as_int)
        .ok_or_else(|| missing(table, column))
}

fn port(record: &Record, table: AdminTable, column: &str) -> Result<u16> {
    u16::try_from(int(record, table, column)?).map_err(|_| missing(table, column))
}

fn flag(record: &Record, table: AdminTable, column: &str) -> Result<bool> {
    Ok(int(record, table, column)? != 0)
}

/// `proxysql_servers`: the proxy cluster's own peers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySqlServer {
    pub hostname: String,
    pub port: u16,
    pub weight: i64,
    pub comment: String,
}

impl ProxySqlServer {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            weight: 0,
            comment: String::new(),
        }
    }
}

impl AdminRow for ProxySqlServer {
    const TABLE: AdminTable = AdminTable::ProxySqlServers;
    const KEY_COLUMNS: &'static [&'static str] = &["hostname"];
    const COLUMNS: &'static [&'static str] = &["hostname", "port", "weight", "comment"];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.hostname.as_str().into(),
            self.port.into(),
            self.weight.into(),
            self.comment.as_str().into(),
        ]
    }

    fn from_record(record: &Record) -> Result<Self> {
        let t = Self::TABLE;
        Ok(Self {
            hostname: text(record, t, "hostname")?,
            port: port(record, t, "port")?,
            weight: int(record, t, "weight")?,
            comment: optional_text(record, "comment").unwrap_or_default(),
        })
    }
}

/// Backend state as ProxySQL spells it
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    #[default]
    Online,
    Shunned,
    OfflineSoft,
    OfflineHard,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Online => "ONLINE",
            ServerStatus::Shunned => "SHUNNED",
            ServerStatus::OfflineSoft => "OFFLINE_SOFT",
            ServerStatus::OfflineHard => "OFFLINE_HARD",
        }
    }
}

impl std::str::FromStr for ServerStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ONLINE" => Ok(ServerStatus::Online),
            "SHUNNED" => Ok(ServerStatus::Shunned),
            "OFFLINE_SOFT" => Ok(ServerStatus::OfflineSoft),
            "OFFLINE_HARD" => Ok(ServerStatus::OfflineHard),
            other => Err(Error::ConfigError(format!("unknown server status '{other}'"))),
        }
    }
}

/// `mysql_servers`: database backends, keyed by hostname so a member moves
/// between hostgroups by update
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MysqlServer {
    pub hostgroup_id: i64,
    pub hostname: String,
    pub port: u16,
    pub gtid_port: u16,
    pub status: ServerStatus,
    pub weight: i64,
    pub compression: i64,
    pub max_connections: i64,
    pub max_replication_lag: i64,
    pub use_ssl: bool,
    pub max_latency_ms: i64,
    pub comment: String,
}

impl MysqlServer {
    pub fn new(hostgroup_id: i64, hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostgroup_id,
            hostname: hostname.into(),
            port,
            gtid_port: 0,
            status: ServerStatus::Online,
            weight: 1,
            compression: 0,
            max_connections: 1000,
            max_replication_lag: 0,
            use_ssl: false,
            max_latency_ms: 0,
            comment: String::new(),
        }
    }

    pub fn with_max_connections(mut self, max_connections: i64) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }
}

impl AdminRow for MysqlServer {
    const TABLE: AdminTable = AdminTable::MysqlServers;
    const KEY_COLUMNS: &'static [&'static str] = &["hostname"];
    const COLUMNS: &'static [&'static str] = &[
        "hostgroup_id",
        "hostname",
        "port",
        "gtid_port",
        "status",
        "weight",
        "compression",
        "max_connections",
        "max_replication_lag",
        "use_ssl",
        "max_latency_ms",
        "comment",
    ];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.hostgroup_id.into(),
            self.hostname.as_str().into(),
            self.port.into(),
            self.gtid_port.into(),
            self.status.as_str().into(),
            self.weight.into(),
            self.compression.into(),
            self.max_connections.into(),
            self.max_replication_lag.into(),
            self.use_ssl.into(),
            self.max_latency_ms.into(),
            self.comment.as_str().into(),
        ]
    }

    fn from_record(record: &Record) -> Result<Self> {
        let t = Self::TABLE;
        Ok(Self {
            hostgroup_id: int(record, t, "hostgroup_id")?,
            hostname: text(record, t, "hostname")?,
            port: port(record, t, "port")?,
            gtid_port: port(record, t, "gtid_port")?,
            status: text(record, t, "status")?.parse()?,
            weight: int(record, t, "weight")?,
            compression: int(record, t, "compression")?,
            max_connections: int(record, t, "max_connections")?,
            max_replication_lag: int(record, t, "max_replication_lag")?,
            use_ssl: flag(record, t, "use_ssl")?,
            max_latency_ms: int(record, t, "max_latency_ms")?,
            comment: optional_text(record, "comment").unwrap_or_default(),
        })
    }
}

/// `mysql_users`: accounts clients log in to the proxy with, keyed by
/// `(username, frontend)`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MysqlUser {
    pub username: String,
    pub password: String,
    pub active: bool,
    pub use_ssl: bool,
    pub default_hostgroup: i64,
    pub default_schema: Option<String>,
    pub schema_locked: bool,
    pub transaction_persistent: bool,
    pub fast_forward: bool,
    pub backend: bool,
    pub frontend: bool,
    pub max_connections: i64,
    pub comment: String,
}

impl MysqlUser {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        default_hostgroup: i64,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            active: true,
            use_ssl: false,
            default_hostgroup,
            default_schema: None,
            schema_locked: false,
            transaction_persistent: true,
            fast_forward: false,
            backend: true,
            frontend: true,
            max_connections: 10000,
            comment: String::new(),
        }
    }
}

impl AdminRow for MysqlUser {
    const TABLE: AdminTable = AdminTable::MysqlUsers;
    const KEY_COLUMNS: &'static [&'static str] = &["username", "frontend"];
    const COLUMNS: &'static [&'static str] = &[
        "username",
        "password",
        "active",
        "use_ssl",
        "default_hostgroup",
        "default_schema",
        "schema_locked",
        "transaction_persistent",
        "fast_forward",
        "backend",
        "frontend",
        "max_connections",
        "comment",
    ];

    fn values(&self) -> Vec<SqlValue> {
        vec![
            self.username.as_str().into(),
            self.password.as_str().into(),
            self.active.into(),
            self.use_ssl.into(),
            self.default_hostgroup.into(),
            self.default_schema.clone().into(),
            self.schema_locked.into(),
            self.transaction_persistent.into(),
            self.fast_forward.into(),
            self.backend.into(),
            self.frontend.into(),
            self.max_connections.into(),
            self.comment.as_str().into(),
        ]
    }

    fn from_record(record: &Record) -> Result<Self> {
        let t = Self::TABLE;
        Ok(Self {
            username: text(record, t, "username")?,
            password: optional_text(record, "password").unwrap_or_default(),
            active: flag(record, t, "active")?,
            use_ssl: flag(record, t, "use_ssl")?,
            default_hostgroup: int(record, t, "default_hostgroup")?,
            default_schema: optional_text(record, "default_schema"),
            schema_locked: flag(record, t, "schema_locked")?,
            transaction_persistent: flag(record, t, "transaction_persistent")?,
            fast_forward: flag(record, t, "fast_forward")?,
            backend: flag(record, t, "backend")?,
            frontend: flag(record, t, "frontend")?,
            max_connections: int(record, t, "max_connections")?,
            comment: optional_text(record, "comment").unwrap_or_default(),
        })
    }
}
