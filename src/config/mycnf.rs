//! `my.cnf` rendering for database pods
//!
//! Variable defaults live in constant tables; everything that varies per pod
//! comes in through [`MyCnfParams`].

use super::ini::IniDocument;
use crate::crd::ClusterMode;
use crate::error::{Error, Result};

pub const MYSQLD_SECTION: &str = "mysqld";
pub const CLIENT_SECTION: &str = "client";

/// Port group replication members talk to each other on
pub const GROUP_COMMUNICATION_PORT: u16 = 33061;

/// Server ids start here so that 0 is never used
const SERVER_ID_BASE: u32 = 100;

const BASE_VARIABLES: &[(&str, &str)] = &[
    ("datadir", "/var/lib/mysql"),
    ("socket", "/var/run/mysqld/mysqld.sock"),
    ("pid_file", "/var/run/mysqld/mysqld.pid"),
    ("bind_address", "0.0.0.0"),
    ("character_set_server", "utf8mb4"),
    ("collation_server", "utf8mb4_general_ci"),
    ("skip_name_resolve", "ON"),
    ("max_connections", "1000"),
    ("innodb_buffer_pool_size", "134217728"),
    ("innodb_flush_log_at_trx_commit", "1"),
    ("sync_binlog", "1"),
    ("log_bin", "binlog"),
    ("relay_log", "relay-bin"),
    ("binlog_format", "ROW"),
    ("binlog_row_image", "FULL"),
    ("gtid_mode", "ON"),
    ("enforce_gtid_consistency", "ON"),
    ("log_slave_updates", "ON"),
    ("master_info_repository", "TABLE"),
    ("relay_log_info_repository", "TABLE"),
];

const GROUP_REPLICATION_VARIABLES: &[(&str, &str)] = &[
    ("plugin_load_add", "group_replication.so"),
    ("binlog_checksum", "NONE"),
    ("transaction_write_set_extraction", "XXHASH64"),
    ("group_replication_start_on_boot", "OFF"),
    ("group_replication_bootstrap_group", "OFF"),
    ("group_replication_recovery_get_public_key", "ON"),
];

const SINGLE_PRIMARY_VARIABLES: &[(&str, &str)] = &[
    ("group_replication_single_primary_mode", "ON"),
    ("group_replication_enforce_update_everywhere_checks", "OFF"),
];

const MULTI_PRIMARY_VARIABLES: &[(&str, &str)] = &[
    ("group_replication_single_primary_mode", "OFF"),
    ("group_replication_enforce_update_everywhere_checks", "ON"),
];

// Semi-sync masters are promoted at runtime, so both sides start disabled.
const SEMI_SYNC_VARIABLES: &[(&str, &str)] = &[
    (
        "plugin_load_add",
        "rpl_semi_sync_master=semisync_master.so;rpl_semi_sync_slave=semisync_slave.so",
    ),
    ("rpl_semi_sync_master_enabled", "OFF"),
    ("rpl_semi_sync_slave_enabled", "OFF"),
    ("rpl_semi_sync_master_timeout", "10000"),
    ("rpl_semi_sync_master_wait_point", "AFTER_SYNC"),
    ("super_read_only", "ON"),
];

/// Per-pod inputs to [`render_mycnf`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MyCnfParams {
    pub mode: ClusterMode,
    /// Pod ordinal within the StatefulSet
    pub ordinal: u32,
    /// Stable DNS name this member reports to the cluster
    pub report_host: String,
    pub port: u16,
    /// Every member's host, including this one
    pub peers: Vec<String>,
    /// Group replication group UUID
    pub group_name: Option<String>,
    /// Extra `mysqld` variables applied last
    pub overrides: Vec<(String, String)>,
}

impl MyCnfParams {
    pub fn server_id(&self) -> u32 {
        SERVER_ID_BASE + self.ordinal
    }

    fn group_seeds(&self) -> String {
        self.peers
            .iter()
            .map(|peer| format!("{peer}:{GROUP_COMMUNICATION_PORT}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Render the configuration of one database pod
pub fn render_mycnf(params: &MyCnfParams) -> Result<IniDocument> {
    let mut doc = IniDocument::new();
    doc.set_all(MYSQLD_SECTION, BASE_VARIABLES);

    let mysqld = doc.section_mut(MYSQLD_SECTION);
    mysqld.set("server_id", params.server_id().to_string());
    mysqld.set("port", params.port.to_string());
    mysqld.set("report_host", params.report_host.clone());
    mysqld.set("report_port", params.port.to_string());

    match params.mode {
        ClusterMode::MgrSinglePrimary | ClusterMode::MgrMultiPrimary => {
            let group_name = params
                .group_name
                .as_deref()
                .filter(|name| is_uuid(name))
                .ok_or_else(|| {
                    Error::ConfigError(format!(
                        "mode {} needs a UUID group name, got {:?}",
                        params.mode, params.group_name
                    ))
                })?;

            doc.set_all(MYSQLD_SECTION, GROUP_REPLICATION_VARIABLES);
            doc.set_all(
                MYSQLD_SECTION,
                if params.mode == ClusterMode::MgrSinglePrimary {
                    SINGLE_PRIMARY_VARIABLES
                } else {
                    MULTI_PRIMARY_VARIABLES
                },
            );

            let mysqld = doc.section_mut(MYSQLD_SECTION);
            mysqld.set("group_replication_group_name", group_name);
            mysqld.set(
                "group_replication_local_address",
                format!("{}:{GROUP_COMMUNICATION_PORT}", params.report_host),
            );
            mysqld.set("group_replication_group_seeds", params.group_seeds());
            mysqld.set("loose_group_replication_ip_allowlist", "0.0.0.0/0");
        }
        ClusterMode::SemiSync => doc.set_all(MYSQLD_SECTION, SEMI_SYNC_VARIABLES),
        ClusterMode::GaleraCluster => return Err(Error::UnsupportedMode(params.mode)),
    }

    let mysqld = doc.section_mut(MYSQLD_SECTION);
    for (key, value) in &params.overrides {
        mysqld.try_set(key.as_str(), value.as_str())?;
    }

    let client = doc.section_mut(CLIENT_SECTION);
    client.set("port", params.port.to_string());
    client.set("socket", "/var/run/mysqld/mysqld.sock");

    Ok(doc)
}

/// Ordinal suffix of a StatefulSet pod name (`db-mysql-2` -> 2)
pub fn ordinal_from_hostname(hostname: &str) -> Result<u32> {
    let short = hostname.split('.').next().unwrap_or(hostname);
    short
        .rsplit_once('-')
        .and_then(|(_, ordinal)| ordinal.parse().ok())
        .ok_or_else(|| {
            Error::ConfigError(format!(
                "hostname '{hostname}' does not end in a pod ordinal"
            ))
        })
}

fn is_uuid(value: &str) -> bool {
    let groups: Vec<&str> = value.split('-').collect();
    groups.len() == 5
        && groups
            .iter()
            .zip([8, 4, 4, 4, 12])
            .all(|(g, len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()))
}
