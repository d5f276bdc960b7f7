//! Custom Resource Definitions for the MySQL operator

mod mysql_cluster;
pub mod types;


pub use mysql_cluster::{
    MysqlCluster, MysqlClusterSpec, MysqlClusterStatus, SpecValidationError,
    MAX_GROUP_REPLICATION_MEMBERS,
};
pub use types::*;
