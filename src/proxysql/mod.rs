//! ProxySQL topology synchronization
//!
//! The operator keeps three admin tables of every proxy replica in line with
//! the database topology: `mysql_servers` (backends by hostgroup),
//! `proxysql_servers` (proxy peers) and `mysql_users` (client accounts).

pub mod admin;
pub mod sync;
pub mod tables;


pub use admin::{AdminConnector, AdminSession, ProxyAdminConnector};
pub use sync::{ProxySynchronizer, UpsertReport};
pub use tables::{AdminRow, AdminTable, MysqlServer, MysqlUser, ProxySqlServer, Record, ServerStatus};
