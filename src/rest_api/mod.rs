//! REST API module
//!
//! Serves operator health, Prometheus metrics and a read-only view of
//! MysqlCluster status.

mod dto;
mod handlers;
mod server;

pub use server::{router, run_server};
