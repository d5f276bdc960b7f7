//! MySQL node access
//!
//! A [`Dsn`] names one database endpoint. Operations open a fresh connection
//! through a [`NodeConnector`], run their statements on the returned
//! [`NodeSession`] and drop it; nothing is pooled between calls.

pub mod client;
pub mod dsn;
pub mod session;

pub use client::MysqlConnector;
pub use dsn::Dsn;
pub use session::{NodeConnector, NodeSession, ReplicationCredentials};
