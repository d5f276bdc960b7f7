//! mysql-k8s: Kubernetes operator for MySQL clusters fronted by ProxySQL
//!
//! This crate drives MySQL group replication and semi-synchronous
//! replication clusters toward a declarative `MysqlCluster` resource and
//! keeps ProxySQL's admin tables in step with the live topology.

pub mod cluster;
pub mod config;
pub mod controller;
pub mod crd;
pub mod deadline;
pub mod error;
pub mod mysql;
pub mod proxysql;
pub mod sql;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
