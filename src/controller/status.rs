//! Status computation for MysqlCluster
//!
//! Condition helpers follow Kubernetes API conventions: a condition's
//! `lastTransitionTime` only moves when its status flips.

use std::time::Duration;

use chrono::Utc;

use super::topology::Member;
use crate::crd::{ClusterPhase, Condition, MysqlClusterStatus};
use crate::mysql::Dsn;

pub const CONDITION_TYPE_READY: &str = "Ready";
pub const CONDITION_TYPE_PROXY_SYNCED: &str = "ProxySynced";

pub const CONDITION_STATUS_TRUE: &str = "True";
pub const CONDITION_STATUS_FALSE: &str = "False";

pub const REQUEUE_RUNNING: Duration = Duration::from_secs(60);
pub const REQUEUE_NOT_READY: Duration = Duration::from_secs(15);

/// Update or add a condition
///
/// The transition time is refreshed only when the status changes; reason and
/// message are always overwritten.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: &str,
    reason: &str,
    message: &str,
) {
    let now = Utc::now().to_rfc3339();

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status {
            existing.last_transition_time = now;
        }
        existing.status = status.to_string();
        existing.reason = reason.to_string();
        existing.message = message.to_string();
    } else {
        conditions.push(Condition {
            type_: type_.to_string(),
            status: status.to_string(),
            last_transition_time: now,
            reason: reason.to_string(),
            message: message.to_string(),
            observed_generation: None,
        });
    }
}

pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == CONDITION_STATUS_TRUE)
        .unwrap_or(false)
}

pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) {
    conditions.retain(|c| c.type_ != type_);
}

/// How the ProxySQL tier fared in one pass
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// No ProxySQL tier is configured
    Disabled,
    Synced { proxies: usize },
    /// Some admin rows failed; each entry names the row and proxy
    RowFailures(Vec<String>),
}

/// Everything one apply pass observed
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassOutcome {
    pub members: Vec<String>,
    pub healthy_members: Vec<String>,
    pub master: Option<String>,
    /// Display of the `start_cluster` error, when there was one
    pub start_error: Option<String>,
    pub proxy: ProxyOutcome,
}

impl PassOutcome {
    pub fn phase(&self) -> ClusterPhase {
        if self.healthy_members.len() == self.members.len() {
            ClusterPhase::Running
        } else {
            ClusterPhase::NotReady
        }
    }
}

/// Member names for `dsns`, kept in declared member order
pub fn names_of(members: &[Member], dsns: &[Dsn]) -> Vec<String> {
    members
        .iter()
        .filter(|m| dsns.contains(&m.dsn))
        .map(|m| m.name.clone())
        .collect()
}

fn carry_conditions(previous: Option<&MysqlClusterStatus>) -> Vec<Condition> {
    previous.map(|s| s.conditions.clone()).unwrap_or_default()
}

fn stamp(conditions: &mut [Condition], generation: Option<i64>) {
    for condition in conditions.iter_mut() {
        condition.observed_generation = generation;
    }
}

/// Fold one pass into the status written back to the resource
pub fn build_status(
    previous: Option<&MysqlClusterStatus>,
    generation: Option<i64>,
    outcome: &PassOutcome,
) -> MysqlClusterStatus {
    let phase = outcome.phase();
    let mut conditions = carry_conditions(previous);

    let healthy = format!(
        "{}/{} members healthy",
        outcome.healthy_members.len(),
        outcome.members.len()
    );
    let (ready, reason, message) = match (&outcome.start_error, phase) {
        (Some(e), _) => (false, "StartFailed", format!("{healthy}: {e}")),
        (None, ClusterPhase::Running) => (true, "AllMembersHealthy", healthy),
        (None, _) => (false, "MembersUnhealthy", healthy),
    };
    set_condition(
        &mut conditions,
        CONDITION_TYPE_READY,
        if ready { CONDITION_STATUS_TRUE } else { CONDITION_STATUS_FALSE },
        reason,
        &message,
    );

    match &outcome.proxy {
        ProxyOutcome::Disabled => remove_condition(&mut conditions, CONDITION_TYPE_PROXY_SYNCED),
        ProxyOutcome::Synced { proxies } => set_condition(
            &mut conditions,
            CONDITION_TYPE_PROXY_SYNCED,
            CONDITION_STATUS_TRUE,
            "Synced",
            &format!("Admin tables synced on {proxies} proxies"),
        ),
        ProxyOutcome::RowFailures(failures) => set_condition(
            &mut conditions,
            CONDITION_TYPE_PROXY_SYNCED,
            CONDITION_STATUS_FALSE,
            "RowSyncFailed",
            &failures.join("; "),
        ),
    }
    stamp(&mut conditions, generation);

    MysqlClusterStatus {
        phase,
        members: outcome.members.clone(),
        healthy_members: outcome.healthy_members.clone(),
        master: outcome.master.clone(),
        message: Some(message),
        observed_generation: generation,
        conditions,
    }
}

/// Status for a spec rejected before any node was contacted
pub fn invalid_spec_status(
    previous: Option<&MysqlClusterStatus>,
    generation: Option<i64>,
    message: &str,
) -> MysqlClusterStatus {
    let mut conditions = carry_conditions(previous);
    set_condition(
        &mut conditions,
        CONDITION_TYPE_READY,
        CONDITION_STATUS_FALSE,
        "InvalidSpec",
        message,
    );
    stamp(&mut conditions, generation);

    MysqlClusterStatus {
        phase: ClusterPhase::NotReady,
        message: Some(message.to_string()),
        observed_generation: generation,
        conditions,
        ..previous.cloned().unwrap_or_default()
    }
}

pub fn terminating_status(previous: Option<&MysqlClusterStatus>) -> MysqlClusterStatus {
    MysqlClusterStatus {
        phase: ClusterPhase::Terminating,
        message: Some("Cluster is being deleted".to_string()),
        ..previous.cloned().unwrap_or_default()
    }
}

/// Requeue interval after a successful pass
pub fn requeue_after(phase: ClusterPhase) -> Duration {
    match phase {
        ClusterPhase::Running => REQUEUE_RUNNING,
        _ => REQUEUE_NOT_READY,
    }
}
