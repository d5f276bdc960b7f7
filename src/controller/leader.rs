//! Lease-based leader election
//!
//! Only the replica holding the `coordination.k8s.io` Lease reconciles. Whether
//! to renew, take over or wait is decided by [`claim`] from the lease spec and
//! the clock alone; [`LeaderElector`] only reads and writes the Lease.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::MicroTime;
use kube::api::{Api, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::Result;

pub const LEASE_NAME: &str = "mysql-operator-leader";
const LEASE_DURATION_SECS: i32 = 15;

/// What this replica should do with the Lease it just read
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaseClaim {
    /// We hold it; push the renew time forward
    Renew,
    /// The holder let it lapse; claim it
    TakeOver {
        previous: Option<String>,
        transitions: i32,
    },
    /// Someone else holds a live lease
    Held { holder: Option<String> },
}

/// Decide how to treat a Lease whose spec is `spec` at time `now`
pub fn claim(spec: Option<&LeaseSpec>, identity: &str, now: DateTime<Utc>) -> LeaseClaim {
    let holder = spec.and_then(|s| s.holder_identity.clone());
    if holder.as_deref() == Some(identity) {
        return LeaseClaim::Renew;
    }

    let duration = spec
        .and_then(|s| s.lease_duration_seconds)
        .unwrap_or(LEASE_DURATION_SECS);
    let live = spec
        .and_then(|s| s.renew_time.as_ref())
        .is_some_and(|renew| now <= renew.0 + chrono::Duration::seconds(i64::from(duration)));

    if live && holder.is_some() {
        LeaseClaim::Held { holder }
    } else {
        LeaseClaim::TakeOver {
            previous: holder,
            transitions: spec.and_then(|s| s.lease_transitions).unwrap_or(0) + 1,
        }
    }
}

/// Merge patch applying `claim`; `None` when there is nothing to write
fn claim_patch(claim: &LeaseClaim, identity: &str, now: DateTime<Utc>) -> Option<Value> {
    match claim {
        LeaseClaim::Renew => Some(json!({
            "spec": {
                "renewTime": MicroTime(now),
                "leaseDurationSeconds": LEASE_DURATION_SECS,
            }
        })),
        LeaseClaim::TakeOver { transitions, .. } => Some(json!({
            "spec": {
                "holderIdentity": identity,
                "acquireTime": MicroTime(now),
                "renewTime": MicroTime(now),
                "leaseDurationSeconds": LEASE_DURATION_SECS,
                "leaseTransitions": transitions,
            }
        })),
        LeaseClaim::Held { .. } => None,
    }
}

/// Keeps `is_leader` in step with ownership of [`LEASE_NAME`]
pub struct LeaderElector {
    leases: Api<Lease>,
    namespace: String,
    identity: String,
    is_leader: Arc<AtomicBool>,
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, identity: &str, is_leader: Arc<AtomicBool>) -> Self {
        Self {
            leases: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
            is_leader,
        }
    }

    /// Renew well inside the lease duration while leading; retry more often
    /// while following.
    pub async fn run(self) {
        let lease = Duration::from_secs(LEASE_DURATION_SECS as u64);
        loop {
            let leading = match self.try_acquire().await {
                Ok(leading) => leading,
                Err(e) => {
                    warn!("Leader election error: {}", e);
                    false
                }
            };
            self.set_leader(leading);
            let wait = if leading { lease * 2 / 3 } else { lease / 3 };
            tokio::time::sleep(wait).await;
        }
    }

    fn set_leader(&self, leading: bool) {
        let was = self.is_leader.swap(leading, Ordering::Relaxed);
        match (was, leading) {
            (false, true) => info!("Acquired leadership for lease {}", LEASE_NAME),
            (true, false) => warn!("Lost leadership for lease {}", LEASE_NAME),
            _ => {}
        }
    }

    async fn try_acquire(&self) -> Result<bool> {
        let now = Utc::now();
        let Some(existing) = self.leases.get_opt(LEASE_NAME).await? else {
            self.create(now).await?;
            return Ok(true);
        };

        let decision = claim(existing.spec.as_ref(), &self.identity, now);
        debug!(?decision, "Lease {} checked", LEASE_NAME);
        if let LeaseClaim::TakeOver { previous, .. } = &decision {
            info!("Lease held by {:?} has lapsed, taking over", previous);
        }
        match claim_patch(&decision, &self.identity, now) {
            Some(patch) => {
                self.leases
                    .patch(LEASE_NAME, &PatchParams::default(), &Patch::Merge(&patch))
                    .await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create(&self, now: DateTime<Utc>) -> Result<()> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(LEASE_NAME.to_string()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(self.identity.clone()),
                acquire_time: Some(MicroTime(now)),
                renew_time: Some(MicroTime(now)),
                lease_duration_seconds: Some(LEASE_DURATION_SECS),
                lease_transitions: Some(0),
                ..Default::default()
            }),
        };
        self.leases.create(&PostParams::default(), &lease).await?;
        info!("Created lease {} with holder {}", LEASE_NAME, self.identity);
        Ok(())
    }
}
