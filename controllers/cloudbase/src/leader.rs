//! Leader election using Kubernetes Leases.
//!
//! Cross-replica mutual exclusion for the write paths (worker pool,
//! trigger endpoint) over a `coordination.k8s.io/v1` Lease. Updates carry
//! the resourceVersion read moments earlier, so two replicas racing for
//! the same lease resolve through a 409 conflict rather than both winning.
//!
//! Leadership state is published over a watch channel. Losing the lease
//! demotes without stopping the process; the loop keeps trying to
//! re-acquire, and the worker pool resumes if it succeeds.

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::Client;
use kube::api::{Api, PostParams};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cluster::ClusterError;

/// Lease name for the operator leader election.
pub const LEASE_NAME: &str = "cloudbase-operator-leader";

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Lease-based leader elector.
pub struct LeaderElector {
    api: Api<Lease>,
    lease_name: String,
    namespace: String,
    identity: String,
}

impl LeaderElector {
    /// Creates an elector for one replica identity.
    pub fn new(client: Client, namespace: &str, identity: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            lease_name: LEASE_NAME.to_string(),
            namespace: namespace.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Run the election loop until shutdown, publishing leadership state.
    pub async fn run(self, leadership: watch::Sender<bool>, mut shutdown: watch::Receiver<bool>) {
        info!(
            identity = %self.identity,
            lease = %self.lease_name,
            namespace = %self.namespace,
            "Starting leader election"
        );
        let mut last_renewed = Instant::now();

        loop {
            let was_leader = *leadership.borrow();
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    last_renewed = Instant::now();
                    if !was_leader {
                        info!(identity = %self.identity, "Leadership acquired");
                        let _ = leadership.send(true);
                    }
                }
                Ok(false) => {
                    if was_leader {
                        warn!(identity = %self.identity, "Leadership lost");
                        let _ = leadership.send(false);
                    } else {
                        debug!(identity = %self.identity, "Lease held by another replica");
                    }
                }
                Err(e) => {
                    // A transient API failure while leading is tolerated
                    // until the lease could have expired under us; past
                    // that point another replica may hold it, so stop
                    // writing.
                    if was_leader && last_renewed.elapsed() >= LEASE_DURATION {
                        warn!(
                            identity = %self.identity,
                            error = %e,
                            "Lease renewal failed past the lease duration, demoting"
                        );
                        let _ = leadership.send(false);
                    } else {
                        warn!(identity = %self.identity, error = %e, "Lease request failed, will retry");
                    }
                }
            }

            let wait = if *leadership.borrow() {
                RENEW_INTERVAL
            } else {
                RETRY_INTERVAL
            };
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!("Leader elector stopping");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// One compare-and-swap attempt: read the lease, decide, write back
    /// with the read resourceVersion.
    async fn try_acquire_or_renew(&self) -> Result<bool, ClusterError> {
        let now = Utc::now();
        let existing = self
            .api
            .get_opt(&self.lease_name)
            .await
            .map_err(ClusterError::from)?;

        match existing {
            None => self.create_lease(now).await,
            Some(lease) => {
                let spec = lease.spec.as_ref();
                let holder = spec.and_then(|s| s.holder_identity.as_deref());

                if holder == Some(self.identity.as_str()) {
                    return self.renew(lease.clone(), now).await;
                }

                let renew_time = spec.and_then(|s| s.renew_time.as_ref());
                let duration = spec.and_then(|s| s.lease_duration_seconds);
                let expired = match (renew_time, duration) {
                    (Some(renewed), Some(secs)) => {
                        now > renewed.0 + chrono::Duration::seconds(i64::from(secs))
                    }
                    _ => true,
                };

                if expired {
                    self.take_over(&lease, now).await
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Create the lease; first replica here becomes leader.
    async fn create_lease(&self, now: chrono::DateTime<Utc>) -> Result<bool, ClusterError> {
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                ..Default::default()
            },
            spec: Some(self.lease_spec(now, 0)),
        };
        match self.api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!(identity = %self.identity, "Created leader lease");
                Ok(true)
            }
            Err(e) => match ClusterError::from(e) {
                ClusterError::AlreadyExists(_) | ClusterError::Conflict(_) => {
                    debug!(identity = %self.identity, "Lease creation lost the race");
                    Ok(false)
                }
                other => Err(other),
            },
        }
    }

    /// Renew a lease we hold; a conflict means we lost it.
    async fn renew(&self, mut lease: Lease, now: chrono::DateTime<Utc>) -> Result<bool, ClusterError> {
        if let Some(spec) = lease.spec.as_mut() {
            spec.renew_time = Some(MicroTime(now));
        }
        match self
            .api
            .replace(&self.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => {
                debug!(identity = %self.identity, "Lease renewed");
                Ok(true)
            }
            Err(e) => match ClusterError::from(e) {
                ClusterError::Conflict(_) => {
                    warn!(identity = %self.identity, "Lease renewal conflicted");
                    Ok(false)
                }
                other => Err(other),
            },
        }
    }

    /// Take over an expired lease; a conflict means another replica won.
    async fn take_over(&self, expired: &Lease, now: chrono::DateTime<Utc>) -> Result<bool, ClusterError> {
        let transitions = expired
            .spec
            .as_ref()
            .and_then(|s| s.lease_transitions)
            .unwrap_or(0);
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.lease_name.clone()),
                namespace: Some(self.namespace.clone()),
                resource_version: expired.metadata.resource_version.clone(),
                ..Default::default()
            },
            spec: Some(self.lease_spec(now, transitions + 1)),
        };
        match self
            .api
            .replace(&self.lease_name, &PostParams::default(), &lease)
            .await
        {
            Ok(_) => {
                info!(
                    identity = %self.identity,
                    transitions = transitions + 1,
                    "Took over expired lease"
                );
                Ok(true)
            }
            Err(e) => match ClusterError::from(e) {
                ClusterError::Conflict(_) => {
                    debug!(identity = %self.identity, "Lease takeover lost the race");
                    Ok(false)
                }
                other => Err(other),
            },
        }
    }

    fn lease_spec(&self, now: chrono::DateTime<Utc>, transitions: i32) -> LeaseSpec {
        LeaseSpec {
            holder_identity: Some(self.identity.clone()),
            lease_duration_seconds: Some(LEASE_DURATION.as_secs() as i32),
            acquire_time: Some(MicroTime(now)),
            renew_time: Some(MicroTime(now)),
            lease_transitions: Some(transitions),
            ..Default::default()
        }
    }
}
