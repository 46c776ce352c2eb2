//! Imperative provisioning trigger.
//!
//! One route; any method provisions the built-in workload template through
//! the same provisioner the reconcile loop uses, bypassing the queue. The
//! response is the fixed acknowledgement even when provisioning fails:
//! failures land in the logs only, so callers cannot distinguish partial
//! failure from success without consulting them. That asymmetry is the
//! endpoint's documented contract. This is an operational escape hatch,
//! not a declarative API.
//!
//! Non-leader replicas refuse up front, before any cluster write, so the
//! lease keeps a single writer even across this path.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::any;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::cluster::ObjectClient;
use crate::metrics::Metrics;
use crate::provisioner::{Provisioner, WorkloadDescriptor};

/// Fixed acknowledgement body, returned regardless of provisioning outcome.
pub const ACK: &str = "worker workload provisioning triggered\n";

/// Refusal body returned by replicas that do not hold the lease.
pub const NOT_LEADER: &str = "not the active replica\n";

/// Shared state behind the trigger route.
pub struct TriggerState<C> {
    /// Provisioner shared with the reconcile loop
    pub provisioner: Provisioner<C>,
    /// Leadership feed from the elector
    pub leadership: watch::Receiver<bool>,
    /// Shared counters
    pub metrics: Metrics,
}

impl<C> Clone for TriggerState<C> {
    fn clone(&self) -> Self {
        Self {
            provisioner: self.provisioner.clone(),
            leadership: self.leadership.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

/// Router serving the trigger route.
pub fn router<C>(state: TriggerState<C>) -> Router
where
    C: ObjectClient<Deployment> + ObjectClient<Service> + 'static,
{
    Router::new()
        .route("/", any(handle::<C>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Provision the template workload; any request method qualifies.
pub(crate) async fn handle<C>(State(state): State<TriggerState<C>>) -> (StatusCode, &'static str)
where
    C: ObjectClient<Deployment> + ObjectClient<Service> + 'static,
{
    if !*state.leadership.borrow() {
        return (StatusCode::SERVICE_UNAVAILABLE, NOT_LEADER);
    }

    state.metrics.triggers.inc();
    let descriptor = WorkloadDescriptor::template();
    match state.provisioner.provision(&descriptor).await {
        Ok(outcome) => info!(
            "Trigger provisioned {}/{}: deployment {:?}, service {:?}",
            descriptor.namespace, descriptor.name, outcome.deployment, outcome.service
        ),
        // acknowledged anyway; see module docs
        Err(e) => error!("Trigger provisioning failed: {}", e),
    }
    (StatusCode::OK, ACK)
}
