//! Prometheus metrics for the reconcile loop and trigger path.

use prometheus::{Encoder, IntCounter, Registry, TextEncoder};
use tracing::warn;

/// Counters shared across workers and the trigger endpoint.
///
/// Clones share the underlying registry and counters.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    /// Reconcile passes executed
    pub reconciles: IntCounter,
    /// Reconcile passes that failed terminally
    pub reconcile_failures: IntCounter,
    /// Requests re-queued (backoff or conflict)
    pub requeues: IntCounter,
    /// Trigger endpoint invocations that reached provisioning
    pub triggers: IntCounter,
}

impl Metrics {
    /// Build and register all counters.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let reconciles =
            IntCounter::new("cloudbase_reconcile_total", "Reconcile passes executed")?;
        let reconcile_failures = IntCounter::new(
            "cloudbase_reconcile_failures_total",
            "Reconcile passes that failed terminally",
        )?;
        let requeues = IntCounter::new(
            "cloudbase_requeue_total",
            "Reconcile requests re-queued after a pass",
        )?;
        let triggers = IntCounter::new(
            "cloudbase_trigger_total",
            "Trigger endpoint invocations that reached provisioning",
        )?;
        registry.register(Box::new(reconciles.clone()))?;
        registry.register(Box::new(reconcile_failures.clone()))?;
        registry.register(Box::new(requeues.clone()))?;
        registry.register(Box::new(triggers.clone()))?;
        Ok(Self {
            registry,
            reconciles,
            reconcile_failures,
            requeues,
            triggers,
        })
    }

    /// Render the registry in Prometheus text format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
