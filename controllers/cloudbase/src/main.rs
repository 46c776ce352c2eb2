//! CloudBase Operator
//!
//! Converges `CloudBaseMain` custom resources to a worker deployment and
//! the NodePort service exposing it, and serves an imperative provisioning
//! trigger that shares the same idempotent provisioning path outside the
//! declarative loop.

mod backoff;
mod cluster;
mod error;
mod leader;
mod manager;
mod metrics;
mod probes;
mod provisioner;
mod reconciler;
mod trigger;
mod watcher;
mod worker;
mod workqueue;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod provisioner_test;

use std::env;

use tracing::info;

use crate::error::ControllerError;
use crate::manager::{Config, Manager};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        return Err(ControllerError::InvalidConfig(
            "failed to install rustls ring crypto provider".to_string(),
        ));
    }

    info!("Starting CloudBase operator");

    let config = Config {
        metrics_addr: env::var("METRICS_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
        probe_addr: env::var("PROBE_ADDR").unwrap_or_else(|_| "0.0.0.0:8081".to_string()),
        trigger_addr: env::var("TRIGGER_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string()),
        enable_leader_election: env::var("ENABLE_LEADER_ELECTION")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false),
        leader_identity: env::var("LEADER_IDENTITY").unwrap_or_else(|_| default_identity()),
        lease_namespace: env::var("LEASE_NAMESPACE")
            .unwrap_or_else(|_| provisioner::DEFAULT_NAMESPACE.to_string()),
        watch_namespace: env::var("WATCH_NAMESPACE").ok(),
        workers: env::var("WORKER_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(2),
    };

    info!("Configuration:");
    info!("  Probe address: {}", config.probe_addr);
    info!("  Metrics address: {}", config.metrics_addr);
    info!("  Trigger address: {}", config.trigger_addr);
    info!("  Leader election: {}", config.enable_leader_election);
    info!(
        "  Namespace: {}",
        config.watch_namespace.as_deref().unwrap_or("all namespaces")
    );
    info!("  Workers: {}", config.workers);

    let manager = Manager::new(config).await?;
    manager.run().await?;

    info!("CloudBase operator stopped");
    Ok(())
}

/// Pod name via HOSTNAME, falling back to a random identity.
fn default_identity() -> String {
    env::var("HOSTNAME")
        .unwrap_or_else(|_| format!("cloudbase-controller-{}", uuid::Uuid::new_v4()))
}
