//! Controller-specific error types.
//!
//! Fatal errors (client construction, server binds, subsystem exits)
//! propagate to `main` and terminate the process with a nonzero exit.
//! Per-request errors stay inside the reconcile loop: infrastructure
//! failures become requeues, and only classification failures (a spec that
//! cannot describe a workload) surface as `InvalidWorkload`.

use thiserror::Error;

use crate::cluster::ClusterError;

/// Errors that can occur in the CloudBase controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Cluster API error surfaced outside the requeue path
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Spec that cannot be turned into a workload descriptor (terminal for
    /// that resource until it is edited)
    #[error("Invalid workload: {0}")]
    InvalidWorkload(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// An HTTP server failed to bind or serve
    #[error("Server error on {addr}: {source}")]
    Serve {
        /// Listen address of the failing server
        addr: String,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// A background subsystem exited unexpectedly
    #[error("Subsystem {0} failed: {1}")]
    Subsystem(&'static str, String),
}
