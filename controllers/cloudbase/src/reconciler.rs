//! Reconciliation of CloudBaseMain resources.
//!
//! One pass per dequeued request: load the resource, derive its workload
//! descriptor, ensure the workload pair exists, record status. Every
//! infrastructure failure maps to a requeue directive; only a spec that
//! cannot describe a workload is terminal. Redundant passes are safe by
//! construction (idempotent creates, generation-guarded status writes),
//! which is what the queue's at-least-once delivery requires.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterError, ObjectClient};
use crate::error::ControllerError;
use crate::provisioner::{Provisioner, WorkloadDescriptor};
use crds::{CloudBaseMain, CloudBaseMainStatus, WorkloadState};

/// Identity of one CloudBaseMain to reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Request {
    /// Namespace of the resource
    pub namespace: String,
    /// Name of the resource
    pub name: String,
}

impl Request {
    /// Build a request from a namespaced identity.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// What the worker should do with a request after one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    /// Converged; nothing further to do
    No,
    /// Transient failure; retry with exponential backoff
    Backoff,
    /// Lost an optimistic-concurrency race; retry immediately
    Immediate,
}

/// Reconciles one CloudBaseMain identity per call.
pub struct Reconciler<C> {
    cluster: Arc<C>,
    provisioner: Provisioner<C>,
}

impl<C> Reconciler<C>
where
    C: ObjectClient<CloudBaseMain> + ObjectClient<Deployment> + ObjectClient<Service>,
{
    /// Create a reconciler sharing the provisioner's cluster client.
    pub fn new(cluster: Arc<C>, provisioner: Provisioner<C>) -> Self {
        Self {
            cluster,
            provisioner,
        }
    }

    /// One reconcile pass for one identity.
    ///
    /// `Err` is terminal for the request (malformed spec); the worker logs
    /// it and does not retry. All infrastructure failures come back as a
    /// requeue directive instead.
    pub async fn reconcile(&self, request: &Request) -> Result<Requeue, ControllerError> {
        debug!("Reconciling {}", request);

        let mut workload = match self.fetch(request).await {
            Ok(Some(workload)) => workload,
            Ok(None) => {
                // deleted since the event was queued; nothing to converge
                debug!("{} is gone, nothing to do", request);
                return Ok(Requeue::No);
            }
            Err(e) => {
                warn!("Failed to load {}: {}", request, e);
                return Ok(Requeue::Backoff);
            }
        };

        let descriptor = match WorkloadDescriptor::for_workload(&workload) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                self.record_failure(request, &mut workload, &e.to_string())
                    .await;
                return Err(e);
            }
        };

        if let Err(e) = self.provisioner.provision(&descriptor).await {
            warn!("Provisioning {} failed: {}", request, e);
            return Ok(Requeue::Backoff);
        }

        if status_is_current(&workload) {
            debug!("{} status already current", request);
            return Ok(Requeue::No);
        }

        workload.status = Some(CloudBaseMainStatus {
            state: WorkloadState::Provisioned,
            observed_generation: workload.metadata.generation,
            last_reconciled: Some(Utc::now()),
            error: None,
        });
        match self.write_status(&workload).await {
            Ok(()) => {
                info!("Reconciled {}", request);
                Ok(Requeue::No)
            }
            Err(ClusterError::Conflict(_)) => {
                debug!("Status write for {} conflicted, requeueing", request);
                Ok(Requeue::Immediate)
            }
            Err(ClusterError::NotFound(_)) => {
                debug!("{} deleted during reconcile", request);
                Ok(Requeue::No)
            }
            Err(e) => {
                warn!("Status write for {} failed: {}", request, e);
                Ok(Requeue::Backoff)
            }
        }
    }

    async fn fetch(&self, request: &Request) -> Result<Option<CloudBaseMain>, ClusterError> {
        ObjectClient::<CloudBaseMain>::get(
            self.cluster.as_ref(),
            &request.namespace,
            &request.name,
        )
        .await
    }

    async fn write_status(&self, workload: &CloudBaseMain) -> Result<(), ClusterError> {
        ObjectClient::<CloudBaseMain>::update_status(self.cluster.as_ref(), workload)
            .await
            .map(|_| ())
    }

    /// Record a terminal classification failure on status, best effort.
    async fn record_failure(
        &self,
        request: &Request,
        workload: &mut CloudBaseMain,
        message: &str,
    ) {
        if let Some(status) = &workload.status {
            if status.state == WorkloadState::Failed && status.error.as_deref() == Some(message) {
                debug!("{} already carries this failure, skipping update", request);
                return;
            }
        }
        workload.status = Some(CloudBaseMainStatus {
            state: WorkloadState::Failed,
            observed_generation: workload.metadata.generation,
            last_reconciled: Some(Utc::now()),
            error: Some(message.to_string()),
        });
        if let Err(e) = self.write_status(workload).await {
            error!("Failed to record failure status for {}: {}", request, e);
        }
    }
}

/// True when status already reflects the current spec generation.
pub(crate) fn status_is_current(workload: &CloudBaseMain) -> bool {
    let Some(status) = &workload.status else {
        return false;
    };
    status.state == WorkloadState::Provisioned
        && status.observed_generation.is_some()
        && status.observed_generation == workload.metadata.generation
}
