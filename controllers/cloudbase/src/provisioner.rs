//! Workload provisioning.
//!
//! Turns a workload descriptor into its deployment and NodePort service.
//! Provisioning is create-only and idempotent: an object that already
//! exists counts as success, which is what lets the reconcile loop, the
//! HTTP trigger, and other replicas race each other on the same descriptor
//! and still converge on exactly one deployment/service pair. Drift in
//! objects that already exist is not repaired here.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use thiserror::Error;
use tracing::{debug, info};

use crate::cluster::{ClusterError, ObjectClient};
use crate::error::ControllerError;
use crds::CloudBaseMain;

/// Namespace the built-in template provisions into.
pub const DEFAULT_NAMESPACE: &str = "cloudbase-operator-system";
/// Default worker deployment name.
pub const DEFAULT_NAME: &str = "worker-depl";
/// Default exposing service name.
pub const DEFAULT_SERVICE_NAME: &str = "worker-srv";
/// Default worker image.
pub const DEFAULT_IMAGE: &str = "heroku/nodejs-hello-world";
/// Default container and service port.
pub const DEFAULT_PORT: i32 = 5000;
/// Node port the built-in template pins.
pub const DEFAULT_NODE_PORT: i32 = 31534;

/// Fully-formed description of one worker workload pair.
///
/// Never persisted; derived fresh from a CloudBaseMain spec (or the
/// built-in template) on every use, and derivation is pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadDescriptor {
    /// Deployment name
    pub name: String,
    /// Namespace both objects land in
    pub namespace: String,
    /// Container image
    pub image: String,
    /// Port the container listens on
    pub container_port: i32,
    /// Worker replica count
    pub replicas: i32,
    /// Exposing service name
    pub service_name: String,
    /// Service port (maps to `container_port`)
    pub service_port: i32,
    /// Fixed node port, allocated by the cluster when unset
    pub node_port: Option<i32>,
}

impl WorkloadDescriptor {
    /// The built-in template, used by the trigger endpoint and as the
    /// default for unset spec fields.
    #[must_use]
    pub fn template() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            image: DEFAULT_IMAGE.to_string(),
            container_port: DEFAULT_PORT,
            replicas: 1,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_port: DEFAULT_PORT,
            node_port: Some(DEFAULT_NODE_PORT),
        }
    }

    /// Derive the descriptor for a CloudBaseMain.
    ///
    /// Spec fields override the template; the objects land in the
    /// resource's own namespace. A spec that cannot describe a runnable
    /// workload is a terminal classification error, not a retryable one.
    pub fn for_workload(workload: &CloudBaseMain) -> Result<Self, ControllerError> {
        let namespace = workload.metadata.namespace.as_deref().unwrap_or("default");
        let spec = &workload.spec;
        let port = spec.port.unwrap_or(DEFAULT_PORT);
        let descriptor = Self {
            name: spec.name.clone().unwrap_or_else(|| DEFAULT_NAME.to_string()),
            namespace: namespace.to_string(),
            image: spec
                .image
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE.to_string()),
            container_port: port,
            replicas: spec.replicas.unwrap_or(1),
            service_name: spec
                .service_name
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            service_port: port,
            node_port: spec.node_port,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.name.is_empty() {
            return Err(ControllerError::InvalidWorkload(
                "deployment name must not be empty".to_string(),
            ));
        }
        if self.service_name.is_empty() {
            return Err(ControllerError::InvalidWorkload(
                "service name must not be empty".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(ControllerError::InvalidWorkload(
                "namespace must not be empty".to_string(),
            ));
        }
        if self.image.is_empty() {
            return Err(ControllerError::InvalidWorkload(
                "image must not be empty".to_string(),
            ));
        }
        if !(1..=65535).contains(&self.container_port) {
            return Err(ControllerError::InvalidWorkload(format!(
                "port {} out of range",
                self.container_port
            )));
        }
        if let Some(node_port) = self.node_port {
            // default kube-apiserver service-node-port-range
            if !(30000..=32767).contains(&node_port) {
                return Err(ControllerError::InvalidWorkload(format!(
                    "node port {node_port} outside 30000-32767"
                )));
            }
        }
        if self.replicas < 0 {
            return Err(ControllerError::InvalidWorkload(format!(
                "negative replica count {}",
                self.replicas
            )));
        }
        Ok(())
    }

    /// Selector labels shared by the deployment, its pods, and the service.
    #[must_use]
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("app".to_string(), self.name.clone())])
    }

    /// Build the deployment object for this descriptor.
    #[must_use]
    pub fn to_deployment(&self) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(self.replicas),
                selector: LabelSelector {
                    match_labels: Some(self.labels()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![Container {
                            name: self.name.clone(),
                            image: Some(self.image.clone()),
                            ports: Some(vec![ContainerPort {
                                name: Some("worker".to_string()),
                                container_port: self.container_port,
                                ..Default::default()
                            }]),
                            ..Default::default()
                        }],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Build the NodePort service object for this descriptor.
    #[must_use]
    pub fn to_service(&self) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(self.service_name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                selector: Some(self.labels()),
                type_: Some("NodePort".to_string()),
                ports: Some(vec![ServicePort {
                    port: self.service_port,
                    target_port: Some(IntOrString::Int(self.container_port)),
                    node_port: self.node_port,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// How one object ended up existing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOutcome {
    /// This call created the object
    Created,
    /// The object was already there; treated as success
    AlreadyExisted,
}

/// Result of ensuring the deployment/service pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisionOutcome {
    /// Outcome for the deployment
    pub deployment: ObjectOutcome,
    /// Outcome for the service
    pub service: ObjectOutcome,
}

impl ProvisionOutcome {
    /// True when both halves already existed and nothing was written.
    #[must_use]
    pub fn already_existed(&self) -> bool {
        self.deployment == ObjectOutcome::AlreadyExisted
            && self.service == ObjectOutcome::AlreadyExisted
    }
}

/// A provisioning attempt that failed partway.
///
/// Retryable: the creates are independent, so re-running with the same
/// descriptor completes the missing half without duplicating the other.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Deployment create failed; nothing was ensured
    #[error("deployment {name}: {source}")]
    Deployment {
        /// Deployment name
        name: String,
        /// Underlying cluster failure
        #[source]
        source: ClusterError,
    },

    /// Service create failed after the deployment half was ensured
    #[error("service {name} (deployment {deployment:?}): {source}")]
    Service {
        /// Service name
        name: String,
        /// How the deployment half ended up before the failure
        deployment: ObjectOutcome,
        /// Underlying cluster failure
        #[source]
        source: ClusterError,
    },
}

/// Idempotently ensures a descriptor's deployment and service exist.
///
/// Owns no state beyond the shared cluster client; safe to clone into the
/// reconcile loop and the trigger path.
pub struct Provisioner<C> {
    cluster: Arc<C>,
}

impl<C> Clone for Provisioner<C> {
    fn clone(&self) -> Self {
        Self {
            cluster: Arc::clone(&self.cluster),
        }
    }
}

impl<C> Provisioner<C>
where
    C: ObjectClient<Deployment> + ObjectClient<Service>,
{
    /// Create a provisioner over a shared cluster client.
    pub fn new(cluster: Arc<C>) -> Self {
        Self { cluster }
    }

    /// Ensure the descriptor's deployment and service exist.
    ///
    /// Expects a validated descriptor. No status writes happen here; the
    /// reconciler owns status.
    pub async fn provision(
        &self,
        descriptor: &WorkloadDescriptor,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let deployment = match ensure(self.cluster.as_ref(), &descriptor.to_deployment()).await {
            Ok(outcome) => {
                log_outcome("deployment", &descriptor.namespace, &descriptor.name, outcome);
                outcome
            }
            Err(source) => {
                return Err(ProvisionError::Deployment {
                    name: descriptor.name.clone(),
                    source,
                });
            }
        };

        let service = match ensure(self.cluster.as_ref(), &descriptor.to_service()).await {
            Ok(outcome) => {
                log_outcome(
                    "service",
                    &descriptor.namespace,
                    &descriptor.service_name,
                    outcome,
                );
                outcome
            }
            Err(source) => {
                return Err(ProvisionError::Service {
                    name: descriptor.service_name.clone(),
                    deployment,
                    source,
                });
            }
        };

        Ok(ProvisionOutcome {
            deployment,
            service,
        })
    }
}

/// Idempotent create: an object that already exists is success.
async fn ensure<C, K>(cluster: &C, object: &K) -> Result<ObjectOutcome, ClusterError>
where
    C: ObjectClient<K>,
    K: Send + Sync + 'static,
{
    match cluster.create(object).await {
        Ok(_) => Ok(ObjectOutcome::Created),
        Err(ClusterError::AlreadyExists(_)) => Ok(ObjectOutcome::AlreadyExisted),
        Err(e) => Err(e),
    }
}

fn log_outcome(kind: &str, namespace: &str, name: &str, outcome: ObjectOutcome) {
    match outcome {
        ObjectOutcome::Created => info!("Created {} {}/{}", kind, namespace, name),
        ObjectOutcome::AlreadyExisted => {
            debug!("{} {}/{} already exists", kind, namespace, name);
        }
    }
}
