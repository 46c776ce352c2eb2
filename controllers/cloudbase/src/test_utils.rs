//! Test fixtures: an in-memory cluster with call counting and injectable
//! failures, plus CloudBaseMain builders.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::cluster::{ClusterError, ObjectClient};
use crds::{CloudBaseMain, CloudBaseMainSpec};

type Key = (String, String);

/// In-memory cluster for unit tests.
///
/// Stores objects keyed by `(namespace, name)`, counts every create and
/// status-update attempt, and can be told to fail the next N calls of a
/// given kind.
#[derive(Default)]
pub struct MockCluster {
    workloads: Mutex<HashMap<Key, CloudBaseMain>>,
    deployments: Mutex<HashMap<Key, Deployment>>,
    services: Mutex<HashMap<Key, Service>>,
    deployment_creates: Mutex<u32>,
    service_creates: Mutex<u32>,
    status_updates: Mutex<u32>,
    fail_deployment_creates: Mutex<u32>,
    fail_service_creates: Mutex<u32>,
    conflict_status_updates: Mutex<u32>,
}

impl MockCluster {
    /// Create an empty mock cluster.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed a CloudBaseMain (for test setup).
    pub fn add_workload(&self, workload: CloudBaseMain) {
        let key = meta_key(&workload.metadata);
        self.workloads.lock().unwrap().insert(key, workload);
    }

    /// Stored workload, if any.
    pub fn workload(&self, namespace: &str, name: &str) -> Option<CloudBaseMain> {
        self.workloads
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
    }

    /// Stored deployment, if any.
    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.deployments
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
    }

    /// Stored service, if any.
    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.services
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned()
    }

    /// Number of deployments held.
    pub fn deployment_count(&self) -> usize {
        self.deployments.lock().unwrap().len()
    }

    /// Number of services held.
    pub fn service_count(&self) -> usize {
        self.services.lock().unwrap().len()
    }

    /// Deployment create attempts seen (including failed ones).
    pub fn deployment_create_calls(&self) -> u32 {
        *self.deployment_creates.lock().unwrap()
    }

    /// Service create attempts seen (including failed ones).
    pub fn service_create_calls(&self) -> u32 {
        *self.service_creates.lock().unwrap()
    }

    /// Status update attempts seen (including conflicted ones).
    pub fn status_update_calls(&self) -> u32 {
        *self.status_updates.lock().unwrap()
    }

    /// Fail the next `count` deployment creates with an API error.
    pub fn fail_next_deployment_creates(&self, count: u32) {
        *self.fail_deployment_creates.lock().unwrap() = count;
    }

    /// Fail the next `count` service creates with an API error.
    pub fn fail_next_service_creates(&self, count: u32) {
        *self.fail_service_creates.lock().unwrap() = count;
    }

    /// Conflict the next `count` status updates.
    pub fn conflict_next_status_updates(&self, count: u32) {
        *self.conflict_status_updates.lock().unwrap() = count;
    }
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn meta_key(meta: &ObjectMeta) -> Key {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

/// Take one pending injected failure, if armed.
fn take_injected(counter: &Mutex<u32>) -> bool {
    let mut remaining = counter.lock().unwrap();
    if *remaining > 0 {
        *remaining -= 1;
        true
    } else {
        false
    }
}

fn injected_api_error() -> ClusterError {
    ClusterError::Api(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: "injected failure".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

#[async_trait]
impl ObjectClient<CloudBaseMain> for MockCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CloudBaseMain>, ClusterError> {
        Ok(self
            .workloads
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<CloudBaseMain>, ClusterError> {
        Ok(self
            .workloads
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| namespace.is_empty() || ns == namespace)
            .map(|(_, workload)| workload.clone())
            .collect())
    }

    async fn create(&self, object: &CloudBaseMain) -> Result<CloudBaseMain, ClusterError> {
        let mut workloads = self.workloads.lock().unwrap();
        let key = meta_key(&object.metadata);
        if workloads.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!("{}/{}", key.0, key.1)));
        }
        workloads.insert(key, object.clone());
        Ok(object.clone())
    }

    async fn update_status(&self, object: &CloudBaseMain) -> Result<CloudBaseMain, ClusterError> {
        *self.status_updates.lock().unwrap() += 1;
        if take_injected(&self.conflict_status_updates) {
            return Err(ClusterError::Conflict(
                "stale resource version".to_string(),
            ));
        }
        let mut workloads = self.workloads.lock().unwrap();
        let key = meta_key(&object.metadata);
        match workloads.get_mut(&key) {
            Some(existing) => {
                existing.status = object.status.clone();
                Ok(existing.clone())
            }
            None => Err(ClusterError::NotFound(format!("{}/{}", key.0, key.1))),
        }
    }
}

#[async_trait]
impl ObjectClient<Deployment> for MockCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Deployment>, ClusterError> {
        Ok(self
            .deployments
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<Deployment>, ClusterError> {
        Ok(self
            .deployments
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| namespace.is_empty() || ns == namespace)
            .map(|(_, deployment)| deployment.clone())
            .collect())
    }

    async fn create(&self, object: &Deployment) -> Result<Deployment, ClusterError> {
        *self.deployment_creates.lock().unwrap() += 1;
        if take_injected(&self.fail_deployment_creates) {
            return Err(injected_api_error());
        }
        let mut deployments = self.deployments.lock().unwrap();
        let key = meta_key(&object.metadata);
        if deployments.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!("{}/{}", key.0, key.1)));
        }
        deployments.insert(key, object.clone());
        Ok(object.clone())
    }

    async fn update_status(&self, object: &Deployment) -> Result<Deployment, ClusterError> {
        let mut deployments = self.deployments.lock().unwrap();
        let key = meta_key(&object.metadata);
        match deployments.get_mut(&key) {
            Some(existing) => {
                existing.status = object.status.clone();
                Ok(existing.clone())
            }
            None => Err(ClusterError::NotFound(format!("{}/{}", key.0, key.1))),
        }
    }
}

#[async_trait]
impl ObjectClient<Service> for MockCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Service>, ClusterError> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .get(&key(namespace, name))
            .cloned())
    }

    async fn list(&self, namespace: &str) -> Result<Vec<Service>, ClusterError> {
        Ok(self
            .services
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| namespace.is_empty() || ns == namespace)
            .map(|(_, service)| service.clone())
            .collect())
    }

    async fn create(&self, object: &Service) -> Result<Service, ClusterError> {
        *self.service_creates.lock().unwrap() += 1;
        if take_injected(&self.fail_service_creates) {
            return Err(injected_api_error());
        }
        let mut services = self.services.lock().unwrap();
        let key = meta_key(&object.metadata);
        if services.contains_key(&key) {
            return Err(ClusterError::AlreadyExists(format!("{}/{}", key.0, key.1)));
        }
        services.insert(key, object.clone());
        Ok(object.clone())
    }

    async fn update_status(&self, object: &Service) -> Result<Service, ClusterError> {
        let mut services = self.services.lock().unwrap();
        let key = meta_key(&object.metadata);
        match services.get_mut(&key) {
            Some(existing) => {
                existing.status = object.status.clone();
                Ok(existing.clone())
            }
            None => Err(ClusterError::NotFound(format!("{}/{}", key.0, key.1))),
        }
    }
}

/// Build a CloudBaseMain with metadata the reconciler expects.
pub fn workload(namespace: &str, name: &str, spec: CloudBaseMainSpec) -> CloudBaseMain {
    let mut workload = CloudBaseMain::new(name, spec);
    workload.metadata.namespace = Some(namespace.to_string());
    workload.metadata.generation = Some(1);
    workload.metadata.resource_version = Some("1".to_string());
    workload
}

/// Spec with every field unset (template defaults apply).
pub fn empty_spec() -> CloudBaseMainSpec {
    CloudBaseMainSpec {
        image: None,
        port: None,
        name: None,
        service_name: None,
        node_port: None,
        replicas: None,
    }
}
