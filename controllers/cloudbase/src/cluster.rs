//! Typed cluster access.
//!
//! `ObjectClient<K>` is the capability surface everything in this process
//! writes through: get/list/create/update_status, parameterized over the
//! object kind. `KubeCluster` implements it for every kind the operator
//! touches (CloudBaseMain, Deployment, Service); tests substitute an
//! in-memory cluster. Watches are read-only and flow through
//! `kube_runtime::watcher` separately.
//!
//! There is no ambient type registry: the typed client value is built once
//! at startup and passed by reference to whoever needs it.

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Cluster API errors, classified for the reconcile loop.
///
/// `AlreadyExists`, `NotFound` and `Conflict` carry the recovery semantics
/// the reconciler and provisioner depend on; everything else is `Api` and
/// treated as transient.
#[derive(Debug, Error)]
pub enum ClusterError {
    /// Create target already exists (normalized to success by the provisioner)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Read target does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency write lost the race
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Any other API failure (transient, retried with backoff)
    #[error("API error: {0}")]
    Api(#[source] kube::Error),
}

impl From<kube::Error> for ClusterError {
    /// Classify a kube error by HTTP status code and reason.
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref resp) if resp.code == 404 => Self::NotFound(resp.message.clone()),
            kube::Error::Api(ref resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Self::AlreadyExists(resp.message.clone())
            }
            kube::Error::Api(ref resp) if resp.code == 409 => Self::Conflict(resp.message.clone()),
            other => Self::Api(other),
        }
    }
}

/// Capability surface over one object kind.
///
/// All async methods must be `Send` to work with Tokio's work-stealing
/// runtime.
#[async_trait]
pub trait ObjectClient<K: Send + Sync + 'static>: Send + Sync {
    /// Fetch one object; `Ok(None)` when it does not exist.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ClusterError>;

    /// List objects in a namespace; an empty namespace lists all namespaces.
    async fn list(&self, namespace: &str) -> Result<Vec<K>, ClusterError>;

    /// Create an object. An existing object surfaces as
    /// `ClusterError::AlreadyExists`; normalizing that to success is the
    /// caller's decision, not the client's.
    async fn create(&self, object: &K) -> Result<K, ClusterError>;

    /// Replace the status subresource. The object's resourceVersion rides
    /// along, so a write against a stale read fails with
    /// `ClusterError::Conflict`.
    async fn update_status(&self, object: &K) -> Result<K, ClusterError>;
}

/// Kubernetes-backed client for every kind the operator reads or writes.
///
/// Cheap to share: the inner `kube::Client` is a cloneable handle over one
/// connection pool, so workers and the trigger path hold the same value
/// with no extra locking.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    /// Wrap an established client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<K> ObjectClient<K> for KubeCluster
where
    K: Resource<Scope = NamespaceResourceScope>
        + Clone
        + Serialize
        + DeserializeOwned
        + std::fmt::Debug
        + Send
        + Sync
        + 'static,
    <K as Resource>::DynamicType: Default,
{
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<K>, ClusterError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await.map_err(ClusterError::from)
    }

    async fn list(&self, namespace: &str) -> Result<Vec<K>, ClusterError> {
        let api: Api<K> = if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        };
        let objects = api
            .list(&ListParams::default())
            .await
            .map_err(ClusterError::from)?;
        Ok(objects.items)
    }

    async fn create(&self, object: &K) -> Result<K, ClusterError> {
        let namespace = object
            .meta()
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        api.create(&PostParams::default(), object)
            .await
            .map_err(ClusterError::from)
    }

    async fn update_status(&self, object: &K) -> Result<K, ClusterError> {
        let meta = object.meta();
        let namespace = meta
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let name = meta
            .name
            .clone()
            .ok_or_else(|| ClusterError::NotFound("object has no name".to_string()))?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &namespace);
        let data = serde_json::to_vec(object)
            .map_err(kube::Error::SerdeError)
            .map_err(ClusterError::from)?;
        api.replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(ClusterError::from)
    }
}
