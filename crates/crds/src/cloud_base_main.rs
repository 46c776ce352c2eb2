//! CloudBaseMain CRD
//!
//! Declares a hosted worker workload: one deployment and the NodePort
//! service exposing it. Spec fields are optional overrides on top of the
//! operator's built-in workload template.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cloudbase.example.com",
    version = "v1alpha1",
    kind = "CloudBaseMain",
    namespaced,
    status = "CloudBaseMainStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CloudBaseMainSpec {
    /// Container image for the worker deployment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Port the worker container listens on (also the service port)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i32>,

    /// Worker deployment name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Exposing service name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Fixed node port for the service (allocated by the cluster if unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<i32>,

    /// Worker replica count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct CloudBaseMainStatus {
    /// Workload convergence state
    pub state: WorkloadState,

    /// Generation of the spec this status reflects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Last reconciliation timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,

    /// Error message if provisioning failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Workload convergence state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum WorkloadState {
    /// Workload objects not yet ensured
    #[default]
    Pending,

    /// Deployment and service exist for the declared spec
    Provisioned,

    /// Spec could not be turned into a workload (terminal until edited)
    Failed,
}
