//! CloudBase Operator CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the CloudBase operator.

pub mod cloud_base_main;

pub use cloud_base_main::*;
