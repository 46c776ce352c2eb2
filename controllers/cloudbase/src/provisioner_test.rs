//! Unit tests for workload provisioning

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::error::ControllerError;
    use crate::provisioner::{
        DEFAULT_IMAGE, DEFAULT_NAME, DEFAULT_NAMESPACE, DEFAULT_NODE_PORT, DEFAULT_PORT,
        DEFAULT_SERVICE_NAME, ObjectOutcome, ProvisionError, Provisioner, WorkloadDescriptor,
    };
    use crate::test_utils::{MockCluster, empty_spec, workload};
    use crds::CloudBaseMainSpec;
    use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

    fn provisioner(cluster: &Arc<MockCluster>) -> Provisioner<MockCluster> {
        Provisioner::new(Arc::clone(cluster))
    }

    #[tokio::test]
    async fn test_provision_creates_both_objects() {
        let cluster = MockCluster::new();
        let outcome = provisioner(&cluster)
            .provision(&WorkloadDescriptor::template())
            .await
            .unwrap();

        assert_eq!(outcome.deployment, ObjectOutcome::Created);
        assert_eq!(outcome.service, ObjectOutcome::Created);
        assert!(
            cluster
                .deployment(DEFAULT_NAMESPACE, DEFAULT_NAME)
                .is_some()
        );
        assert!(
            cluster
                .service(DEFAULT_NAMESPACE, DEFAULT_SERVICE_NAME)
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_provision_twice_is_idempotent() {
        let cluster = MockCluster::new();
        let provisioner = provisioner(&cluster);
        let descriptor = WorkloadDescriptor::template();

        provisioner.provision(&descriptor).await.unwrap();
        let second = provisioner.provision(&descriptor).await.unwrap();

        assert!(second.already_existed(), "second call should be a no-op");
        assert_eq!(cluster.deployment_count(), 1, "exactly one deployment");
        assert_eq!(cluster.service_count(), 1, "exactly one service");
        assert_eq!(cluster.deployment_create_calls(), 2, "both attempts reach the API");
    }

    #[tokio::test]
    async fn test_partial_failure_is_retryable() {
        let cluster = MockCluster::new();
        let provisioner = provisioner(&cluster);
        let descriptor = WorkloadDescriptor::template();

        cluster.fail_next_service_creates(1);
        let err = provisioner.provision(&descriptor).await.unwrap_err();
        match err {
            ProvisionError::Service { deployment, .. } => {
                assert_eq!(deployment, ObjectOutcome::Created);
            }
            other => panic!("expected service failure, got {other:?}"),
        }
        assert_eq!(cluster.deployment_count(), 1);
        assert_eq!(cluster.service_count(), 0, "service create was forced to fail");

        // re-running completes the missing half without duplicating the other
        let outcome = provisioner.provision(&descriptor).await.unwrap();
        assert_eq!(outcome.deployment, ObjectOutcome::AlreadyExisted);
        assert_eq!(outcome.service, ObjectOutcome::Created);
        assert_eq!(cluster.deployment_count(), 1);
        assert_eq!(cluster.service_count(), 1);
    }

    #[tokio::test]
    async fn test_deployment_failure_stops_before_service() {
        let cluster = MockCluster::new();
        cluster.fail_next_deployment_creates(1);

        let err = provisioner(&cluster)
            .provision(&WorkloadDescriptor::template())
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Deployment { .. }));
        assert_eq!(cluster.deployment_count(), 0);
        assert_eq!(cluster.service_create_calls(), 0, "service create must not run");
    }

    #[test]
    fn test_descriptor_defaults_from_empty_spec() {
        let workload = workload("ops", "demo", empty_spec());
        let descriptor = WorkloadDescriptor::for_workload(&workload).unwrap();

        assert_eq!(descriptor.name, DEFAULT_NAME);
        assert_eq!(descriptor.namespace, "ops", "objects land in the resource's namespace");
        assert_eq!(descriptor.image, DEFAULT_IMAGE);
        assert_eq!(descriptor.container_port, DEFAULT_PORT);
        assert_eq!(descriptor.service_name, DEFAULT_SERVICE_NAME);
        assert_eq!(descriptor.node_port, None);
    }

    #[test]
    fn test_descriptor_spec_overrides() {
        let spec = CloudBaseMainSpec {
            image: Some("sample/image".to_string()),
            port: Some(5000),
            ..empty_spec()
        };
        let workload = workload("ops", "demo", spec);
        let descriptor = WorkloadDescriptor::for_workload(&workload).unwrap();

        assert_eq!(descriptor.image, "sample/image");
        assert_eq!(descriptor.container_port, 5000);
        assert_eq!(descriptor.service_port, 5000);
    }

    #[test]
    fn test_descriptor_derivation_is_deterministic() {
        let workload = workload("ops", "demo", empty_spec());
        let first = WorkloadDescriptor::for_workload(&workload).unwrap();
        let second = WorkloadDescriptor::for_workload(&workload).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_descriptor_rejects_out_of_range_port() {
        let spec = CloudBaseMainSpec {
            port: Some(0),
            ..empty_spec()
        };
        let workload = workload("ops", "demo", spec);
        let err = WorkloadDescriptor::for_workload(&workload).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidWorkload(_)));
    }

    #[test]
    fn test_descriptor_rejects_empty_image_override() {
        let spec = CloudBaseMainSpec {
            image: Some(String::new()),
            ..empty_spec()
        };
        let workload = workload("ops", "demo", spec);
        let err = WorkloadDescriptor::for_workload(&workload).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidWorkload(_)));
    }

    #[test]
    fn test_descriptor_rejects_node_port_outside_cluster_range() {
        let spec = CloudBaseMainSpec {
            node_port: Some(20000),
            ..empty_spec()
        };
        let workload = workload("ops", "demo", spec);
        let err = WorkloadDescriptor::for_workload(&workload).unwrap_err();
        assert!(matches!(err, ControllerError::InvalidWorkload(_)));
    }

    #[test]
    fn test_deployment_object_shape() {
        let descriptor = WorkloadDescriptor::template();
        let deployment = descriptor.to_deployment();

        assert_eq!(deployment.metadata.name.as_deref(), Some(DEFAULT_NAME));
        assert_eq!(
            deployment.metadata.namespace.as_deref(),
            Some(DEFAULT_NAMESPACE)
        );

        let spec = deployment.spec.unwrap();
        assert_eq!(
            spec.selector.match_labels.unwrap().get("app"),
            Some(&DEFAULT_NAME.to_string())
        );
        let pod_spec = spec.template.spec.unwrap();
        assert_eq!(pod_spec.containers.len(), 1);
        let container = &pod_spec.containers[0];
        assert_eq!(container.image.as_deref(), Some(DEFAULT_IMAGE));
        assert_eq!(
            container.ports.as_ref().unwrap()[0].container_port,
            DEFAULT_PORT
        );
    }

    #[test]
    fn test_service_object_shape() {
        let descriptor = WorkloadDescriptor::template();
        let service = descriptor.to_service();

        assert_eq!(
            service.metadata.name.as_deref(),
            Some(DEFAULT_SERVICE_NAME)
        );
        let spec = service.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("NodePort"));
        assert_eq!(
            spec.selector.unwrap().get("app"),
            Some(&DEFAULT_NAME.to_string())
        );
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, DEFAULT_PORT);
        assert_eq!(port.target_port, Some(IntOrString::Int(DEFAULT_PORT)));
        assert_eq!(port.node_port, Some(DEFAULT_NODE_PORT));
    }
}
