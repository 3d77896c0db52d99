//! Unit tests for port resolution and deletion

#[cfg(test)]
mod tests {
    use super::super::port::*;
    use crate::error::ControllerError;
    use crate::services::MachineContext;
    use crate::test_utils::*;
    use crds::{PortStatus, ResourceParam, SecurityGroupStatus};
    use openstack_client::{Operation, OpenStackClientTrait, PortFilter};

    #[tokio::test]
    async fn test_default_port_on_cluster_network() {
        let cloud = seed_cloud();
        let cluster = cluster_context(&cloud);
        let spec = machine_spec();
        let ctx = MachineContext {
            name: "m1",
            namespace: "default",
            spec: &spec,
            cluster: &cluster,
        };

        let resolved = resolve_port_specs(&cloud.mock, &ctx).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name, "m1-0");
        assert_eq!(resolved[0].network_id, cloud.network.id);
        assert_eq!(resolved[0].security_groups, None);
        assert!(resolved[0].tags.contains(&"stackops-machine-m1".to_string()));

        let mut ports = vec![];
        reconcile_ports(&cloud.mock, &resolved, &mut ports).await.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(
            cloud.mock.mutating_operations(),
            vec![Operation::CreatePort, Operation::ReplaceTags]
        );
        let created = cloud.mock.ports()[0].clone();
        assert_eq!(created.fixed_ips[0].subnet_id, cloud.subnet.id);
        assert_eq!(created.tags, resolved[0].tags);

        cloud.mock.clear_calls();
        reconcile_ports(&cloud.mock, &resolved, &mut ports).await.unwrap();
        assert!(cloud.mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ports_resume_in_order_after_lost_status() {
        let cloud = seed_cloud();
        let storage = cloud.mock.add_network("storage");
        cloud.mock.add_subnet(&storage.id, "storage-subnet", "10.7.0.0/24");
        let cluster = cluster_context(&cloud);
        let mut spec = machine_spec();
        spec.ports = vec![port_on("k8s-net", None), port_on("storage", Some("storage"))];
        let ctx = MachineContext {
            name: "m1",
            namespace: "default",
            spec: &spec,
            cluster: &cluster,
        };
        let resolved = resolve_port_specs(&cloud.mock, &ctx).await.unwrap();
        assert_eq!(resolved[1].name, "m1-storage");

        // Port 0 is created but the status update never lands
        let mut lost = vec![];
        assert_eq!(
            reconcile_next_port(&cloud.mock, &resolved, &mut lost).await.unwrap(),
            PortProgress::Incomplete
        );
        cloud.mock.clear_calls();

        let mut ports = vec![];
        assert_eq!(
            reconcile_next_port(&cloud.mock, &resolved, &mut ports).await.unwrap(),
            PortProgress::Incomplete
        );
        assert_eq!(cloud.mock.count(Operation::CreatePort), 0);
        assert_eq!(ports[0].id, lost[0].id);
        check_port_order(&resolved, &ports).unwrap();

        assert_eq!(
            reconcile_next_port(&cloud.mock, &resolved, &mut ports).await.unwrap(),
            PortProgress::Ready
        );
        assert_eq!(cloud.mock.count(Operation::CreatePort), 1);
        assert_eq!(ports[1].network_id, storage.id);
        check_port_order(&resolved, &ports).unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_port_names_are_ambiguous() {
        let cloud = seed_cloud();
        cloud.mock.add_port("m1-0", &cloud.network.id);
        cloud.mock.add_port("m1-0", &cloud.network.id);
        let cluster = cluster_context(&cloud);
        let spec = machine_spec();
        let ctx = MachineContext {
            name: "m1",
            namespace: "default",
            spec: &spec,
            cluster: &cluster,
        };
        let resolved = resolve_port_specs(&cloud.mock, &ctx).await.unwrap();

        let mut ports = vec![];
        let result = reconcile_ports(&cloud.mock, &resolved, &mut ports).await;
        assert!(matches!(result, Err(ControllerError::AmbiguousResource(_))));
        assert!(cloud.mock.mutating_calls().is_empty());
        assert!(ports.is_empty());
    }

    #[test]
    fn test_order_check_rejects_foreign_network() {
        let resolved = vec![crds::ResolvedPortSpec {
            name: "m1-0".to_string(),
            network_id: "net-a".to_string(),
            ..Default::default()
        }];
        let wrong = vec![PortStatus {
            id: "p".to_string(),
            network_id: "net-b".to_string(),
            trunk_id: None,
        }];
        assert!(matches!(
            check_port_order(&resolved, &wrong),
            Err(ControllerError::Internal(_))
        ));
        assert!(check_port_order(&[], &wrong).is_err());
    }

    #[tokio::test]
    async fn test_security_group_selection() {
        let cloud = seed_cloud();
        let extra = cloud.mock.add_security_group("extra");
        let managed = cloud.mock.add_security_group("managed-worker");
        let mut cluster = cluster_context(&cloud);
        cluster.manages_security_groups = true;

        let mut spec = machine_spec();
        spec.security_groups = Some(vec![ResourceParam::by_name("extra")]);
        let ctx = MachineContext {
            name: "m1",
            namespace: "default",
            spec: &spec,
            cluster: &cluster,
        };
        assert!(matches!(
            resolve_port_specs(&cloud.mock, &ctx).await,
            Err(ControllerError::DependencyNotReady(_))
        ));

        cluster.worker_security_group = Some(SecurityGroupStatus {
            id: managed.id.clone(),
            name: managed.name.clone(),
            rules: vec![],
        });
        let ctx = MachineContext {
            name: "m1",
            namespace: "default",
            spec: &spec,
            cluster: &cluster,
        };
        let resolved = resolve_port_specs(&cloud.mock, &ctx).await.unwrap();
        assert_eq!(resolved[0].security_groups, Some(vec![extra.id.clone(), managed.id.clone()]));

        spec.security_groups = Some(vec![]);
        let ctx = MachineContext {
            name: "m1",
            namespace: "default",
            spec: &spec,
            cluster: &cluster,
        };
        let resolved = resolve_port_specs(&cloud.mock, &ctx).await.unwrap();
        assert_eq!(resolved[0].security_groups, Some(vec![]));

        spec.security_groups = None;
        let ctx = MachineContext {
            name: "m1",
            namespace: "default",
            spec: &spec,
            cluster: &cluster,
        };
        let resolved = resolve_port_specs(&cloud.mock, &ctx).await.unwrap();
        assert_eq!(resolved[0].security_groups, Some(vec![managed.id]));
    }

    #[tokio::test]
    async fn test_disabled_port_security_with_groups_is_invalid() {
        let cloud = seed_cloud();
        cloud.mock.add_security_group("extra");
        let cluster = cluster_context(&cloud);
        let mut spec = machine_spec();
        spec.ports = vec![crds::PortOpts {
            disable_port_security: Some(true),
            security_groups: Some(vec![ResourceParam::by_name("extra")]),
            ..Default::default()
        }];
        let ctx = MachineContext {
            name: "m1",
            namespace: "default",
            spec: &spec,
            cluster: &cluster,
        };
        assert!(matches!(
            resolve_port_specs(&cloud.mock, &ctx).await,
            Err(ControllerError::InvalidConfig(_))
        ));

        spec.ports[0].security_groups = None;
        let ctx = MachineContext {
            name: "m1",
            namespace: "default",
            spec: &spec,
            cluster: &cluster,
        };
        let resolved = resolve_port_specs(&cloud.mock, &ctx).await.unwrap();
        let mut ports = vec![];
        reconcile_ports(&cloud.mock, &resolved, &mut ports).await.unwrap();
        let port = cloud.mock.get_port(&ports[0].id).await.unwrap();
        assert_eq!(port.port_security_enabled, Some(false));
        assert!(port.security_groups.is_empty());
    }

    #[tokio::test]
    async fn test_delete_ports_reverse_order_trunk_first() {
        let cloud = seed_cloud();
        let storage = cloud.mock.add_network("storage");
        cloud.mock.add_subnet(&storage.id, "storage-subnet", "10.7.0.0/24");
        let cluster = cluster_context(&cloud);
        let mut spec = machine_spec();
        spec.trunk = true;
        spec.ports = vec![port_on("k8s-net", None), port_on("storage", None)];
        let ctx = MachineContext {
            name: "m1",
            namespace: "default",
            spec: &spec,
            cluster: &cluster,
        };
        let resolved = resolve_port_specs(&cloud.mock, &ctx).await.unwrap();
        let mut ports = vec![];
        reconcile_ports(&cloud.mock, &resolved, &mut ports).await.unwrap();
        assert!(ports.iter().all(|p| p.trunk_id.is_some()));
        let ids: Vec<String> = ports.iter().map(|p| p.id.clone()).collect();
        cloud.mock.clear_calls();

        delete_ports(&cloud.mock, &resolved, &mut ports).await.unwrap();

        let deletes: Vec<(Operation, String)> = cloud
            .mock
            .mutating_calls()
            .into_iter()
            .map(|c| (c.operation, c.target))
            .collect();
        assert_eq!(deletes.len(), 4);
        assert_eq!(deletes[0].0, Operation::DeleteTrunk);
        assert_eq!(deletes[1], (Operation::DeletePort, ids[1].clone()));
        assert_eq!(deletes[2].0, Operation::DeleteTrunk);
        assert_eq!(deletes[3], (Operation::DeletePort, ids[0].clone()));
        assert!(ports.is_empty());
        assert!(cloud.mock.ports().is_empty());
        assert!(cloud.mock.trunks().is_empty());
    }

    #[tokio::test]
    async fn test_delete_finds_untracked_port_by_name() {
        let cloud = seed_cloud();
        let cluster = cluster_context(&cloud);
        let spec = machine_spec();
        let ctx = MachineContext {
            name: "m1",
            namespace: "default",
            spec: &spec,
            cluster: &cluster,
        };
        let resolved = resolve_port_specs(&cloud.mock, &ctx).await.unwrap();
        let mut lost = vec![];
        reconcile_ports(&cloud.mock, &resolved, &mut lost).await.unwrap();

        let mut ports = vec![];
        delete_ports(&cloud.mock, &resolved, &mut ports).await.unwrap();
        let remaining = cloud
            .mock
            .list_ports(&PortFilter {
                name: Some("m1-0".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(remaining.is_empty());
    }
}
