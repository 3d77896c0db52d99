//! Cluster-scoped resources
//!
//! The cluster resolves its network, creates the managed security groups
//! and the API server load balancer. Machines read all of it from the
//! cluster status; nothing here is written by a machine reconcile.

use crate::error::ControllerError;
use crate::services::loadbalancer::{delete_load_balancer, reconcile_load_balancer};
use crate::services::networking::network::{reconcile_cluster_network, reconcile_external_network};
use crate::services::networking::security_group::{delete_managed_security_groups, reconcile_managed_security_groups};
use crate::services::{ClusterContext, ReconcileOutcome};
use crds::{OpenStackClusterSpec, OpenStackClusterStatus};
use openstack_client::OpenStackClientTrait;
use tracing::info;

/// Network → external network → security groups → load balancer
pub async fn reconcile_cluster(
    client: &dyn OpenStackClientTrait,
    name: &str,
    namespace: &str,
    spec: &OpenStackClusterSpec,
    status: &mut OpenStackClusterStatus,
) -> Result<ReconcileOutcome, ControllerError> {
    reconcile_cluster_network(client, &spec.network, &spec.subnets, &mut status.network).await?;
    match &spec.external_network {
        Some(param) => {
            reconcile_external_network(client, param, &mut status.external_network).await?;
        }
        None => status.external_network = None,
    }

    let ctx = ClusterContext::new(name, namespace, spec, status);
    if let Some(managed) = &spec.managed_security_groups {
        reconcile_managed_security_groups(client, &ctx, managed, spec.api_server_port, status).await?;
    }

    if let Some(lb) = spec.api_server_load_balancer.as_ref().filter(|lb| lb.enabled) {
        let outcome =
            reconcile_load_balancer(client, &ctx, lb, spec.api_server_port, &mut status.api_server_load_balancer)
                .await?;
        if let ReconcileOutcome::Requeue(after) = outcome {
            return Ok(ReconcileOutcome::Requeue(after));
        }
    }

    if !status.ready {
        info!("Cluster {}/{} is ready", namespace, name);
    }
    status.ready = true;
    Ok(ReconcileOutcome::Ready)
}

/// Load balancer → security groups; the network is only referenced
pub async fn delete_cluster(
    client: &dyn OpenStackClientTrait,
    name: &str,
    namespace: &str,
    spec: &OpenStackClusterSpec,
    status: &mut OpenStackClusterStatus,
) -> Result<ReconcileOutcome, ControllerError> {
    status.ready = false;
    let ctx = ClusterContext::new(name, namespace, spec, status);

    if ctx.load_balancer_enabled || status.api_server_load_balancer.is_some() {
        let outcome = delete_load_balancer(client, &ctx, &mut status.api_server_load_balancer).await?;
        if let ReconcileOutcome::Requeue(after) = outcome {
            return Ok(ReconcileOutcome::Requeue(after));
        }
    }

    if ctx.manages_security_groups
        || status.control_plane_security_group.is_some()
        || status.worker_security_group.is_some()
    {
        delete_managed_security_groups(client, &ctx, status).await?;
    }

    status.network = None;
    status.external_network = None;
    info!("Cluster {}/{} released all OpenStack resources", namespace, name);
    Ok(ReconcileOutcome::Ready)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::{ApiServerLoadBalancer, ManagedSecurityGroups, ResourceParam};
    use openstack_client::Operation;

    fn full_spec() -> OpenStackClusterSpec {
        let mut spec = create_test_cluster("c1", "default", "k8s-net").spec;
        spec.external_network = Some(ResourceParam::by_name("public"));
        spec.managed_security_groups = Some(ManagedSecurityGroups::default());
        spec.api_server_load_balancer = Some(ApiServerLoadBalancer {
            enabled: true,
            ..Default::default()
        });
        spec
    }

    #[tokio::test]
    async fn test_cluster_converges_then_is_stable() {
        let cloud = seed_cloud();
        cloud.mock.add_external_network("public");
        let spec = full_spec();
        let mut status = OpenStackClusterStatus::default();

        for _ in 0..20 {
            if reconcile_cluster(&cloud.mock, "c1", "default", &spec, &mut status)
                .await
                .unwrap()
                .is_ready()
            {
                break;
            }
            cloud.mock.advance().unwrap();
        }
        assert!(status.ready);
        assert_eq!(status.network.as_ref().unwrap().id, cloud.network.id);
        assert_eq!(status.network.as_ref().unwrap().subnets[0].id, cloud.subnet.id);
        assert!(status.external_network.is_some());
        assert!(status.control_plane_security_group.is_some());
        assert!(status.worker_security_group.is_some());
        assert_eq!(status.api_server_load_balancer.as_ref().unwrap().ports.len(), 1);

        cloud.mock.clear_calls();
        let before = status.clone();
        assert!(reconcile_cluster(&cloud.mock, "c1", "default", &spec, &mut status)
            .await
            .unwrap()
            .is_ready());
        assert!(cloud.mock.mutating_calls().is_empty());
        assert_eq!(status, before);
    }

    #[tokio::test]
    async fn test_missing_network_is_invalid() {
        let cloud = seed_cloud();
        let spec = create_test_cluster("c1", "default", "nope").spec;
        let mut status = OpenStackClusterStatus::default();
        let result = reconcile_cluster(&cloud.mock, "c1", "default", &spec, &mut status).await;
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_load_balancer_before_groups() {
        let cloud = seed_cloud();
        cloud.mock.add_external_network("public");
        let spec = full_spec();
        let mut status = OpenStackClusterStatus::default();
        for _ in 0..20 {
            if reconcile_cluster(&cloud.mock, "c1", "default", &spec, &mut status)
                .await
                .unwrap()
                .is_ready()
            {
                break;
            }
            cloud.mock.advance().unwrap();
        }
        cloud.mock.clear_calls();

        for _ in 0..20 {
            if delete_cluster(&cloud.mock, "c1", "default", &spec, &mut status)
                .await
                .unwrap()
                .is_ready()
            {
                break;
            }
            cloud.mock.advance().unwrap();
        }
        assert!(cloud.mock.load_balancers().is_empty());
        assert!(cloud.mock.security_groups().iter().all(|g| !g.name.starts_with("k8s-cluster-")));
        assert_eq!(status, OpenStackClusterStatus::default());

        let ops = cloud.mock.mutating_operations();
        let lb_deleted = ops.iter().position(|o| *o == Operation::DeleteLoadBalancer).unwrap();
        let group_deleted = ops.iter().position(|o| *o == Operation::DeleteSecurityGroup).unwrap();
        assert!(lb_deleted < group_deleted);
    }
}
