//! OpenStackMachine reconciler

use super::{add_finalizer, has_finalizer, object_key, remove_finalizer, settle, write_status, Reconciler};
use crate::error::ControllerError;
use crate::services::compute::instance::{delete_instance, reconcile_instance};
use crate::services::{ClusterContext, MachineContext, ReconcileOutcome};
use crds::{OpenStackCluster, OpenStackMachine, OpenStackMachineSpec, OpenStackMachineStatus};
use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use openstack_client::{OpenStackClientTrait, OpenStackError};
use std::sync::Arc;
use tracing::{debug, info};

pub const KIND: &str = "OpenStackMachine";

/// One engine pass for a machine
///
/// The create path needs a ready cluster. Deletion runs with whatever the
/// cluster still publishes, or with nothing once the cluster is gone.
pub(crate) async fn machine_pass(
    client: &dyn OpenStackClientTrait,
    name: &str,
    namespace: &str,
    spec: &OpenStackMachineSpec,
    cluster: Option<&OpenStackCluster>,
    status: &mut OpenStackMachineStatus,
    deleting: bool,
) -> Result<ReconcileOutcome, ControllerError> {
    let cluster_ctx = match cluster {
        Some(cluster) => ClusterContext::from(cluster),
        None if deleting => ClusterContext {
            name: spec.cluster_name.clone(),
            namespace: namespace.to_string(),
            ..Default::default()
        },
        None => {
            return Err(ControllerError::DependencyNotReady(format!(
                "OpenStackCluster {}/{} not found",
                namespace, spec.cluster_name
            )));
        }
    };
    let ctx = MachineContext {
        name,
        namespace,
        spec,
        cluster: &cluster_ctx,
    };

    if deleting {
        return delete_instance(client, &ctx, status).await;
    }
    let cluster_ready = cluster.and_then(|c| c.status.as_ref()).is_some_and(|s| s.ready);
    if !cluster_ready {
        return Err(ControllerError::DependencyNotReady(format!(
            "OpenStackCluster {}/{} is not ready",
            namespace, spec.cluster_name
        )));
    }
    reconcile_instance(client, &ctx, status).await
}

impl Reconciler {
    pub async fn reconcile_openstack_machine(&self, machine: Arc<OpenStackMachine>) -> Result<Action, ControllerError> {
        let name = machine.name_any();
        let namespace = machine
            .namespace()
            .ok_or_else(|| ControllerError::InvalidConfig(format!("OpenStackMachine {} has no namespace", name)))?;
        let key = object_key(KIND, &namespace, &name);
        let api: Api<OpenStackMachine> = Api::namespaced(self.kube_client.clone(), &namespace);
        let deleting = machine.metadata.deletion_timestamp.is_some();

        if deleting && !has_finalizer(&machine.metadata) {
            return Ok(Action::await_change());
        }
        if !deleting {
            add_finalizer(&api, &name, &machine.metadata).await?;
        }

        let before = machine.status.clone().unwrap_or_default();
        if !deleting && before.failure_reason.is_some() {
            debug!("OpenStackMachine {}/{} has failed, not advancing", namespace, name);
            return Ok(Action::await_change());
        }
        info!("Reconciling OpenStackMachine {}/{}", namespace, name);

        let clusters: Api<OpenStackCluster> = Api::namespaced(self.kube_client.clone(), &namespace);
        let cluster = clusters.get_opt(&machine.spec.cluster_name).await?;
        let client = self.scopes.client_for(&machine.spec.identity_ref, &namespace).await?;

        let mut status = before.clone();
        let result = machine_pass(
            client.as_ref(),
            &name,
            &namespace,
            &machine.spec,
            cluster.as_ref(),
            &mut status,
            deleting,
        )
        .await;
        if let Err(ControllerError::OpenStack(OpenStackError::Authentication(_))) = &result {
            self.scopes.invalidate(&machine.spec.identity_ref, &namespace).await;
        }
        let finished = deleting && matches!(result, Ok(ReconcileOutcome::Ready));
        let action = settle(&mut status, result, deleting);
        write_status(&api, &name, &before, &mut status).await?;
        let action = action?;
        self.succeeded(&key);

        if finished {
            remove_finalizer(&api, &name, &machine.metadata).await?;
            info!("OpenStackMachine {}/{} deleted", namespace, name);
            return Ok(Action::await_change());
        }
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::{InstanceState, OpenStackClusterStatus};

    fn ready_cluster(cloud: &TestCloud) -> OpenStackCluster {
        let mut cluster = create_test_cluster("c1", "default", "k8s-net");
        let ctx = cluster_context(cloud);
        cluster.status = Some(OpenStackClusterStatus {
            ready: true,
            network: ctx.network,
            ..Default::default()
        });
        cluster
    }

    #[tokio::test]
    async fn test_waits_for_cluster() {
        let cloud = seed_cloud();
        let spec = machine_spec();
        let mut status = OpenStackMachineStatus::default();

        let missing = machine_pass(&cloud.mock, "m1", "default", &spec, None, &mut status, false).await;
        assert!(matches!(missing, Err(ControllerError::DependencyNotReady(_))));

        let mut cluster = ready_cluster(&cloud);
        cluster.status.as_mut().unwrap().ready = false;
        let not_ready = machine_pass(&cloud.mock, "m1", "default", &spec, Some(&cluster), &mut status, false).await;
        assert!(matches!(not_ready, Err(ControllerError::DependencyNotReady(_))));
        assert!(cloud.mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_create_then_delete_without_cluster() {
        let cloud = seed_cloud();
        let spec = machine_spec();
        let cluster = ready_cluster(&cloud);
        let mut status = OpenStackMachineStatus::default();

        for _ in 0..10 {
            if machine_pass(&cloud.mock, "m1", "default", &spec, Some(&cluster), &mut status, false)
                .await
                .unwrap()
                .is_ready()
            {
                break;
            }
            cloud.mock.advance().unwrap();
        }
        assert!(status.ready);
        assert_eq!(status.instance_state, InstanceState::Active);

        // The cluster object is gone before the machine
        for _ in 0..10 {
            if machine_pass(&cloud.mock, "m1", "default", &spec, None, &mut status, true)
                .await
                .unwrap()
                .is_ready()
            {
                break;
            }
            cloud.mock.advance().unwrap();
        }
        assert!(cloud.mock.servers().is_empty());
        assert!(cloud.mock.ports().is_empty());
        assert!(!status.ready);
    }
}
