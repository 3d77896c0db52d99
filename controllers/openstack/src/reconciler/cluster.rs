//! OpenStackCluster reconciler

use super::{add_finalizer, has_finalizer, object_key, remove_finalizer, settle, write_status, Reconciler};
use crate::error::ControllerError;
use crate::services::cluster::{delete_cluster, reconcile_cluster};
use crate::services::ReconcileOutcome;
use crds::OpenStackCluster;
use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use openstack_client::OpenStackError;
use std::sync::Arc;
use tracing::{debug, info};

pub const KIND: &str = "OpenStackCluster";

impl Reconciler {
    pub async fn reconcile_openstack_cluster(&self, cluster: Arc<OpenStackCluster>) -> Result<Action, ControllerError> {
        let name = cluster.name_any();
        let namespace = cluster
            .namespace()
            .ok_or_else(|| ControllerError::InvalidConfig(format!("OpenStackCluster {} has no namespace", name)))?;
        let key = object_key(KIND, &namespace, &name);
        let api: Api<OpenStackCluster> = Api::namespaced(self.kube_client.clone(), &namespace);
        let deleting = cluster.metadata.deletion_timestamp.is_some();

        if deleting && !has_finalizer(&cluster.metadata) {
            return Ok(Action::await_change());
        }
        if !deleting {
            add_finalizer(&api, &name, &cluster.metadata).await?;
        }

        let before = cluster.status.clone().unwrap_or_default();
        if !deleting && before.failure_reason.is_some() {
            debug!("OpenStackCluster {}/{} has failed, not advancing", namespace, name);
            return Ok(Action::await_change());
        }
        info!("Reconciling OpenStackCluster {}/{}", namespace, name);

        let client = self.scopes.client_for(&cluster.spec.identity_ref, &namespace).await?;
        let mut status = before.clone();
        let result = if deleting {
            delete_cluster(client.as_ref(), &name, &namespace, &cluster.spec, &mut status).await
        } else {
            reconcile_cluster(client.as_ref(), &name, &namespace, &cluster.spec, &mut status).await
        };
        if let Err(ControllerError::OpenStack(OpenStackError::Authentication(_))) = &result {
            self.scopes.invalidate(&cluster.spec.identity_ref, &namespace).await;
        }
        let finished = deleting && matches!(result, Ok(ReconcileOutcome::Ready));
        let action = settle(&mut status, result, deleting);
        write_status(&api, &name, &before, &mut status).await?;
        let action = action?;
        self.succeeded(&key);

        if finished {
            remove_finalizer(&api, &name, &cluster.metadata).await?;
            info!("OpenStackCluster {}/{} deleted", namespace, name);
            return Ok(Action::await_change());
        }
        Ok(action)
    }
}
