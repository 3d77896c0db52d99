//! OpenStackServerGroup reconciler

use super::{add_finalizer, has_finalizer, object_key, remove_finalizer, settle, write_status, Reconciler};
use crate::error::ControllerError;
use crate::services::compute::server_group::{delete_server_group, ensure_server_group};
use crate::services::ReconcileOutcome;
use crds::{OpenStackServerGroup, OpenStackServerGroupSpec, OpenStackServerGroupStatus};
use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use openstack_client::{OpenStackClientTrait, OpenStackError};
use std::sync::Arc;
use tracing::info;

pub const KIND: &str = "OpenStackServerGroup";

/// One engine pass for a server group named `name`
pub(crate) async fn server_group_pass(
    client: &dyn OpenStackClientTrait,
    name: &str,
    spec: &OpenStackServerGroupSpec,
    status: &mut OpenStackServerGroupStatus,
    deleting: bool,
) -> Result<ReconcileOutcome, ControllerError> {
    if deleting {
        status.ready = false;
        delete_server_group(client, status.id.as_deref(), name).await?;
        status.id = None;
        return Ok(ReconcileOutcome::Ready);
    }
    let group = ensure_server_group(client, name, spec.policy).await?;
    status.id = Some(group.id);
    status.ready = true;
    Ok(ReconcileOutcome::Ready)
}

impl Reconciler {
    pub async fn reconcile_openstack_server_group(
        &self,
        group: Arc<OpenStackServerGroup>,
    ) -> Result<Action, ControllerError> {
        let name = group.name_any();
        let namespace = group
            .namespace()
            .ok_or_else(|| ControllerError::InvalidConfig(format!("OpenStackServerGroup {} has no namespace", name)))?;
        let key = object_key(KIND, &namespace, &name);
        let api: Api<OpenStackServerGroup> = Api::namespaced(self.kube_client.clone(), &namespace);
        let deleting = group.metadata.deletion_timestamp.is_some();

        if deleting && !has_finalizer(&group.metadata) {
            return Ok(Action::await_change());
        }
        if !deleting {
            add_finalizer(&api, &name, &group.metadata).await?;
        }

        let before = group.status.clone().unwrap_or_default();
        if !deleting && before.failure_reason.is_some() {
            return Ok(Action::await_change());
        }

        let client = self.scopes.client_for(&group.spec.identity_ref, &namespace).await?;
        let mut status = before.clone();
        let result = server_group_pass(client.as_ref(), &name, &group.spec, &mut status, deleting).await;
        if let Err(ControllerError::OpenStack(OpenStackError::Authentication(_))) = &result {
            self.scopes.invalidate(&group.spec.identity_ref, &namespace).await;
        }
        let finished = deleting && result.is_ok();
        let action = settle(&mut status, result, deleting);
        write_status(&api, &name, &before, &mut status).await?;
        let action = action?;
        self.succeeded(&key);

        if finished {
            remove_finalizer(&api, &name, &group.metadata).await?;
            info!("OpenStackServerGroup {}/{} deleted", namespace, name);
            return Ok(Action::await_change());
        }
        Ok(action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{IdentityRef, ServerGroupPolicy};
    use openstack_client::{MockOpenStackClient, Operation};

    fn spec() -> OpenStackServerGroupSpec {
        OpenStackServerGroupSpec {
            identity_ref: IdentityRef {
                name: "cloud-config".to_string(),
                cloud_name: "openstack".to_string(),
            },
            policy: ServerGroupPolicy::AntiAffinity,
        }
    }

    #[tokio::test]
    async fn test_adopt_then_delete() {
        let mock = MockOpenStackClient::new();
        let existing = mock.add_server_group("etcd", "anti-affinity");
        let mut status = OpenStackServerGroupStatus::default();

        server_group_pass(&mock, "etcd", &spec(), &mut status, false).await.unwrap();
        assert!(status.ready);
        assert_eq!(status.id.as_deref(), Some(existing.id.as_str()));
        assert_eq!(mock.count(Operation::CreateServerGroup), 0);

        server_group_pass(&mock, "etcd", &spec(), &mut status, true).await.unwrap();
        assert!(mock.server_groups().is_empty());
        assert_eq!(status, OpenStackServerGroupStatus::default());

        // Already gone
        server_group_pass(&mock, "etcd", &spec(), &mut status, true).await.unwrap();
    }
}
