//! Server groups

use crate::error::ControllerError;
use crate::services::at_most_one;
use crds::ServerGroupPolicy;
use openstack_client::{CreateServerGroupOpts, OpenStackClientTrait, ServerGroup};
use tracing::{info, warn};

async fn find_server_group(client: &dyn OpenStackClientTrait, name: &str) -> Result<Option<ServerGroup>, ControllerError> {
    let groups = client
        .list_server_groups()
        .await?
        .into_iter()
        .filter(|g| g.name == name)
        .collect();
    at_most_one(groups, "server group", name)
}

/// Find the server group by name or create it with `policy`
pub async fn ensure_server_group(
    client: &dyn OpenStackClientTrait,
    name: &str,
    policy: ServerGroupPolicy,
) -> Result<ServerGroup, ControllerError> {
    if let Some(group) = find_server_group(client, name).await? {
        if group.policy != policy.as_str() {
            // Nova cannot change the policy of an existing group
            warn!(
                "Server group {} ({}) has policy {}, spec asks for {}",
                group.name,
                group.id,
                group.policy,
                policy.as_str()
            );
        }
        return Ok(group);
    }
    let group = client
        .create_server_group(&CreateServerGroupOpts {
            name: name.to_string(),
            policy: policy.as_str().to_string(),
        })
        .await?;
    info!("Created server group {} ({}) with policy {}", group.name, group.id, group.policy);
    Ok(group)
}

/// Delete the server group by ID, or by name when the ID was never recorded
pub async fn delete_server_group(
    client: &dyn OpenStackClientTrait,
    id: Option<&str>,
    name: &str,
) -> Result<(), ControllerError> {
    let id = match id {
        Some(id) => id.to_string(),
        None => match find_server_group(client, name).await? {
            Some(group) => group.id,
            None => return Ok(()),
        },
    };
    match client.delete_server_group(&id).await {
        Ok(()) => {
            info!("Deleted server group {} ({})", name, id);
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openstack_client::{MockOpenStackClient, Operation};

    #[tokio::test]
    async fn test_adopts_existing_group() {
        let mock = MockOpenStackClient::new();
        let existing = mock.add_server_group("etcd", "anti-affinity");
        let group = ensure_server_group(&mock, "etcd", ServerGroupPolicy::AntiAffinity)
            .await
            .unwrap();
        assert_eq!(group.id, existing.id);
        assert_eq!(mock.count(Operation::CreateServerGroup), 0);
    }

    #[tokio::test]
    async fn test_create_and_delete() {
        let mock = MockOpenStackClient::new();
        let group = ensure_server_group(&mock, "etcd", ServerGroupPolicy::SoftAntiAffinity)
            .await
            .unwrap();
        assert_eq!(group.policy, "soft-anti-affinity");

        delete_server_group(&mock, None, "etcd").await.unwrap();
        assert!(mock.server_groups().is_empty());
        delete_server_group(&mock, Some(&group.id), "etcd").await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_names_are_ambiguous() {
        let mock = MockOpenStackClient::new();
        mock.add_server_group("etcd", "affinity");
        mock.add_server_group("etcd", "affinity");
        let result = ensure_server_group(&mock, "etcd", ServerGroupPolicy::Affinity).await;
        assert!(matches!(result, Err(ControllerError::AmbiguousResource(_))));
    }
}
