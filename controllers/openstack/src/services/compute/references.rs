//! Reference resolution
//!
//! Turns the image, flavor, server group and port references of a machine
//! into concrete IDs. The result is stored in status and reused by every
//! later reconcile, so a machine keeps booting the image it was first
//! resolved against even if a newer image with the same name appears.

use crate::error::ControllerError;
use crate::services::networking::port::resolve_port_specs;
use crate::services::{exactly_one, MachineContext};
use crds::{ImageParam, OpenStackMachineStatus, ResolvedMachineSpec, ServerGroupParam};
use openstack_client::{ImageFilter, OpenStackClientTrait};
use tracing::info;

/// Resolve an image reference to its ID
pub async fn resolve_image(client: &dyn OpenStackClientTrait, param: &ImageParam) -> Result<String, ControllerError> {
    if param.is_empty() {
        return Err(ControllerError::InvalidConfig("image reference is empty".to_string()));
    }
    if let Some(id) = &param.id {
        return match client.get_image(id).await {
            Ok(image) => Ok(image.id),
            Err(e) if e.is_not_found() => Err(ControllerError::InvalidConfig(format!("image {id} not found"))),
            Err(e) => Err(e.into()),
        };
    }
    let filter = param.filter.clone().unwrap_or_default();
    let label = filter.name.clone().unwrap_or_else(|| filter.tags.join(","));
    let images = client
        .list_images(&ImageFilter {
            name: filter.name.clone(),
            tags: filter.tags.clone(),
        })
        .await?;
    let images = images
        .into_iter()
        .filter(|i| filter.name.as_ref().is_none_or(|name| &i.name == name))
        .collect();
    Ok(exactly_one(images, "image", &label)?.id)
}

/// Resolve the flavor by ID or exact name
pub async fn resolve_flavor(
    client: &dyn OpenStackClientTrait,
    flavor_id: Option<&str>,
    flavor: Option<&str>,
) -> Result<String, ControllerError> {
    match (flavor_id, flavor) {
        (Some(id), _) => match client.get_flavor(id).await {
            Ok(flavor) => Ok(flavor.id),
            Err(e) if e.is_not_found() => Err(ControllerError::InvalidConfig(format!("flavor {id} not found"))),
            Err(e) => Err(e.into()),
        },
        (None, Some(name)) => {
            let flavors = client
                .list_flavors()
                .await?
                .into_iter()
                .filter(|f| f.name == name)
                .collect();
            Ok(exactly_one(flavors, "flavor", name)?.id)
        }
        (None, None) => Err(ControllerError::InvalidConfig(
            "one of flavor and flavorId is required".to_string(),
        )),
    }
}

/// Resolve a server group reference
///
/// A group referenced by name may be created by its own object later, so
/// a missing one is waited for rather than failed.
pub async fn resolve_server_group(
    client: &dyn OpenStackClientTrait,
    param: &ServerGroupParam,
) -> Result<String, ControllerError> {
    if let Some(id) = &param.id {
        return match client.get_server_group(id).await {
            Ok(group) => Ok(group.id),
            Err(e) if e.is_not_found() => {
                Err(ControllerError::InvalidConfig(format!("server group {id} not found")))
            }
            Err(e) => Err(e.into()),
        };
    }
    let name = param
        .filter
        .as_ref()
        .and_then(|f| f.name.clone())
        .ok_or_else(|| ControllerError::InvalidConfig("server group reference needs an id or a name".to_string()))?;
    let groups: Vec<_> = client
        .list_server_groups()
        .await?
        .into_iter()
        .filter(|g| g.name == name)
        .collect();
    if groups.is_empty() {
        return Err(ControllerError::DependencyNotReady(format!("server group {name} does not exist yet")));
    }
    Ok(exactly_one(groups, "server group", &name)?.id)
}

/// Resolve every reference of a machine
pub async fn resolve_machine_spec(
    client: &dyn OpenStackClientTrait,
    ctx: &MachineContext<'_>,
) -> Result<ResolvedMachineSpec, ControllerError> {
    let image_id = resolve_image(client, &ctx.spec.image).await?;
    let flavor_id = resolve_flavor(client, ctx.spec.flavor_id.as_deref(), ctx.spec.flavor.as_deref()).await?;
    let server_group_id = match &ctx.spec.server_group {
        Some(param) => Some(resolve_server_group(client, param).await?),
        None => None,
    };
    let ports = resolve_port_specs(client, ctx).await?;
    Ok(ResolvedMachineSpec {
        image_id,
        flavor_id,
        server_group_id,
        ports,
    })
}

/// Resolved references of the machine, resolving them on first use
pub async fn ensure_resolved(
    client: &dyn OpenStackClientTrait,
    ctx: &MachineContext<'_>,
    status: &mut OpenStackMachineStatus,
) -> Result<ResolvedMachineSpec, ControllerError> {
    if let Some(resolved) = &status.resolved {
        return Ok(resolved.clone());
    }
    let resolved = resolve_machine_spec(client, ctx).await?;
    info!(
        "Resolved {}: image {}, flavor {}, {} port(s)",
        ctx.owner_reference(),
        resolved.image_id,
        resolved.flavor_id,
        resolved.ports.len()
    );
    status.resolved = Some(resolved.clone());
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use crds::ResourceParam;
    use openstack_client::Operation;

    #[tokio::test]
    async fn test_image_by_name_and_tags() {
        let cloud = seed_cloud();
        cloud.mock.add_image("ubuntu-22.04", &["old"]);
        let param = ResourceParam {
            id: None,
            filter: Some(crds::ResourceFilter {
                name: Some("ubuntu-22.04".to_string()),
                tags: vec!["k8s".to_string()],
            }),
        };
        assert_eq!(resolve_image(&cloud.mock, &param).await.unwrap(), cloud.image.id);

        // Without the tag both images match
        assert!(matches!(
            resolve_image(&cloud.mock, &ResourceParam::by_name("ubuntu-22.04")).await,
            Err(ControllerError::AmbiguousResource(_))
        ));
        assert!(matches!(
            resolve_image(&cloud.mock, &ResourceParam::by_id("0000")).await,
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_flavor_requires_a_reference() {
        let cloud = seed_cloud();
        assert_eq!(
            resolve_flavor(&cloud.mock, None, Some("m1.small")).await.unwrap(),
            cloud.flavor.id
        );
        assert_eq!(
            resolve_flavor(&cloud.mock, Some(&cloud.flavor.id), Some("ignored")).await.unwrap(),
            cloud.flavor.id
        );
        assert!(matches!(
            resolve_flavor(&cloud.mock, None, None).await,
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_server_group_is_waited_for() {
        let cloud = seed_cloud();
        let param = ResourceParam::by_name("etcd-anti");
        assert!(matches!(
            resolve_server_group(&cloud.mock, &param).await,
            Err(ControllerError::DependencyNotReady(_))
        ));
        let group = cloud.mock.add_server_group("etcd-anti", "anti-affinity");
        assert_eq!(resolve_server_group(&cloud.mock, &param).await.unwrap(), group.id);
    }

    #[tokio::test]
    async fn test_resolution_is_cached_in_status() {
        let cloud = seed_cloud();
        let cluster = cluster_context(&cloud);
        let spec = machine_spec();
        let ctx = MachineContext {
            name: "m1",
            namespace: "default",
            spec: &spec,
            cluster: &cluster,
        };
        let mut status = OpenStackMachineStatus::default();
        let first = ensure_resolved(&cloud.mock, &ctx, &mut status).await.unwrap();
        assert_eq!(first.image_id, cloud.image.id);

        // A newer image with the same name does not change the machine
        cloud.mock.add_image("ubuntu-22.04", &["k8s"]);
        cloud.mock.clear_calls();
        let second = ensure_resolved(&cloud.mock, &ctx, &mut status).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cloud.mock.count(Operation::ListImages), 0);
    }
}
