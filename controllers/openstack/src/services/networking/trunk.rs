//! Trunks parented on machine ports
//!
//! A trunk is named like its parent port. Subports are attached by other
//! systems (e.g. a CNI), so deletion detaches whatever is there first.

use crate::error::ControllerError;
use crate::services::{at_most_one, ignore_not_found};
use openstack_client::{CreateTrunkOpts, OpenStackClientTrait, TaggedResource, Trunk, TrunkFilter};
use tracing::{debug, info};

/// Find or create the trunk parented on `port_id`
pub async fn ensure_trunk(
    client: &dyn OpenStackClientTrait,
    name: &str,
    port_id: &str,
    tags: &[String],
) -> Result<Trunk, ControllerError> {
    let existing = client
        .list_trunks(&TrunkFilter {
            name: None,
            port_id: Some(port_id.to_string()),
        })
        .await?;
    let trunk = match at_most_one(existing, "trunk", name)? {
        Some(trunk) => {
            debug!("Adopting trunk {} ({}) on port {}", trunk.name, trunk.id, port_id);
            trunk
        }
        None => {
            let trunk = client
                .create_trunk(&CreateTrunkOpts {
                    name: name.to_string(),
                    port_id: port_id.to_string(),
                    description: Some(format!("Trunk for port {name}")),
                })
                .await?;
            info!("Created trunk {} ({}) on port {}", trunk.name, trunk.id, port_id);
            trunk
        }
    };

    if !tags.iter().all(|t| trunk.tags.contains(t)) {
        let mut merged = trunk.tags.clone();
        merged.extend(tags.iter().filter(|t| !trunk.tags.contains(t)).cloned());
        client.replace_tags(TaggedResource::Trunk, &trunk.id, &merged).await?;
    }
    Ok(trunk)
}

/// Detach every subport and delete the trunk of a port
///
/// Looks the trunk up by parent port when its ID was never recorded.
pub async fn delete_trunk(
    client: &dyn OpenStackClientTrait,
    trunk_id: Option<&str>,
    port_id: &str,
) -> Result<(), ControllerError> {
    let trunk_id = match trunk_id {
        Some(id) => id.to_string(),
        None => {
            let trunks = client
                .list_trunks(&TrunkFilter {
                    name: None,
                    port_id: Some(port_id.to_string()),
                })
                .await?;
            match trunks.into_iter().next() {
                Some(trunk) => trunk.id,
                None => return Ok(()),
            }
        }
    };

    let subports = match client.list_trunk_subports(&trunk_id).await {
        Ok(subports) => subports,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if !subports.is_empty() {
        let port_ids: Vec<String> = subports.into_iter().map(|s| s.port_id).collect();
        info!("Detaching {} subport(s) from trunk {}", port_ids.len(), trunk_id);
        ignore_not_found(client.remove_subports(&trunk_id, &port_ids).await)?;
    }

    ignore_not_found(client.delete_trunk(&trunk_id).await)?;
    info!("Deleted trunk {}", trunk_id);
    Ok(())
}
