//! Boot volumes
//!
//! When a machine boots from volume, the volume `<instance>-root` is
//! created from the resolved image before the server. Its ID goes into
//! status as soon as OpenStack returns it; readiness is polled on later
//! reconciles. Once the server exists the volume belongs to it (deleted on
//! termination) and is never touched again.

use crate::error::ControllerError;
use crate::services::{at_most_one, MachineContext, ReconcileOutcome, VOLUME_POLL_INTERVAL};
use crds::{OpenStackMachineStatus, RootVolume, RootVolumeStatus};
use openstack_client::{CreateVolumeOpts, OpenStackClientTrait, Volume, VolumeFilter};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Volume metadata key naming the owning machine
pub const OWNER_METADATA_KEY: &str = "stackops.microscaler.io/machine";

pub fn root_volume_name(instance: &str) -> String {
    format!("{instance}-root")
}

/// Root volume the machine asks for, if booting from volume
pub fn requested_root_volume<'a>(ctx: &MachineContext<'a>) -> Option<&'a RootVolume> {
    ctx.spec.root_volume.as_ref().filter(|rv| rv.size_gib > 0)
}

/// Drive the root volume to `available`
pub async fn reconcile_root_volume(
    client: &dyn OpenStackClientTrait,
    ctx: &MachineContext<'_>,
    image_id: &str,
    status: &mut OpenStackMachineStatus,
) -> Result<ReconcileOutcome, ControllerError> {
    let Some(root_volume) = requested_root_volume(ctx) else {
        return Ok(ReconcileOutcome::Ready);
    };
    if status.instance_id.is_some() {
        return Ok(ReconcileOutcome::Ready);
    }

    let name = root_volume_name(ctx.name);
    let volume = match status.resources.root_volume.as_ref() {
        Some(recorded) if recorded.ready => return Ok(ReconcileOutcome::Ready),
        Some(recorded) => match client.get_volume(&recorded.id).await {
            Ok(volume) => volume,
            Err(e) if e.is_not_found() => {
                return Err(ControllerError::ResourceFailed(format!(
                    "root volume {} disappeared while being created",
                    recorded.id
                )));
            }
            Err(e) => return Err(e.into()),
        },
        None => match find_root_volume(client, &name, root_volume.size_gib).await? {
            Some(volume) => {
                info!("Adopting root volume {} ({})", volume.name, volume.id);
                status.resources.root_volume = Some(RootVolumeStatus {
                    id: volume.id.clone(),
                    ready: false,
                });
                volume
            }
            None => {
                let volume = create_root_volume(client, ctx, root_volume, &name, image_id).await?;
                status.resources.root_volume = Some(RootVolumeStatus {
                    id: volume.id,
                    ready: false,
                });
                return Ok(ReconcileOutcome::Requeue(VOLUME_POLL_INTERVAL));
            }
        },
    };

    // Attached means a server was already created from it
    if volume.is_available() || !volume.attachments.is_empty() {
        if let Some(recorded) = status.resources.root_volume.as_mut() {
            recorded.ready = true;
        }
        debug!("Root volume {} is {}", volume.id, volume.status);
        Ok(ReconcileOutcome::Ready)
    } else if volume.is_error() {
        Err(ControllerError::ResourceFailed(format!(
            "root volume {} is in error state",
            volume.id
        )))
    } else {
        debug!("Root volume {} is {}", volume.id, volume.status);
        Ok(ReconcileOutcome::Requeue(VOLUME_POLL_INTERVAL))
    }
}

/// Unattached volume of the right name and size left by an earlier attempt
async fn find_root_volume(
    client: &dyn OpenStackClientTrait,
    name: &str,
    size_gib: u32,
) -> Result<Option<Volume>, ControllerError> {
    let volumes = client
        .list_volumes(&VolumeFilter {
            name: Some(name.to_string()),
        })
        .await?;
    let mut candidates = Vec::new();
    for volume in volumes.into_iter().filter(|v| v.name == name) {
        if volume.size != size_gib {
            warn!("Ignoring volume {} ({}): size {} GiB, want {}", volume.name, volume.id, volume.size, size_gib);
        } else if !volume.attachments.is_empty() {
            warn!("Ignoring volume {} ({}): attached", volume.name, volume.id);
        } else {
            candidates.push(volume);
        }
    }
    at_most_one(candidates, "volume", name)
}

async fn create_root_volume(
    client: &dyn OpenStackClientTrait,
    ctx: &MachineContext<'_>,
    root_volume: &RootVolume,
    name: &str,
    image_id: &str,
) -> Result<Volume, ControllerError> {
    let mut metadata = HashMap::new();
    metadata.insert(OWNER_METADATA_KEY.to_string(), ctx.owner_reference());
    let opts = CreateVolumeOpts {
        name: name.to_string(),
        size: root_volume.size_gib,
        description: Some(format!("Root volume for {}", ctx.owner_reference())),
        volume_type: root_volume.volume_type.clone(),
        availability_zone: root_volume
            .availability_zone
            .clone()
            .or_else(|| ctx.spec.availability_zone.clone()),
        image_ref: Some(image_id.to_string()),
        metadata,
    };
    let volume = client.create_volume(&opts).await?;
    info!("Created root volume {} ({}) for {}", volume.name, volume.id, ctx.owner_reference());
    Ok(volume)
}

/// Delete a root volume that never got attached to a server
///
/// Called only when no server was ever created for the machine; otherwise
/// the server deletes it on termination.
pub async fn delete_root_volume(
    client: &dyn OpenStackClientTrait,
    ctx: &MachineContext<'_>,
    status: &mut OpenStackMachineStatus,
) -> Result<(), ControllerError> {
    let Some(root_volume) = requested_root_volume(ctx) else {
        return Ok(());
    };
    let volume_id = match status.resources.root_volume.as_ref() {
        Some(recorded) => Some(recorded.id.clone()),
        None => find_root_volume(client, &root_volume_name(ctx.name), root_volume.size_gib)
            .await?
            .map(|v| v.id),
    };
    if let Some(id) = volume_id {
        match client.delete_volume(&id).await {
            Ok(()) => info!("Deleted root volume {}", id),
            Err(e) if e.is_not_found() => debug!("Root volume {} already gone", id),
            Err(e) => return Err(e.into()),
        }
    }
    status.resources.root_volume = None;
    Ok(())
}
