//! Instance lifecycle
//!
//! Create: references → ports → root volume → server → floating IP →
//! load balancer membership. Every step records its result in the machine
//! status before the next one starts, so a reconcile that is interrupted
//! anywhere resumes from the first unfinished step.
//!
//! Delete runs the same chain backwards. A step only starts once the one
//! before it has finished, because OpenStack refuses to delete a port that
//! is still bound or a volume that is still attached.

use crate::error::ControllerError;
use crate::services::compute::references::ensure_resolved;
use crate::services::compute::root_volume::{delete_root_volume, reconcile_root_volume, requested_root_volume};
use crate::services::loadbalancer::member::{reconcile_members, remove_members};
use crate::services::networking::floating_ip::{ensure_floating_ip, release_floating_ips};
use crate::services::networking::port::{delete_ports, reconcile_ports};
use crate::services::{
    at_most_one, MachineContext, ReconcileOutcome, DEPENDENCY_POLL_INTERVAL, SERVER_DELETE_POLL_INTERVAL,
    SERVER_POLL_INTERVAL,
};
use crds::{InstanceState, MachineAddress, OpenStackMachineStatus, ResolvedMachineSpec};
use openstack_client::{
    BlockDeviceMapping, CreateServerOpts, OpenStackClientTrait, Server, ServerFilter, ServerStatus,
};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub const INTERNAL_IP: &str = "InternalIP";
pub const EXTERNAL_IP: &str = "ExternalIP";

/// Server whose name is exactly `name`
///
/// Nova matches `name` as a regular expression, so the results are
/// compared exactly.
pub async fn find_server(client: &dyn OpenStackClientTrait, name: &str) -> Result<Option<Server>, ControllerError> {
    let servers = client
        .list_servers(&ServerFilter {
            name: Some(name.to_string()),
            tags: vec![],
        })
        .await?
        .into_iter()
        .filter(|s| s.name == name)
        .collect();
    at_most_one(servers, "server", name)
}

/// Move the machine one step closer to a running, registered server
pub async fn reconcile_instance(
    client: &dyn OpenStackClientTrait,
    ctx: &MachineContext<'_>,
    status: &mut OpenStackMachineStatus,
) -> Result<ReconcileOutcome, ControllerError> {
    let resolved = ensure_resolved(client, ctx, status).await?;
    reconcile_ports(client, &resolved.ports, &mut status.resources.ports).await?;

    // A server we lost track of already owns its boot volume
    if status.instance_id.is_none() {
        if let Some(server) = find_server(client, ctx.name).await? {
            adopt_server(&server, status);
        }
    }

    if let ReconcileOutcome::Requeue(after) = reconcile_root_volume(client, ctx, &resolved.image_id, status).await? {
        return Ok(ReconcileOutcome::Requeue(after));
    }

    let server = ensure_server(client, ctx, &resolved, status).await?;
    match server.state() {
        ServerStatus::Active => status.instance_state = InstanceState::Active,
        ServerStatus::Build => {
            status.instance_state = InstanceState::Building;
            debug!("Server {} ({}) is building", server.name, server.id);
            return Ok(ReconcileOutcome::Requeue(SERVER_POLL_INTERVAL));
        }
        _ => {
            status.instance_state = InstanceState::Error;
            return Err(ControllerError::ResourceFailed(format!(
                "server {} ({}) is {}",
                server.name, server.id, server.status
            )));
        }
    }

    status.addresses = internal_addresses(&server);
    if let Some(address) = reconcile_floating_ip(client, ctx, status).await? {
        status.addresses.push(MachineAddress {
            address_type: EXTERNAL_IP.to_string(),
            address,
        });
    }

    if let ReconcileOutcome::Requeue(after) = reconcile_membership(client, ctx, &server, status).await? {
        return Ok(ReconcileOutcome::Requeue(after));
    }

    if !status.ready {
        info!("Machine {} is ready ({})", ctx.owner_reference(), server.id);
    }
    status.ready = true;
    Ok(ReconcileOutcome::Ready)
}

/// The recorded server, an adopted one, or a newly created one
async fn ensure_server(
    client: &dyn OpenStackClientTrait,
    ctx: &MachineContext<'_>,
    resolved: &ResolvedMachineSpec,
    status: &mut OpenStackMachineStatus,
) -> Result<Server, ControllerError> {
    if let Some(id) = &status.instance_id {
        return match client.get_server(id).await {
            Ok(server) => Ok(server),
            Err(e) if e.is_not_found() => Err(ControllerError::ResourceFailed(format!(
                "server {id} no longer exists"
            ))),
            Err(e) => Err(e.into()),
        };
    }

    if let Some(server) = find_server(client, ctx.name).await? {
        adopt_server(&server, status);
        return Ok(server);
    }

    let opts = server_opts(ctx, resolved, status)?;
    let server = client.create_server(&opts).await?;
    info!(
        "Created server {} ({}) for {} with {} port(s)",
        server.name,
        server.id,
        ctx.owner_reference(),
        opts.ports.len()
    );
    status.instance_id = Some(server.id.clone());
    status.instance_name = Some(server.name.clone());
    status.instance_state = InstanceState::Building;
    Ok(server)
}

fn adopt_server(server: &Server, status: &mut OpenStackMachineStatus) {
    info!("Adopting server {} ({})", server.name, server.id);
    status.instance_id = Some(server.id.clone());
    status.instance_name = Some(server.name.clone());
}

fn server_opts(
    ctx: &MachineContext<'_>,
    resolved: &ResolvedMachineSpec,
    status: &OpenStackMachineStatus,
) -> Result<CreateServerOpts, ControllerError> {
    let boot_volume = match requested_root_volume(ctx) {
        Some(_) => {
            let volume = status
                .resources
                .root_volume
                .as_ref()
                .filter(|v| v.ready)
                .ok_or_else(|| ControllerError::Internal("root volume is not ready".to_string()))?;
            Some(BlockDeviceMapping::boot_volume(volume.id.clone()))
        }
        None => None,
    };
    let metadata: BTreeMap<String, String> = ctx
        .spec
        .server_metadata
        .iter()
        .map(|m| (m.key.clone(), m.value.clone()))
        .collect();

    Ok(CreateServerOpts {
        name: ctx.name.to_string(),
        image_ref: boot_volume.is_none().then(|| resolved.image_id.clone()),
        flavor_ref: resolved.flavor_id.clone(),
        key_name: ctx.spec.ssh_key_name.clone(),
        ports: status.resources.ports.iter().map(|p| p.id.clone()).collect(),
        user_data: ctx.spec.user_data.clone(),
        metadata,
        config_drive: ctx.spec.config_drive,
        availability_zone: ctx.spec.availability_zone.clone(),
        tags: ctx.tags(),
        block_devices: boot_volume.into_iter().collect(),
        server_group_id: resolved.server_group_id.clone(),
    })
}

/// Fixed addresses of the server, sorted by network name
fn internal_addresses(server: &Server) -> Vec<MachineAddress> {
    let mut networks: Vec<&String> = server.addresses.keys().collect();
    networks.sort();
    networks
        .into_iter()
        .filter_map(|network| server.addresses.get(network))
        .flatten()
        .filter(|a| a.ip_type.as_deref() != Some("floating"))
        .map(|a| MachineAddress {
            address_type: INTERNAL_IP.to_string(),
            address: a.addr.clone(),
        })
        .collect()
}

/// Control-plane machines without a load balancer in front of them carry
/// the API endpoint on a floating IP
fn wants_floating_ip(ctx: &MachineContext<'_>) -> bool {
    ctx.spec.control_plane && !ctx.cluster.load_balancer_enabled && !ctx.cluster.disable_api_server_floating_ip
}

async fn reconcile_floating_ip(
    client: &dyn OpenStackClientTrait,
    ctx: &MachineContext<'_>,
    status: &mut OpenStackMachineStatus,
) -> Result<Option<String>, ControllerError> {
    if !wants_floating_ip(ctx) {
        return Ok(None);
    }
    let Some(external) = ctx.cluster.external_network.as_ref() else {
        if ctx.spec.floating_ip.is_some() {
            warn!(
                "Machine {} requests floating IP but cluster {} has no external network",
                ctx.owner_reference(),
                ctx.cluster.name
            );
        }
        return Ok(None);
    };
    let port = status
        .resources
        .ports
        .first()
        .ok_or_else(|| ControllerError::Internal("active server without ports".to_string()))?;
    let fip = ensure_floating_ip(
        client,
        &external.id,
        ctx.spec.floating_ip.as_deref(),
        &port.id,
        &format!("API server of {}", ctx.owner_reference()),
    )
    .await?;
    status.floating_ip = Some(fip.floating_ip_address.clone());
    Ok(Some(fip.floating_ip_address))
}

async fn reconcile_membership(
    client: &dyn OpenStackClientTrait,
    ctx: &MachineContext<'_>,
    server: &Server,
    status: &mut OpenStackMachineStatus,
) -> Result<ReconcileOutcome, ControllerError> {
    if !ctx.spec.control_plane || !ctx.cluster.load_balancer_enabled {
        return Ok(ReconcileOutcome::Ready);
    }
    let Some(lb) = ctx.cluster.api_server_load_balancer.as_ref() else {
        debug!(
            "Cluster {} has no load balancer yet, {} waits",
            ctx.cluster.name,
            ctx.owner_reference()
        );
        return Ok(ReconcileOutcome::Requeue(DEPENDENCY_POLL_INTERVAL));
    };
    let address = server
        .first_fixed_ip()
        .ok_or_else(|| ControllerError::Internal(format!("server {} has no fixed IP", server.id)))?;
    let subnet_id = ctx
        .cluster
        .network
        .as_ref()
        .and_then(|n| n.subnets.first())
        .map(|s| s.id.as_str());
    match reconcile_members(client, lb, ctx.name, address, subnet_id, &mut status.load_balancer_members).await {
        Err(e) if e.is_dependency_wait() => {
            debug!("{}: {}", ctx.owner_reference(), e);
            Ok(ReconcileOutcome::Requeue(DEPENDENCY_POLL_INTERVAL))
        }
        other => other,
    }
}

/// Tear the machine down in reverse creation order
///
/// Returns `Ready` once nothing the machine owns is left in OpenStack.
pub async fn delete_instance(
    client: &dyn OpenStackClientTrait,
    ctx: &MachineContext<'_>,
    status: &mut OpenStackMachineStatus,
) -> Result<ReconcileOutcome, ControllerError> {
    status.ready = false;

    if let ReconcileOutcome::Requeue(after) = remove_members(
        client,
        ctx.cluster.api_server_load_balancer.as_ref(),
        ctx.name,
        &mut status.load_balancer_members,
    )
    .await?
    {
        return Ok(ReconcileOutcome::Requeue(after));
    }

    if ctx.spec.control_plane {
        if let Some(port) = status.resources.ports.first() {
            release_floating_ips(client, &port.id, ctx.spec.floating_ip.as_deref()).await?;
        }
        status.floating_ip = None;
    }

    if let ReconcileOutcome::Requeue(after) = delete_server(client, ctx, status).await? {
        return Ok(ReconcileOutcome::Requeue(after));
    }

    let resolved_ports = status.resolved.as_ref().map(|r| r.ports.clone()).unwrap_or_default();
    delete_ports(client, &resolved_ports, &mut status.resources.ports).await?;

    if status.instance_id.is_none() {
        delete_root_volume(client, ctx, status).await?;
    } else {
        // Deleted together with the server
        status.resources.root_volume = None;
    }

    status.addresses.clear();
    info!("Machine {} released all OpenStack resources", ctx.owner_reference());
    Ok(ReconcileOutcome::Ready)
}

/// Request server deletion and wait for it to disappear
async fn delete_server(
    client: &dyn OpenStackClientTrait,
    ctx: &MachineContext<'_>,
    status: &mut OpenStackMachineStatus,
) -> Result<ReconcileOutcome, ControllerError> {
    let server = match &status.instance_id {
        Some(id) => match client.get_server(id).await {
            Ok(server) => Some(server),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e.into()),
        },
        None => find_server(client, ctx.name).await?,
    };

    let Some(server) = server else {
        if status.instance_id.is_some() {
            status.instance_state = InstanceState::Deleted;
        }
        return Ok(ReconcileOutcome::Ready);
    };

    // Remembering the ID keeps the boot volume out of our own cleanup
    status.instance_id = Some(server.id.clone());

    // Nova can drop an accepted delete; ask again unless it is still working on it
    if server.is_deleting() {
        debug!("Waiting for server {} ({}) to go away", server.name, server.id);
        return Ok(ReconcileOutcome::Requeue(SERVER_DELETE_POLL_INTERVAL));
    }
    if status.instance_state == InstanceState::Deleting {
        warn!("Delete of server {} ({}) did not stick, requesting it again", server.name, server.id);
    }
    match client.delete_server(&server.id).await {
        Ok(()) => {
            info!("Deleting server {} ({})", server.name, server.id);
            status.instance_state = InstanceState::Deleting;
            Ok(ReconcileOutcome::Requeue(SERVER_DELETE_POLL_INTERVAL))
        }
        Err(e) if e.is_not_found() => {
            status.instance_state = InstanceState::Deleted;
            Ok(ReconcileOutcome::Ready)
        }
        Err(e) => Err(e.into()),
    }
}
