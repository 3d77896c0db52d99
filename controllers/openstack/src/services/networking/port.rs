//! Machine ports
//!
//! Ports are resolved strictly in index order and exactly one per step:
//! `status.ports[i]` is only appended once port `i` exists in OpenStack, so
//! after a crash the next reconcile knows precisely which port comes next.
//! A port is first looked up by its deterministic name on its network and
//! adopted if found; only then is it created.

use crate::error::ControllerError;
use crate::services::networking::{security_group, trunk};
use crate::services::networking::network::{resolve_network, resolve_subnet};
use crate::services::{at_most_one, MachineContext};
use crds::{PortOpts, PortStatus, ResolvedFixedIp, ResolvedPortSpec};
use openstack_client::{CreatePortOpts, FixedIpOpts, OpenStackClientTrait, Port, PortFilter, TaggedResource};
use tracing::{debug, info, warn};

/// Ports-ready predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortProgress {
    /// Fewer ports in status than resolved
    Incomplete,
    /// Every resolved port is in status
    Ready,
}

/// `<instance>-<index>`, or `<instance>-<suffix>` when a suffix is declared
pub fn port_name(instance: &str, index: usize, suffix: Option<&str>) -> String {
    match suffix {
        Some(suffix) => format!("{instance}-{suffix}"),
        None => format!("{instance}-{index}"),
    }
}

/// Turn the declared ports into concrete create options
///
/// No declared ports means a single port on the cluster network.
pub async fn resolve_port_specs(
    client: &dyn OpenStackClientTrait,
    ctx: &MachineContext<'_>,
) -> Result<Vec<ResolvedPortSpec>, ControllerError> {
    let declared: Vec<PortOpts> = if ctx.spec.ports.is_empty() {
        vec![PortOpts::default()]
    } else {
        ctx.spec.ports.clone()
    };
    let managed_group = managed_security_group(ctx)?;
    let machine_tags = ctx.tags();

    let mut resolved = Vec::with_capacity(declared.len());
    for (index, opts) in declared.iter().enumerate() {
        let network_id = match &opts.network {
            Some(param) => resolve_network(client, param, None).await?.id,
            None => ctx
                .cluster
                .network
                .as_ref()
                .map(|n| n.id.clone())
                .ok_or_else(|| ControllerError::DependencyNotReady("cluster network is not resolved yet".to_string()))?,
        };

        let mut fixed_ips = Vec::with_capacity(opts.fixed_ips.len());
        for fixed_ip in &opts.fixed_ips {
            let subnet_id = match &fixed_ip.subnet {
                Some(param) => Some(resolve_subnet(client, &network_id, param).await?.id),
                None => None,
            };
            fixed_ips.push(ResolvedFixedIp {
                subnet_id,
                ip_address: fixed_ip.ip_address.clone(),
            });
        }

        let disable_port_security = opts.disable_port_security.unwrap_or(false);
        let declared_groups = opts.security_groups.as_ref().or(ctx.spec.security_groups.as_ref());
        let security_groups = if disable_port_security {
            if declared_groups.is_some_and(|groups| !groups.is_empty()) {
                return Err(ControllerError::InvalidConfig(format!(
                    "port {index} disables port security but lists security groups"
                )));
            }
            None
        } else {
            let mut ids = match declared_groups {
                Some(params) => {
                    let mut ids = Vec::with_capacity(params.len());
                    for param in params {
                        ids.push(security_group::resolve_security_group(client, param).await?);
                    }
                    Some(ids)
                }
                None => None,
            };
            // An empty list asks for no groups at all, managed ones included
            let explicitly_none = declared_groups.is_some_and(|groups| groups.is_empty());
            if let Some(managed) = managed_group.as_ref().filter(|_| !explicitly_none) {
                let list = ids.get_or_insert_with(Vec::new);
                if !list.contains(managed) {
                    list.push(managed.clone());
                }
            }
            ids
        };

        let mut tags = machine_tags.clone();
        tags.extend(opts.tags.iter().cloned());
        tags.sort();
        tags.dedup();

        resolved.push(ResolvedPortSpec {
            name: port_name(ctx.name, index, opts.name_suffix.as_deref()),
            network_id,
            description: Some(
                opts.description
                    .clone()
                    .unwrap_or_else(|| format!("Created by stackops for machine {}", ctx.owner_reference())),
            ),
            fixed_ips,
            security_groups,
            disable_port_security,
            tags,
            trunk: opts.trunk.unwrap_or(ctx.spec.trunk),
        });
    }
    Ok(resolved)
}

/// Security group the cluster manages for this machine's role
fn managed_security_group(ctx: &MachineContext<'_>) -> Result<Option<String>, ControllerError> {
    if !ctx.cluster.manages_security_groups {
        return Ok(None);
    }
    let group = if ctx.spec.control_plane {
        &ctx.cluster.control_plane_security_group
    } else {
        &ctx.cluster.worker_security_group
    };
    group
        .as_ref()
        .map(|g| Some(g.id.clone()))
        .ok_or_else(|| ControllerError::DependencyNotReady("cluster security groups are not ready yet".to_string()))
}

/// Status ports must be a prefix of the resolved ports
pub fn check_port_order(resolved: &[ResolvedPortSpec], ports: &[PortStatus]) -> Result<(), ControllerError> {
    if ports.len() > resolved.len() {
        return Err(ControllerError::Internal(format!(
            "{} ports in status but only {} resolved",
            ports.len(),
            resolved.len()
        )));
    }
    for (index, (spec, port)) in resolved.iter().zip(ports).enumerate() {
        if spec.network_id != port.network_id {
            return Err(ControllerError::Internal(format!(
                "port {index} is on network {} but should be on {}",
                port.network_id, spec.network_id
            )));
        }
    }
    Ok(())
}

/// Resolve the port at index `ports.len()`: adopt it or create it
pub async fn reconcile_next_port(
    client: &dyn OpenStackClientTrait,
    resolved: &[ResolvedPortSpec],
    ports: &mut Vec<PortStatus>,
) -> Result<PortProgress, ControllerError> {
    check_port_order(resolved, ports)?;
    let index = ports.len();
    let Some(spec) = resolved.get(index) else {
        return Ok(PortProgress::Ready);
    };

    let existing = find_port(client, &spec.name, &spec.network_id).await?;
    let port = match existing {
        Some(port) => {
            info!("Adopting port {} ({})", port.name, port.id);
            port
        }
        None => create_port(client, spec).await?,
    };

    if !spec.tags.iter().all(|t| port.tags.contains(t)) {
        let mut merged = port.tags.clone();
        merged.extend(spec.tags.iter().filter(|t| !port.tags.contains(t)).cloned());
        client.replace_tags(TaggedResource::Port, &port.id, &merged).await?;
    }

    let trunk_id = if spec.trunk {
        Some(trunk::ensure_trunk(client, &spec.name, &port.id, &spec.tags).await?.id)
    } else {
        None
    };

    ports.push(PortStatus {
        id: port.id,
        network_id: port.network_id,
        trunk_id,
    });

    if ports.len() == resolved.len() {
        Ok(PortProgress::Ready)
    } else {
        Ok(PortProgress::Incomplete)
    }
}

/// Drive the port set to Ready, one port per step
pub async fn reconcile_ports(
    client: &dyn OpenStackClientTrait,
    resolved: &[ResolvedPortSpec],
    ports: &mut Vec<PortStatus>,
) -> Result<(), ControllerError> {
    while reconcile_next_port(client, resolved, ports).await? == PortProgress::Incomplete {}
    Ok(())
}

async fn find_port(
    client: &dyn OpenStackClientTrait,
    name: &str,
    network_id: &str,
) -> Result<Option<Port>, ControllerError> {
    let ports = client
        .list_ports(&PortFilter {
            name: Some(name.to_string()),
            network_id: Some(network_id.to_string()),
            ..Default::default()
        })
        .await?;
    let ports = ports.into_iter().filter(|p| p.name == name).collect();
    at_most_one(ports, "port", name)
}

async fn create_port(client: &dyn OpenStackClientTrait, spec: &ResolvedPortSpec) -> Result<Port, ControllerError> {
    let fixed_ips = (!spec.fixed_ips.is_empty()).then(|| {
        spec.fixed_ips
            .iter()
            .map(|ip| FixedIpOpts {
                subnet_id: ip.subnet_id.clone(),
                ip_address: ip.ip_address.clone(),
            })
            .collect()
    });
    let opts = CreatePortOpts {
        name: spec.name.clone(),
        network_id: spec.network_id.clone(),
        description: spec.description.clone(),
        fixed_ips,
        security_groups: spec.security_groups.clone(),
        port_security_enabled: spec.disable_port_security.then_some(false),
    };
    let port = client.create_port(&opts).await?;
    info!("Created port {} ({}) on network {}", port.name, port.id, port.network_id);
    Ok(port)
}

/// Delete every port of a machine in reverse index order
///
/// Ports missing from status (created just before a crash) are found by
/// name. A port's trunk is emptied and deleted before the port itself.
pub async fn delete_ports(
    client: &dyn OpenStackClientTrait,
    resolved: &[ResolvedPortSpec],
    ports: &mut Vec<PortStatus>,
) -> Result<(), ControllerError> {
    let count = resolved.len().max(ports.len());
    for index in (0..count).rev() {
        let spec = resolved.get(index);
        let targets: Vec<(String, Option<String>)> = match ports.get(index) {
            Some(status) => vec![(status.id.clone(), status.trunk_id.clone())],
            None => match spec {
                Some(spec) => {
                    let found = client
                        .list_ports(&PortFilter {
                            name: Some(spec.name.clone()),
                            network_id: Some(spec.network_id.clone()),
                            ..Default::default()
                        })
                        .await?;
                    found
                        .into_iter()
                        .filter(|p| p.name == spec.name)
                        .map(|p| (p.id, None))
                        .collect()
                }
                None => vec![],
            },
        };

        for (port_id, trunk_id) in targets {
            if trunk_id.is_some() || spec.is_some_and(|s| s.trunk) {
                trunk::delete_trunk(client, trunk_id.as_deref(), &port_id).await?;
            }
            match client.delete_port(&port_id).await {
                Ok(()) => info!("Deleted port {}", port_id),
                Err(e) if e.is_not_found() => debug!("Port {} already gone", port_id),
                Err(e) if e.is_conflict() => {
                    warn!("Port {} is still in use: {}", port_id, e);
                    return Err(e.into());
                }
                Err(e) => return Err(e.into()),
            }
        }
        ports.truncate(index);
    }
    Ok(())
}
