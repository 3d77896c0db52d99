//! Floating IPs of control-plane machines

use crate::error::ControllerError;
use crate::services::at_most_one;
use openstack_client::{CreateFloatingIpOpts, FloatingIp, FloatingIpFilter, OpenStackClientTrait};
use tracing::{debug, info};

/// Make sure a floating IP on `external_network_id` points at `port_id`
///
/// With a requested address, that exact address is used: adopted when
/// free or already ours, allocated when it does not exist yet. Without
/// one, a floating IP already bound to the port is reused.
pub async fn ensure_floating_ip(
    client: &dyn OpenStackClientTrait,
    external_network_id: &str,
    requested: Option<&str>,
    port_id: &str,
    description: &str,
) -> Result<FloatingIp, ControllerError> {
    let filter = match requested {
        Some(address) => FloatingIpFilter {
            floating_ip_address: Some(address.to_string()),
            port_id: None,
        },
        None => FloatingIpFilter {
            floating_ip_address: None,
            port_id: Some(port_id.to_string()),
        },
    };
    let label = requested.unwrap_or(port_id);
    let existing = client.list_floating_ips(&filter).await?;

    match at_most_one(existing, "floating IP", label)? {
        Some(fip) if fip.port_id.as_deref() == Some(port_id) => {
            debug!("Floating IP {} already on port {}", fip.floating_ip_address, port_id);
            Ok(fip)
        }
        Some(fip) if fip.port_id.is_none() => {
            let fip = client.associate_floating_ip(&fip.id, Some(port_id)).await?;
            info!("Associated floating IP {} with port {}", fip.floating_ip_address, port_id);
            Ok(fip)
        }
        Some(fip) => Err(ControllerError::InvalidConfig(format!(
            "floating IP {} is in use by port {}",
            fip.floating_ip_address,
            fip.port_id.unwrap_or_default()
        ))),
        None => {
            let fip = client
                .create_floating_ip(&CreateFloatingIpOpts {
                    floating_network_id: external_network_id.to_string(),
                    floating_ip_address: requested.map(str::to_string),
                    port_id: Some(port_id.to_string()),
                    description: Some(description.to_string()),
                })
                .await?;
            info!("Created floating IP {} for port {}", fip.floating_ip_address, port_id);
            Ok(fip)
        }
    }
}

/// Release the floating IPs bound to a port
///
/// A requested address belongs to the user and is only disassociated;
/// allocated ones are deleted.
pub async fn release_floating_ips(
    client: &dyn OpenStackClientTrait,
    port_id: &str,
    requested: Option<&str>,
) -> Result<(), ControllerError> {
    let bound = client
        .list_floating_ips(&FloatingIpFilter {
            floating_ip_address: None,
            port_id: Some(port_id.to_string()),
        })
        .await?;
    for fip in bound {
        let result = if requested == Some(fip.floating_ip_address.as_str()) {
            client.associate_floating_ip(&fip.id, None).await.map(|_| ())
        } else {
            client.delete_floating_ip(&fip.id).await
        };
        match result {
            Ok(()) => info!("Released floating IP {}", fip.floating_ip_address),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
