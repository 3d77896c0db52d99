//! Compute operations for MockOpenStackClient
//!
//! Handles servers, flavors and server groups

use super::{has_tags, matches, MockOpenStackClient, Operation, ServerRecord};
use crate::error::OpenStackError;
use crate::models::*;
use std::collections::HashMap;

pub fn list_servers(client: &MockOpenStackClient, filter: &ServerFilter) -> Result<Vec<Server>, OpenStackError> {
    let state = client.begin(Operation::ListServers, filter.name.clone().unwrap_or_default())?;
    Ok(state
        .servers
        .values()
        .map(|record| &record.server)
        .filter(|s| matches(filter.name.as_ref(), &s.name) && has_tags(&s.tags, &filter.tags))
        .cloned()
        .collect())
}

pub fn get_server(client: &MockOpenStackClient, id: &str) -> Result<Server, OpenStackError> {
    let state = client.begin(Operation::GetServer, id)?;
    state
        .servers
        .get(id)
        .map(|record| record.server.clone())
        .ok_or_else(|| OpenStackError::NotFound(format!("Server {} not found", id)))
}

pub fn create_server(client: &MockOpenStackClient, opts: &CreateServerOpts) -> Result<Server, OpenStackError> {
    let mut state = client.begin(Operation::CreateServer, &opts.name)?;

    if !state.flavors.contains_key(&opts.flavor_ref) {
        return Err(OpenStackError::InvalidRequest(format!("Flavor {} could not be found", opts.flavor_ref)));
    }
    if let Some(image) = &opts.image_ref {
        if !state.images.contains_key(image) {
            return Err(OpenStackError::InvalidRequest(format!("Image {} could not be found", image)));
        }
    } else if opts.block_devices.is_empty() {
        return Err(OpenStackError::InvalidRequest("either imageRef or a boot volume is required".to_string()));
    }
    for device in &opts.block_devices {
        let volume = device
            .uuid
            .as_ref()
            .and_then(|id| state.volumes.get(id))
            .ok_or_else(|| OpenStackError::InvalidRequest("block device volume not found".to_string()))?;
        if !volume.is_available() || !volume.attachments.is_empty() {
            return Err(OpenStackError::InvalidRequest(format!(
                "volume {} is {} and cannot be attached",
                volume.id, volume.status
            )));
        }
    }
    for port_id in &opts.ports {
        let port = state
            .ports
            .get(port_id)
            .ok_or_else(|| OpenStackError::InvalidRequest(format!("Port {} could not be found", port_id)))?;
        if !port.device_id.is_empty() {
            return Err(OpenStackError::Conflict(format!("Port {} is still in use", port_id)));
        }
    }
    if let Some(group) = &opts.server_group_id {
        if !state.server_groups.contains_key(group) {
            return Err(OpenStackError::InvalidRequest(format!("Server group {} not found", group)));
        }
    }

    let id = state.next_id();

    // Bind ports and collect the addresses Nova would report
    let mut addresses: HashMap<String, Vec<ServerAddress>> = HashMap::new();
    for port_id in &opts.ports {
        if let Some(port) = state.ports.get_mut(port_id) {
            port.device_id = id.clone();
            port.status = "ACTIVE".to_string();
            let network_id = port.network_id.clone();
            let fixed: Vec<ServerAddress> = port
                .fixed_ips
                .iter()
                .map(|ip| ServerAddress {
                    addr: ip.ip_address.clone(),
                    version: if ip.ip_address.contains(':') { 6 } else { 4 },
                    ip_type: Some("fixed".to_string()),
                })
                .collect();
            let network_name = state
                .networks
                .get(&network_id)
                .map(|n| n.name.clone())
                .unwrap_or(network_id);
            addresses.entry(network_name).or_default().extend(fixed);
        }
    }

    let mut delete_on_termination = Vec::new();
    for device in &opts.block_devices {
        if let Some(volume) = device.uuid.as_ref().and_then(|vid| state.volumes.get_mut(vid)) {
            volume.status = "in-use".to_string();
            volume.attachments.push(VolumeAttachment {
                server_id: id.clone(),
                attachment_id: None,
                device: Some("/dev/vda".to_string()),
            });
            if device.delete_on_termination {
                delete_on_termination.push(volume.id.clone());
            }
        }
    }

    if let Some(group) = opts.server_group_id.as_ref().and_then(|g| state.server_groups.get_mut(g)) {
        group.members.push(id.clone());
    }

    let server = Server {
        id: id.clone(),
        name: opts.name.clone(),
        status: "BUILD".to_string(),
        addresses,
        availability_zone: opts.availability_zone.clone(),
        task_state: None,
        metadata: opts.metadata.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        tags: opts.tags.clone(),
    };
    state.servers.insert(
        id,
        ServerRecord {
            server: server.clone(),
            request: Some(opts.clone()),
            flavor_id: opts.flavor_ref.clone(),
            ports: opts.ports.clone(),
            delete_on_termination,
            deleting: false,
        },
    );
    Ok(server)
}

pub fn delete_server(client: &MockOpenStackClient, id: &str) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::DeleteServer, id)?;
    let record = state
        .servers
        .get_mut(id)
        .ok_or_else(|| OpenStackError::NotFound(format!("Server {} not found", id)))?;
    // Stays visible until the next advance()
    record.deleting = true;
    record.server.task_state = Some("deleting".to_string());
    Ok(())
}

pub fn list_flavors(client: &MockOpenStackClient) -> Result<Vec<Flavor>, OpenStackError> {
    let state = client.begin(Operation::ListFlavors, "")?;
    Ok(state.flavors.values().cloned().collect())
}

pub fn get_flavor(client: &MockOpenStackClient, id: &str) -> Result<Flavor, OpenStackError> {
    let state = client.begin(Operation::GetFlavor, id)?;
    state
        .flavors
        .get(id)
        .cloned()
        .ok_or_else(|| OpenStackError::NotFound(format!("Flavor {} not found", id)))
}

pub fn list_server_groups(client: &MockOpenStackClient) -> Result<Vec<ServerGroup>, OpenStackError> {
    let state = client.begin(Operation::ListServerGroups, "")?;
    Ok(state.server_groups.values().cloned().collect())
}

pub fn get_server_group(client: &MockOpenStackClient, id: &str) -> Result<ServerGroup, OpenStackError> {
    let state = client.begin(Operation::GetServerGroup, id)?;
    state
        .server_groups
        .get(id)
        .cloned()
        .ok_or_else(|| OpenStackError::NotFound(format!("Server group {} not found", id)))
}

pub fn create_server_group(
    client: &MockOpenStackClient,
    opts: &CreateServerGroupOpts,
) -> Result<ServerGroup, OpenStackError> {
    let mut state = client.begin(Operation::CreateServerGroup, &opts.name)?;
    let valid = ["affinity", "anti-affinity", "soft-affinity", "soft-anti-affinity"];
    if !valid.contains(&opts.policy.as_str()) {
        return Err(OpenStackError::InvalidRequest(format!("invalid policy {}", opts.policy)));
    }
    let group = ServerGroup {
        id: state.next_id(),
        name: opts.name.clone(),
        policy: opts.policy.clone(),
        members: vec![],
    };
    state.server_groups.insert(group.id.clone(), group.clone());
    Ok(group)
}

pub fn delete_server_group(client: &MockOpenStackClient, id: &str) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::DeleteServerGroup, id)?;
    state
        .server_groups
        .remove(id)
        .map(|_| ())
        .ok_or_else(|| OpenStackError::NotFound(format!("Server group {} not found", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openstack_trait::OpenStackClientTrait;

    fn server_opts(client: &MockOpenStackClient, name: &str) -> CreateServerOpts {
        let image = client.add_image("img-a", &[]);
        let flavor = client.add_flavor("m1.small");
        CreateServerOpts {
            name: name.to_string(),
            image_ref: Some(image.id),
            flavor_ref: flavor.id,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_server_builds_until_advance() {
        let client = MockOpenStackClient::new();
        let net = client.add_network("net-1");
        client.add_subnet(&net.id, "subnet-1", "10.6.0.0/24");
        let port = client.add_port("m1-0", &net.id);
        let mut opts = server_opts(&client, "m1");
        opts.ports = vec![port.id.clone()];

        let server = client.create_server(&opts).await.unwrap();
        assert_eq!(server.state(), ServerStatus::Build);
        assert_eq!(server.first_fixed_ip(), Some("10.6.0.10"));

        client.advance().unwrap();
        let server = client.get_server(&server.id).await.unwrap();
        assert_eq!(server.state(), ServerStatus::Active);
        assert_eq!(client.get_port(&port.id).await.unwrap().device_id, server.id);
    }

    #[tokio::test]
    async fn test_server_delete_is_pending_until_advance() {
        let client = MockOpenStackClient::new();
        let server = client.create_server(&server_opts(&client, "m1")).await.unwrap();
        client.delete_server(&server.id).await.unwrap();
        assert!(client.get_server(&server.id).await.is_ok());
        assert!(client.is_server_deleting(&server.id));

        client.advance().unwrap();
        assert!(client.get_server(&server.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_unknown_flavor_is_rejected() {
        let client = MockOpenStackClient::new();
        let opts = CreateServerOpts {
            name: "m1".to_string(),
            flavor_ref: "missing".to_string(),
            image_ref: Some("img".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            client.create_server(&opts).await,
            Err(OpenStackError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_list_servers_matches_name_exactly() {
        let client = MockOpenStackClient::new();
        client.add_server("m1", "ACTIVE");
        client.add_server("m10", "ACTIVE");
        let found = client
            .list_servers(&ServerFilter {
                name: Some("m1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }
}
