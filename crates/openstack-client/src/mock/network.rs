//! Network operations for MockOpenStackClient
//!
//! Handles networks, subnets, ports, trunks, security groups and floating IPs

use super::{has_tags, matches, MockOpenStackClient, MockState, Operation};
use crate::error::OpenStackError;
use crate::models::*;

pub fn list_networks(client: &MockOpenStackClient, filter: &NetworkFilter) -> Result<Vec<Network>, OpenStackError> {
    let state = client.begin(Operation::ListNetworks, filter.name.clone().unwrap_or_default())?;
    Ok(state
        .networks
        .values()
        .filter(|n| {
            matches(filter.id.as_ref(), &n.id)
                && matches(filter.name.as_ref(), &n.name)
                && has_tags(&n.tags, &filter.tags)
                && filter.external.is_none_or(|e| e == n.external)
        })
        .cloned()
        .collect())
}

pub fn get_network(client: &MockOpenStackClient, id: &str) -> Result<Network, OpenStackError> {
    let state = client.begin(Operation::GetNetwork, id)?;
    state
        .networks
        .get(id)
        .cloned()
        .ok_or_else(|| OpenStackError::NotFound(format!("Network {} not found", id)))
}

pub fn list_subnets(client: &MockOpenStackClient, filter: &SubnetFilter) -> Result<Vec<Subnet>, OpenStackError> {
    let state = client.begin(Operation::ListSubnets, filter.name.clone().unwrap_or_default())?;
    Ok(state
        .subnets
        .values()
        .filter(|s| {
            matches(filter.id.as_ref(), &s.id)
                && matches(filter.name.as_ref(), &s.name)
                && matches(filter.network_id.as_ref(), &s.network_id)
                && matches(filter.cidr.as_ref(), &s.cidr)
        })
        .cloned()
        .collect())
}

pub fn list_ports(client: &MockOpenStackClient, filter: &PortFilter) -> Result<Vec<Port>, OpenStackError> {
    let state = client.begin(Operation::ListPorts, filter.name.clone().unwrap_or_default())?;
    Ok(state
        .ports
        .values()
        .filter(|p| {
            matches(filter.name.as_ref(), &p.name)
                && matches(filter.network_id.as_ref(), &p.network_id)
                && matches(filter.device_id.as_ref(), &p.device_id)
                && has_tags(&p.tags, &filter.tags)
        })
        .cloned()
        .collect())
}

pub fn get_port(client: &MockOpenStackClient, id: &str) -> Result<Port, OpenStackError> {
    let state = client.begin(Operation::GetPort, id)?;
    state
        .ports
        .get(id)
        .cloned()
        .ok_or_else(|| OpenStackError::NotFound(format!("Port {} not found", id)))
}

fn allocate_fixed_ips(
    state: &mut MockState,
    network_id: &str,
    requested: Option<&Vec<FixedIpOpts>>,
) -> Result<Vec<FixedIp>, OpenStackError> {
    let default_request = [FixedIpOpts::default()];
    let requests: &[FixedIpOpts] = match requested {
        Some(list) => list,
        None => &default_request,
    };

    let mut fixed_ips = Vec::new();
    for request in requests {
        let subnet = match &request.subnet_id {
            Some(id) => state
                .subnets
                .get(id)
                .cloned()
                .ok_or_else(|| OpenStackError::NotFound(format!("Subnet {} not found", id)))?,
            None => match state.first_subnet_of(network_id) {
                Some(subnet) => subnet,
                // A network without subnets yields a port without addresses
                None if requested.is_none() => continue,
                None => {
                    return Err(OpenStackError::InvalidRequest(format!(
                        "network {} has no subnet to allocate from",
                        network_id
                    )));
                }
            },
        };
        if subnet.network_id != network_id {
            return Err(OpenStackError::InvalidRequest(format!(
                "subnet {} is not on network {}",
                subnet.id, network_id
            )));
        }
        let ip_address = match &request.ip_address {
            Some(address) => {
                let in_use = state
                    .ports
                    .values()
                    .flat_map(|p| p.fixed_ips.iter())
                    .any(|ip| ip.subnet_id == subnet.id && &ip.ip_address == address);
                if in_use {
                    return Err(OpenStackError::Conflict(format!(
                        "IP address {} already allocated in subnet {}",
                        address, subnet.id
                    )));
                }
                address.clone()
            }
            None => state.next_ip(&subnet),
        };
        fixed_ips.push(FixedIp {
            subnet_id: subnet.id.clone(),
            ip_address,
        });
    }
    Ok(fixed_ips)
}

pub fn create_port(client: &MockOpenStackClient, opts: &CreatePortOpts) -> Result<Port, OpenStackError> {
    let mut state = client.begin(Operation::CreatePort, &opts.name)?;
    if !state.networks.contains_key(&opts.network_id) {
        return Err(OpenStackError::NotFound(format!("Network {} not found", opts.network_id)));
    }

    let port_security = opts.port_security_enabled.unwrap_or(true);
    let security_groups = match &opts.security_groups {
        Some(groups) => {
            if let Some(missing) = groups.iter().find(|g| !state.security_groups.contains_key(*g)) {
                return Err(OpenStackError::NotFound(format!("Security group {} not found", missing)));
            }
            groups.clone()
        }
        None if port_security => state
            .security_groups
            .values()
            .filter(|g| g.name == "default")
            .map(|g| g.id.clone())
            .collect(),
        None => vec![],
    };
    if !port_security && !security_groups.is_empty() {
        return Err(OpenStackError::InvalidRequest(
            "port security must be enabled to have security groups".to_string(),
        ));
    }

    let fixed_ips = allocate_fixed_ips(&mut state, &opts.network_id, opts.fixed_ips.as_ref())?;
    let port = Port {
        id: state.next_id(),
        name: opts.name.clone(),
        network_id: opts.network_id.clone(),
        fixed_ips,
        security_groups,
        port_security_enabled: Some(port_security),
        device_id: String::new(),
        status: "DOWN".to_string(),
        description: opts.description.clone().unwrap_or_default(),
        tags: vec![],
    };
    state.ports.insert(port.id.clone(), port.clone());
    Ok(port)
}

pub fn delete_port(client: &MockOpenStackClient, id: &str) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::DeletePort, id)?;
    if !state.ports.contains_key(id) {
        return Err(OpenStackError::NotFound(format!("Port {} not found", id)));
    }
    if state.trunks.values().any(|t| t.port_id == id) {
        return Err(OpenStackError::Conflict(format!("Port {} is the parent of a trunk", id)));
    }
    state.ports.remove(id);
    for fip in state.floating_ips.values_mut() {
        if fip.port_id.as_deref() == Some(id) {
            fip.port_id = None;
            fip.fixed_ip_address = None;
            fip.status = "DOWN".to_string();
        }
    }
    Ok(())
}

pub fn replace_tags(
    client: &MockOpenStackClient,
    resource: TaggedResource,
    id: &str,
    tags: &[String],
) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::ReplaceTags, id)?;
    let target = match resource {
        TaggedResource::Network => state.networks.get_mut(id).map(|n| &mut n.tags),
        TaggedResource::Port => state.ports.get_mut(id).map(|p| &mut p.tags),
        TaggedResource::Trunk => state.trunks.get_mut(id).map(|t| &mut t.tags),
        TaggedResource::SecurityGroup => state.security_groups.get_mut(id).map(|g| &mut g.tags),
    };
    let target = target
        .ok_or_else(|| OpenStackError::NotFound(format!("{} {} not found", resource.collection(), id)))?;
    *target = tags.to_vec();
    Ok(())
}

pub fn list_trunks(client: &MockOpenStackClient, filter: &TrunkFilter) -> Result<Vec<Trunk>, OpenStackError> {
    let state = client.begin(Operation::ListTrunks, filter.name.clone().unwrap_or_default())?;
    Ok(state
        .trunks
        .values()
        .filter(|t| matches(filter.name.as_ref(), &t.name) && matches(filter.port_id.as_ref(), &t.port_id))
        .cloned()
        .collect())
}

pub fn create_trunk(client: &MockOpenStackClient, opts: &CreateTrunkOpts) -> Result<Trunk, OpenStackError> {
    let mut state = client.begin(Operation::CreateTrunk, &opts.name)?;
    if !state.ports.contains_key(&opts.port_id) {
        return Err(OpenStackError::NotFound(format!("Port {} not found", opts.port_id)));
    }
    if state.trunks.values().any(|t| t.port_id == opts.port_id) {
        return Err(OpenStackError::Conflict(format!("Port {} is already a trunk parent", opts.port_id)));
    }
    let trunk = Trunk {
        id: state.next_id(),
        name: opts.name.clone(),
        port_id: opts.port_id.clone(),
        sub_ports: vec![],
        status: "DOWN".to_string(),
        tags: vec![],
    };
    state.trunks.insert(trunk.id.clone(), trunk.clone());
    Ok(trunk)
}

pub fn delete_trunk(client: &MockOpenStackClient, id: &str) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::DeleteTrunk, id)?;
    let trunk = state
        .trunks
        .get(id)
        .ok_or_else(|| OpenStackError::NotFound(format!("Trunk {} not found", id)))?;
    if !trunk.sub_ports.is_empty() {
        return Err(OpenStackError::Conflict(format!("Trunk {} still has subports", id)));
    }
    state.trunks.remove(id);
    Ok(())
}

pub fn list_trunk_subports(client: &MockOpenStackClient, trunk_id: &str) -> Result<Vec<Subport>, OpenStackError> {
    let state = client.begin(Operation::ListTrunkSubports, trunk_id)?;
    state
        .trunks
        .get(trunk_id)
        .map(|t| t.sub_ports.clone())
        .ok_or_else(|| OpenStackError::NotFound(format!("Trunk {} not found", trunk_id)))
}

pub fn remove_subports(client: &MockOpenStackClient, trunk_id: &str, port_ids: &[String]) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::RemoveSubports, trunk_id)?;
    let trunk = state
        .trunks
        .get_mut(trunk_id)
        .ok_or_else(|| OpenStackError::NotFound(format!("Trunk {} not found", trunk_id)))?;
    trunk.sub_ports.retain(|s| !port_ids.contains(&s.port_id));
    Ok(())
}

pub fn list_security_groups(
    client: &MockOpenStackClient,
    filter: &SecurityGroupFilter,
) -> Result<Vec<SecurityGroup>, OpenStackError> {
    let state = client.begin(Operation::ListSecurityGroups, filter.name.clone().unwrap_or_default())?;
    Ok(state
        .security_groups
        .values()
        .filter(|g| {
            matches(filter.id.as_ref(), &g.id)
                && matches(filter.name.as_ref(), &g.name)
                && has_tags(&g.tags, &filter.tags)
        })
        .cloned()
        .collect())
}

pub fn get_security_group(client: &MockOpenStackClient, id: &str) -> Result<SecurityGroup, OpenStackError> {
    let state = client.begin(Operation::GetSecurityGroup, id)?;
    state
        .security_groups
        .get(id)
        .cloned()
        .ok_or_else(|| OpenStackError::NotFound(format!("Security group {} not found", id)))
}

pub fn create_security_group(
    client: &MockOpenStackClient,
    opts: &CreateSecurityGroupOpts,
) -> Result<SecurityGroup, OpenStackError> {
    let mut state = client.begin(Operation::CreateSecurityGroup, &opts.name)?;
    let id = state.next_id();
    // Neutron seeds every new group with allow-all egress rules
    let mut rules = Vec::new();
    for ethertype in [EtherType::Ipv4, EtherType::Ipv6] {
        let rule_id = state.next_id();
        rules.push(SecurityGroupRule {
            id: rule_id,
            security_group_id: id.clone(),
            direction: RuleDirection::Egress,
            ethertype,
            protocol: None,
            port_range_min: None,
            port_range_max: None,
            remote_group_id: None,
            remote_ip_prefix: None,
            description: None,
        });
    }
    let group = SecurityGroup {
        id,
        name: opts.name.clone(),
        description: opts.description.clone().unwrap_or_default(),
        rules,
        tags: vec![],
    };
    state.security_groups.insert(group.id.clone(), group.clone());
    Ok(group)
}

pub fn delete_security_group(client: &MockOpenStackClient, id: &str) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::DeleteSecurityGroup, id)?;
    if !state.security_groups.contains_key(id) {
        return Err(OpenStackError::NotFound(format!("Security group {} not found", id)));
    }
    if state.ports.values().any(|p| p.security_groups.iter().any(|g| g == id)) {
        return Err(OpenStackError::Conflict(format!("Security group {} in use", id)));
    }
    state.security_groups.remove(id);
    // Rules of other groups that point at this one go with it
    for group in state.security_groups.values_mut() {
        group.rules.retain(|r| r.remote_group_id.as_deref() != Some(id));
    }
    Ok(())
}

pub(crate) fn rule_from_opts(id: String, opts: &CreateSecurityGroupRuleOpts) -> SecurityGroupRule {
    SecurityGroupRule {
        id,
        security_group_id: opts.security_group_id.clone(),
        direction: opts.direction,
        ethertype: opts.ethertype,
        protocol: opts.protocol.clone(),
        port_range_min: opts.port_range_min,
        port_range_max: opts.port_range_max,
        remote_group_id: opts.remote_group_id.clone(),
        remote_ip_prefix: opts.remote_ip_prefix.clone(),
        description: opts.description.clone(),
    }
}

fn same_rule(rule: &SecurityGroupRule, opts: &CreateSecurityGroupRuleOpts) -> bool {
    rule.direction == opts.direction
        && rule.ethertype == opts.ethertype
        && rule.protocol == opts.protocol
        && rule.port_range_min == opts.port_range_min
        && rule.port_range_max == opts.port_range_max
        && rule.remote_group_id == opts.remote_group_id
        && rule.remote_ip_prefix == opts.remote_ip_prefix
}

pub fn create_security_group_rule(
    client: &MockOpenStackClient,
    opts: &CreateSecurityGroupRuleOpts,
) -> Result<SecurityGroupRule, OpenStackError> {
    let mut state = client.begin(Operation::CreateSecurityGroupRule, &opts.security_group_id)?;
    if let Some(remote) = &opts.remote_group_id {
        if !state.security_groups.contains_key(remote) {
            return Err(OpenStackError::NotFound(format!("Security group {} not found", remote)));
        }
    }
    let id = state.next_id();
    let group = state
        .security_groups
        .get_mut(&opts.security_group_id)
        .ok_or_else(|| OpenStackError::NotFound(format!("Security group {} not found", opts.security_group_id)))?;
    if group.rules.iter().any(|r| same_rule(r, opts)) {
        return Err(OpenStackError::Conflict("Security group rule already exists".to_string()));
    }
    let rule = rule_from_opts(id, opts);
    group.rules.push(rule.clone());
    Ok(rule)
}

pub fn delete_security_group_rule(client: &MockOpenStackClient, id: &str) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::DeleteSecurityGroupRule, id)?;
    for group in state.security_groups.values_mut() {
        if let Some(index) = group.rules.iter().position(|r| r.id == id) {
            group.rules.remove(index);
            return Ok(());
        }
    }
    Err(OpenStackError::NotFound(format!("Security group rule {} not found", id)))
}

pub fn list_floating_ips(
    client: &MockOpenStackClient,
    filter: &FloatingIpFilter,
) -> Result<Vec<FloatingIp>, OpenStackError> {
    let target = filter.floating_ip_address.clone().unwrap_or_default();
    let state = client.begin(Operation::ListFloatingIps, target)?;
    Ok(state
        .floating_ips
        .values()
        .filter(|f| {
            matches(filter.floating_ip_address.as_ref(), &f.floating_ip_address)
                && filter.port_id.as_ref().is_none_or(|p| f.port_id.as_ref() == Some(p))
        })
        .cloned()
        .collect())
}

fn bind_floating_ip(state: &MockState, fip: &mut FloatingIp, port_id: Option<&str>) -> Result<(), OpenStackError> {
    match port_id {
        Some(port_id) => {
            let port = state
                .ports
                .get(port_id)
                .ok_or_else(|| OpenStackError::NotFound(format!("Port {} not found", port_id)))?;
            fip.port_id = Some(port.id.clone());
            fip.fixed_ip_address = port.fixed_ips.first().map(|ip| ip.ip_address.clone());
            fip.status = "ACTIVE".to_string();
        }
        None => {
            fip.port_id = None;
            fip.fixed_ip_address = None;
            fip.status = "DOWN".to_string();
        }
    }
    Ok(())
}

pub fn create_floating_ip(
    client: &MockOpenStackClient,
    opts: &CreateFloatingIpOpts,
) -> Result<FloatingIp, OpenStackError> {
    let target = opts.floating_ip_address.clone().unwrap_or_default();
    let mut state = client.begin(Operation::CreateFloatingIp, target)?;
    let network = state
        .networks
        .get(&opts.floating_network_id)
        .cloned()
        .ok_or_else(|| OpenStackError::NotFound(format!("Network {} not found", opts.floating_network_id)))?;
    if !network.external {
        return Err(OpenStackError::InvalidRequest(format!(
            "network {} is not external",
            network.id
        )));
    }
    let address = match &opts.floating_ip_address {
        Some(address) => {
            if state.floating_ips.values().any(|f| &f.floating_ip_address == address) {
                return Err(OpenStackError::Conflict(format!("IP address {} already allocated", address)));
            }
            address.clone()
        }
        None => match state.first_subnet_of(&network.id) {
            Some(subnet) => state.next_ip(&subnet),
            None => {
                let n = state.floating_ips.len() + 10;
                format!("172.24.4.{}", n)
            }
        },
    };
    let mut fip = FloatingIp {
        id: state.next_id(),
        floating_ip_address: address,
        floating_network_id: network.id,
        port_id: None,
        fixed_ip_address: None,
        status: "DOWN".to_string(),
        description: opts.description.clone().unwrap_or_default(),
    };
    bind_floating_ip(&state, &mut fip, opts.port_id.as_deref())?;
    state.floating_ips.insert(fip.id.clone(), fip.clone());
    Ok(fip)
}

pub fn associate_floating_ip(
    client: &MockOpenStackClient,
    id: &str,
    port_id: Option<&str>,
) -> Result<FloatingIp, OpenStackError> {
    let mut state = client.begin(Operation::AssociateFloatingIp, id)?;
    let mut fip = state
        .floating_ips
        .get(id)
        .cloned()
        .ok_or_else(|| OpenStackError::NotFound(format!("Floating IP {} not found", id)))?;
    if let (Some(current), Some(wanted)) = (fip.port_id.as_deref(), port_id) {
        if current != wanted {
            return Err(OpenStackError::Conflict(format!(
                "Floating IP {} is already associated with port {}",
                id, current
            )));
        }
    }
    bind_floating_ip(&state, &mut fip, port_id)?;
    state.floating_ips.insert(fip.id.clone(), fip.clone());
    Ok(fip)
}

pub fn delete_floating_ip(client: &MockOpenStackClient, id: &str) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::DeleteFloatingIp, id)?;
    state
        .floating_ips
        .remove(id)
        .map(|_| ())
        .ok_or_else(|| OpenStackError::NotFound(format!("Floating IP {} not found", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openstack_trait::OpenStackClientTrait;

    #[tokio::test]
    async fn test_port_gets_address_from_first_subnet() {
        let client = MockOpenStackClient::new();
        let net = client.add_network("net-1");
        let subnet = client.add_subnet(&net.id, "subnet-1", "10.6.0.0/24");
        let port = client
            .create_port(&CreatePortOpts {
                name: "m1-0".to_string(),
                network_id: net.id.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(port.fixed_ips, vec![FixedIp {
            subnet_id: subnet.id,
            ip_address: "10.6.0.10".to_string()
        }]);
    }

    #[tokio::test]
    async fn test_unset_security_groups_get_default_group() {
        let client = MockOpenStackClient::new();
        let net = client.add_network("net-1");
        let default = client.add_security_group("default");
        let base = CreatePortOpts {
            name: "p".to_string(),
            network_id: net.id.clone(),
            ..Default::default()
        };
        let unset = client.create_port(&base).await.unwrap();
        let empty = client
            .create_port(&CreatePortOpts {
                security_groups: Some(vec![]),
                ..base.clone()
            })
            .await
            .unwrap();
        assert_eq!(unset.security_groups, vec![default.id]);
        assert!(empty.security_groups.is_empty());
    }

    #[tokio::test]
    async fn test_fixed_ip_conflict() {
        let client = MockOpenStackClient::new();
        let net = client.add_network("net-1");
        client.add_subnet(&net.id, "subnet-1", "10.6.0.0/24");
        let opts = CreatePortOpts {
            name: "p".to_string(),
            network_id: net.id.clone(),
            fixed_ips: Some(vec![FixedIpOpts {
                subnet_id: None,
                ip_address: Some("10.6.0.50".to_string()),
            }]),
            ..Default::default()
        };
        client.create_port(&opts).await.unwrap();
        assert!(client.create_port(&opts).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_trunk_with_subports_cannot_be_deleted() {
        let client = MockOpenStackClient::new();
        let net = client.add_network("net-1");
        let parent = client.add_port("m1-0", &net.id);
        let child = client.add_port("child", &net.id);
        let trunk = client
            .create_trunk(&CreateTrunkOpts {
                name: "m1-0".to_string(),
                port_id: parent.id.clone(),
                description: None,
            })
            .await
            .unwrap();
        client.add_subport(&trunk.id, &child.id, 101);

        assert!(client.delete_trunk(&trunk.id).await.unwrap_err().is_conflict());
        assert!(client.delete_port(&parent.id).await.unwrap_err().is_conflict());

        client.remove_subports(&trunk.id, &[child.id]).await.unwrap();
        client.delete_trunk(&trunk.id).await.unwrap();
        client.delete_port(&parent.id).await.unwrap();
    }

    #[tokio::test]
    async fn test_new_security_group_has_egress_rules_and_rejects_duplicates() {
        let client = MockOpenStackClient::new();
        let group = client
            .create_security_group(&CreateSecurityGroupOpts {
                name: "k8s-worker".to_string(),
                description: None,
            })
            .await
            .unwrap();
        assert_eq!(group.rules.len(), 2);

        let rule = CreateSecurityGroupRuleOpts {
            security_group_id: group.id.clone(),
            direction: RuleDirection::Ingress,
            ethertype: EtherType::Ipv4,
            protocol: Some("tcp".to_string()),
            port_range_min: Some(10250),
            port_range_max: Some(10250),
            remote_group_id: None,
            remote_ip_prefix: None,
            description: Some("kubelet".to_string()),
        };
        client.create_security_group_rule(&rule).await.unwrap();
        assert!(client.create_security_group_rule(&rule).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn test_floating_ip_requires_external_network() {
        let client = MockOpenStackClient::new();
        let internal = client.add_network("private");
        let external = client.add_external_network("public");
        let opts = CreateFloatingIpOpts {
            floating_network_id: internal.id,
            ..Default::default()
        };
        assert!(client.create_floating_ip(&opts).await.is_err());

        let fip = client
            .create_floating_ip(&CreateFloatingIpOpts {
                floating_network_id: external.id,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(fip.floating_ip_address, "172.24.4.10");
        assert!(fip.port_id.is_none());
    }
}
