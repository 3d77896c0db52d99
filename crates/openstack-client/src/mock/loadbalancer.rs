//! Load balancer operations for MockOpenStackClient
//!
//! Octavia rejects changes to a load balancer (or any of its children) while
//! the load balancer is not ACTIVE; every accepted change puts it back into
//! PENDING_UPDATE until the next `advance()`.

use super::{matches, MemberRecord, MockOpenStackClient, MockState, Operation};
use crate::error::OpenStackError;
use crate::models::*;

fn lb_of_listener(state: &MockState, listener_id: &str) -> Result<String, OpenStackError> {
    let listener = state
        .listeners
        .get(listener_id)
        .ok_or_else(|| OpenStackError::NotFound(format!("Listener {} not found", listener_id)))?;
    listener
        .loadbalancers
        .first()
        .map(|lb| lb.id.clone())
        .ok_or_else(|| OpenStackError::Internal(format!("listener {} has no load balancer", listener_id)))
}

fn lb_of_pool(state: &MockState, pool_id: &str) -> Result<String, OpenStackError> {
    let pool = state
        .pools
        .get(pool_id)
        .ok_or_else(|| OpenStackError::NotFound(format!("Pool {} not found", pool_id)))?;
    pool.loadbalancers
        .first()
        .map(|lb| lb.id.clone())
        .ok_or_else(|| OpenStackError::Internal(format!("pool {} has no load balancer", pool_id)))
}

/// Fail unless the load balancer accepts changes, then mark it updating
fn begin_update(state: &mut MockState, lb_id: &str) -> Result<(), OpenStackError> {
    let lb = state
        .load_balancers
        .get_mut(lb_id)
        .ok_or_else(|| OpenStackError::NotFound(format!("Load balancer {} not found", lb_id)))?;
    if lb.provisioning_status != ProvisioningStatus::Active {
        return Err(OpenStackError::Conflict(format!(
            "Load Balancer {} is immutable and cannot be updated",
            lb_id
        )));
    }
    lb.provisioning_status = ProvisioningStatus::PendingUpdate;
    Ok(())
}

pub fn list_load_balancers(
    client: &MockOpenStackClient,
    filter: &LoadBalancerFilter,
) -> Result<Vec<LoadBalancer>, OpenStackError> {
    let state = client.begin(Operation::ListLoadBalancers, filter.name.clone().unwrap_or_default())?;
    Ok(state
        .load_balancers
        .values()
        .filter(|lb| matches(filter.name.as_ref(), &lb.name))
        .cloned()
        .collect())
}

pub fn get_load_balancer(client: &MockOpenStackClient, id: &str) -> Result<LoadBalancer, OpenStackError> {
    let state = client.begin(Operation::GetLoadBalancer, id)?;
    state
        .load_balancers
        .get(id)
        .cloned()
        .ok_or_else(|| OpenStackError::NotFound(format!("Load balancer {} not found", id)))
}

pub fn create_load_balancer(
    client: &MockOpenStackClient,
    opts: &CreateLoadBalancerOpts,
) -> Result<LoadBalancer, OpenStackError> {
    let mut state = client.begin(Operation::CreateLoadBalancer, &opts.name)?;
    let subnet = state
        .subnets
        .get(&opts.vip_subnet_id)
        .cloned()
        .ok_or_else(|| OpenStackError::InvalidRequest(format!("Subnet {} could not be found", opts.vip_subnet_id)))?;
    let vip_address = state.next_ip(&subnet);
    let lb = LoadBalancer {
        id: state.next_id(),
        name: opts.name.clone(),
        vip_address,
        vip_port_id: state.next_id(),
        vip_subnet_id: subnet.id,
        provisioning_status: ProvisioningStatus::PendingCreate,
        operating_status: "OFFLINE".to_string(),
        provider: opts.provider.clone().unwrap_or_else(|| "amphora".to_string()),
        listeners: vec![],
        pools: vec![],
        tags: opts.tags.clone(),
    };
    state.load_balancers.insert(lb.id.clone(), lb.clone());
    Ok(lb)
}

pub fn delete_load_balancer(client: &MockOpenStackClient, id: &str, cascade: bool) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::DeleteLoadBalancer, id)?;
    let lb = state
        .load_balancers
        .get_mut(id)
        .ok_or_else(|| OpenStackError::NotFound(format!("Load balancer {} not found", id)))?;
    if lb.provisioning_status.is_pending() {
        return Err(OpenStackError::Conflict(format!(
            "Load Balancer {} is immutable and cannot be updated",
            id
        )));
    }
    if !cascade && (!lb.listeners.is_empty() || !lb.pools.is_empty()) {
        return Err(OpenStackError::InvalidRequest(format!(
            "Cannot delete Load Balancer {} - it has children",
            id
        )));
    }
    lb.provisioning_status = ProvisioningStatus::PendingDelete;
    Ok(())
}

pub fn list_listeners(client: &MockOpenStackClient, filter: &ListenerFilter) -> Result<Vec<Listener>, OpenStackError> {
    let state = client.begin(Operation::ListListeners, filter.name.clone().unwrap_or_default())?;
    Ok(state
        .listeners
        .values()
        .filter(|l| {
            matches(filter.name.as_ref(), &l.name)
                && filter
                    .loadbalancer_id
                    .as_ref()
                    .is_none_or(|lb| l.loadbalancers.iter().any(|r| &r.id == lb))
        })
        .cloned()
        .collect())
}

pub fn create_listener(client: &MockOpenStackClient, opts: &CreateListenerOpts) -> Result<Listener, OpenStackError> {
    let mut state = client.begin(Operation::CreateListener, &opts.name)?;
    let duplicate = state.listeners.values().any(|l| {
        l.protocol_port == opts.protocol_port && l.loadbalancers.iter().any(|r| r.id == opts.loadbalancer_id)
    });
    if duplicate {
        return Err(OpenStackError::Conflict(format!(
            "Another Listener on this Load Balancer is already using protocol_port {}",
            opts.protocol_port
        )));
    }
    begin_update(&mut state, &opts.loadbalancer_id)?;
    let listener = Listener {
        id: state.next_id(),
        name: opts.name.clone(),
        protocol: opts.protocol.clone(),
        protocol_port: opts.protocol_port,
        loadbalancers: vec![IdRef {
            id: opts.loadbalancer_id.clone(),
        }],
        default_pool_id: None,
        allowed_cidrs: if opts.allowed_cidrs.is_empty() {
            None
        } else {
            Some(opts.allowed_cidrs.clone())
        },
        provisioning_status: ProvisioningStatus::PendingCreate,
    };
    if let Some(lb) = state.load_balancers.get_mut(&opts.loadbalancer_id) {
        lb.listeners.push(IdRef { id: listener.id.clone() });
    }
    state.listeners.insert(listener.id.clone(), listener.clone());
    Ok(listener)
}

pub fn update_listener_allowed_cidrs(
    client: &MockOpenStackClient,
    id: &str,
    allowed_cidrs: &[String],
) -> Result<Listener, OpenStackError> {
    let mut state = client.begin(Operation::UpdateListener, id)?;
    let lb_id = lb_of_listener(&state, id)?;
    begin_update(&mut state, &lb_id)?;
    let listener = state
        .listeners
        .get_mut(id)
        .ok_or_else(|| OpenStackError::NotFound(format!("Listener {} not found", id)))?;
    listener.allowed_cidrs = if allowed_cidrs.is_empty() {
        None
    } else {
        Some(allowed_cidrs.to_vec())
    };
    listener.provisioning_status = ProvisioningStatus::PendingUpdate;
    Ok(listener.clone())
}

pub fn delete_listener(client: &MockOpenStackClient, id: &str) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::DeleteListener, id)?;
    let lb_id = lb_of_listener(&state, id)?;
    begin_update(&mut state, &lb_id)?;
    state.listeners.remove(id);
    if let Some(lb) = state.load_balancers.get_mut(&lb_id) {
        lb.listeners.retain(|r| r.id != id);
    }
    for pool in state.pools.values_mut() {
        pool.listeners.retain(|r| r.id != id);
    }
    Ok(())
}

pub fn list_pools(client: &MockOpenStackClient, filter: &PoolFilter) -> Result<Vec<Pool>, OpenStackError> {
    let state = client.begin(Operation::ListPools, filter.name.clone().unwrap_or_default())?;
    Ok(state
        .pools
        .values()
        .filter(|p| {
            matches(filter.name.as_ref(), &p.name)
                && filter
                    .loadbalancer_id
                    .as_ref()
                    .is_none_or(|lb| p.loadbalancers.iter().any(|r| &r.id == lb))
        })
        .cloned()
        .collect())
}

pub fn create_pool(client: &MockOpenStackClient, opts: &CreatePoolOpts) -> Result<Pool, OpenStackError> {
    let mut state = client.begin(Operation::CreatePool, &opts.name)?;
    let lb_id = lb_of_listener(&state, &opts.listener_id)?;
    if state
        .listeners
        .get(&opts.listener_id)
        .is_some_and(|l| l.default_pool_id.is_some())
    {
        return Err(OpenStackError::Conflict(format!(
            "Listener {} already has a default pool",
            opts.listener_id
        )));
    }
    begin_update(&mut state, &lb_id)?;
    let pool = Pool {
        id: state.next_id(),
        name: opts.name.clone(),
        protocol: opts.protocol.clone(),
        lb_algorithm: opts.lb_algorithm.clone(),
        listeners: vec![IdRef {
            id: opts.listener_id.clone(),
        }],
        loadbalancers: vec![IdRef { id: lb_id.clone() }],
        members: vec![],
        healthmonitor_id: None,
        provisioning_status: ProvisioningStatus::PendingCreate,
    };
    if let Some(listener) = state.listeners.get_mut(&opts.listener_id) {
        listener.default_pool_id = Some(pool.id.clone());
    }
    if let Some(lb) = state.load_balancers.get_mut(&lb_id) {
        lb.pools.push(IdRef { id: pool.id.clone() });
    }
    state.pools.insert(pool.id.clone(), pool.clone());
    Ok(pool)
}

pub fn delete_pool(client: &MockOpenStackClient, id: &str) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::DeletePool, id)?;
    let lb_id = lb_of_pool(&state, id)?;
    begin_update(&mut state, &lb_id)?;
    state.pools.remove(id);
    // Members and the health monitor go with the pool
    state.members.retain(|_, record| record.pool_id != id);
    state.monitors.retain(|_, monitor| !monitor.pools.iter().any(|r| r.id == id));
    for listener in state.listeners.values_mut() {
        if listener.default_pool_id.as_deref() == Some(id) {
            listener.default_pool_id = None;
        }
    }
    if let Some(lb) = state.load_balancers.get_mut(&lb_id) {
        lb.pools.retain(|r| r.id != id);
    }
    Ok(())
}

pub fn list_members(
    client: &MockOpenStackClient,
    pool_id: &str,
    filter: &MemberFilter,
) -> Result<Vec<Member>, OpenStackError> {
    let state = client.begin(Operation::ListMembers, pool_id)?;
    if !state.pools.contains_key(pool_id) {
        return Err(OpenStackError::NotFound(format!("Pool {} not found", pool_id)));
    }
    Ok(state
        .members
        .values()
        .filter(|r| r.pool_id == pool_id)
        .map(|r| &r.member)
        .filter(|m| matches(filter.name.as_ref(), &m.name) && matches(filter.address.as_ref(), &m.address))
        .cloned()
        .collect())
}

pub fn create_member(
    client: &MockOpenStackClient,
    pool_id: &str,
    opts: &CreateMemberOpts,
) -> Result<Member, OpenStackError> {
    let mut state = client.begin(Operation::CreateMember, &opts.name)?;
    let lb_id = lb_of_pool(&state, pool_id)?;
    let duplicate = state.members.values().any(|r| {
        r.pool_id == pool_id && r.member.address == opts.address && r.member.protocol_port == opts.protocol_port
    });
    if duplicate {
        return Err(OpenStackError::Conflict(format!(
            "Another member on this pool is already using ip {} on protocol_port {}",
            opts.address, opts.protocol_port
        )));
    }
    begin_update(&mut state, &lb_id)?;
    let member = Member {
        id: state.next_id(),
        name: opts.name.clone(),
        address: opts.address.clone(),
        protocol_port: opts.protocol_port,
        subnet_id: opts.subnet_id.clone(),
        provisioning_status: ProvisioningStatus::PendingCreate,
    };
    if let Some(pool) = state.pools.get_mut(pool_id) {
        pool.members.push(IdRef { id: member.id.clone() });
    }
    state.members.insert(
        member.id.clone(),
        MemberRecord {
            pool_id: pool_id.to_string(),
            member: member.clone(),
        },
    );
    Ok(member)
}

pub fn delete_member(client: &MockOpenStackClient, pool_id: &str, member_id: &str) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::DeleteMember, member_id)?;
    let lb_id = lb_of_pool(&state, pool_id)?;
    if !state.members.get(member_id).is_some_and(|r| r.pool_id == pool_id) {
        return Err(OpenStackError::NotFound(format!("Member {} not found", member_id)));
    }
    begin_update(&mut state, &lb_id)?;
    state.members.remove(member_id);
    if let Some(pool) = state.pools.get_mut(pool_id) {
        pool.members.retain(|r| r.id != member_id);
    }
    Ok(())
}

pub fn list_monitors(client: &MockOpenStackClient, filter: &MonitorFilter) -> Result<Vec<Monitor>, OpenStackError> {
    let state = client.begin(Operation::ListMonitors, filter.name.clone().unwrap_or_default())?;
    Ok(state
        .monitors
        .values()
        .filter(|m| {
            matches(filter.name.as_ref(), &m.name)
                && filter
                    .pool_id
                    .as_ref()
                    .is_none_or(|p| m.pools.iter().any(|r| &r.id == p))
        })
        .cloned()
        .collect())
}

pub fn create_monitor(client: &MockOpenStackClient, opts: &CreateMonitorOpts) -> Result<Monitor, OpenStackError> {
    let mut state = client.begin(Operation::CreateMonitor, &opts.name)?;
    let lb_id = lb_of_pool(&state, &opts.pool_id)?;
    if state
        .pools
        .get(&opts.pool_id)
        .is_some_and(|p| p.healthmonitor_id.is_some())
    {
        return Err(OpenStackError::Conflict(format!(
            "Pool {} already has a health monitor",
            opts.pool_id
        )));
    }
    begin_update(&mut state, &lb_id)?;
    let monitor = Monitor {
        id: state.next_id(),
        name: opts.name.clone(),
        monitor_type: opts.monitor_type.clone(),
        delay: opts.delay,
        timeout: opts.timeout,
        max_retries: opts.max_retries,
        max_retries_down: opts.max_retries_down,
        pools: vec![IdRef {
            id: opts.pool_id.clone(),
        }],
        provisioning_status: ProvisioningStatus::PendingCreate,
    };
    if let Some(pool) = state.pools.get_mut(&opts.pool_id) {
        pool.healthmonitor_id = Some(monitor.id.clone());
    }
    state.monitors.insert(monitor.id.clone(), monitor.clone());
    Ok(monitor)
}

pub fn delete_monitor(client: &MockOpenStackClient, id: &str) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::DeleteMonitor, id)?;
    let pool_id = state
        .monitors
        .get(id)
        .and_then(|m| m.pools.first())
        .map(|r| r.id.clone())
        .ok_or_else(|| OpenStackError::NotFound(format!("Health monitor {} not found", id)))?;
    let lb_id = lb_of_pool(&state, &pool_id)?;
    begin_update(&mut state, &lb_id)?;
    state.monitors.remove(id);
    if let Some(pool) = state.pools.get_mut(&pool_id) {
        pool.healthmonitor_id = None;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openstack_trait::OpenStackClientTrait;

    async fn active_lb(client: &MockOpenStackClient) -> LoadBalancer {
        let net = client.add_network("net-1");
        let subnet = client.add_subnet(&net.id, "subnet-1", "10.6.0.0/24");
        let lb = client
            .create_load_balancer(&CreateLoadBalancerOpts {
                name: "kubeapi".to_string(),
                vip_subnet_id: subnet.id,
                ..Default::default()
            })
            .await
            .unwrap();
        client.advance().unwrap();
        lb
    }

    fn listener_opts(lb: &LoadBalancer) -> CreateListenerOpts {
        CreateListenerOpts {
            name: "kubeapi-6443".to_string(),
            loadbalancer_id: lb.id.clone(),
            protocol: "TCP".to_string(),
            protocol_port: 6443,
            allowed_cidrs: vec![],
        }
    }

    #[tokio::test]
    async fn test_load_balancer_is_immutable_while_pending() {
        let client = MockOpenStackClient::new();
        let lb = active_lb(&client).await;

        let listener = client.create_listener(&listener_opts(&lb)).await.unwrap();
        let pool_opts = CreatePoolOpts {
            name: "kubeapi-6443".to_string(),
            listener_id: listener.id.clone(),
            protocol: "TCP".to_string(),
            lb_algorithm: "ROUND_ROBIN".to_string(),
        };
        assert!(client.create_pool(&pool_opts).await.unwrap_err().is_conflict());

        client.advance().unwrap();
        client.create_pool(&pool_opts).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_without_cascade_refuses_children() {
        let client = MockOpenStackClient::new();
        let lb = active_lb(&client).await;
        client.create_listener(&listener_opts(&lb)).await.unwrap();
        client.advance().unwrap();

        assert!(matches!(
            client.delete_load_balancer(&lb.id, false).await,
            Err(OpenStackError::InvalidRequest(_))
        ));
        client.delete_load_balancer(&lb.id, true).await.unwrap();
        assert!(client.get_load_balancer(&lb.id).await.is_ok());

        client.advance().unwrap();
        assert!(client.get_load_balancer(&lb.id).await.unwrap_err().is_not_found());
        assert!(client.listeners().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_member_conflicts() {
        let client = MockOpenStackClient::new();
        let lb = active_lb(&client).await;
        let listener = client.create_listener(&listener_opts(&lb)).await.unwrap();
        client.advance().unwrap();
        let pool = client
            .create_pool(&CreatePoolOpts {
                name: "kubeapi-6443".to_string(),
                listener_id: listener.id,
                protocol: "TCP".to_string(),
                lb_algorithm: "ROUND_ROBIN".to_string(),
            })
            .await
            .unwrap();
        client.advance().unwrap();

        let member = CreateMemberOpts {
            name: "m1".to_string(),
            address: "10.6.0.20".to_string(),
            protocol_port: 6443,
            subnet_id: None,
        };
        let created = client.create_member(&pool.id, &member).await.unwrap();
        client.advance().unwrap();
        assert!(client.create_member(&pool.id, &member).await.unwrap_err().is_conflict());

        client.delete_member(&pool.id, &created.id).await.unwrap();
        client.advance().unwrap();
        assert!(client.delete_member(&pool.id, &created.id).await.unwrap_err().is_not_found());
    }
}
