//! API server load balancer
//!
//! One Octavia load balancer per cluster with a TCP listener, a
//! round-robin pool and a TCP health monitor for the API server port and
//! every additional port. Octavia refuses changes while the load balancer
//! is PENDING_*, so each reconcile makes at most one change and requeues.

pub mod member;

use crate::error::ControllerError;
use crate::services::{at_most_one, ClusterContext, ReconcileOutcome, LOAD_BALANCER_POLL_INTERVAL};
use crds::{ApiServerLoadBalancer, LoadBalancerPortStatus, LoadBalancerStatus};
use openstack_client::{
    CreateListenerOpts, CreateLoadBalancerOpts, CreateMonitorOpts, CreatePoolOpts, LoadBalancer, LoadBalancerFilter,
    ListenerFilter, MonitorFilter, OpenStackClientTrait, PoolFilter, ProvisioningStatus,
};
use tracing::{debug, info, warn};

const PROTOCOL: &str = "TCP";
const LB_ALGORITHM: &str = "ROUND_ROBIN";
const MONITOR_DELAY: u32 = 10;
const MONITOR_TIMEOUT: u32 = 5;
const MONITOR_MAX_RETRIES: u32 = 5;
const MONITOR_MAX_RETRIES_DOWN: u32 = 3;

pub fn load_balancer_name(cluster: &ClusterContext) -> String {
    format!("k8s-clusterapi-cluster-{}-{}-kubeapi", cluster.namespace, cluster.name)
}

/// Name shared by the listener, pool and monitor of one port
pub fn port_resource_name(lb_name: &str, port: u16) -> String {
    format!("{lb_name}-{port}")
}

/// API server port first, then additional ports, without duplicates
pub fn forwarded_ports(spec: &ApiServerLoadBalancer, api_server_port: u16) -> Vec<u16> {
    let mut ports = vec![api_server_port];
    for port in &spec.additional_ports {
        if !ports.contains(port) {
            ports.push(*port);
        }
    }
    ports
}

async fn find_load_balancer(
    client: &dyn OpenStackClientTrait,
    name: &str,
) -> Result<Option<LoadBalancer>, ControllerError> {
    let lbs = client
        .list_load_balancers(&LoadBalancerFilter {
            name: Some(name.to_string()),
        })
        .await?
        .into_iter()
        .filter(|lb| lb.name == name)
        .collect();
    at_most_one(lbs, "load balancer", name)
}

/// The recorded load balancer, or the one carrying our name
async fn current_load_balancer(
    client: &dyn OpenStackClientTrait,
    name: &str,
    status: &Option<LoadBalancerStatus>,
) -> Result<Option<LoadBalancer>, ControllerError> {
    if let Some(recorded) = status.as_ref().filter(|s| !s.id.is_empty()) {
        match client.get_load_balancer(&recorded.id).await {
            Ok(lb) => return Ok(Some(lb)),
            Err(e) if e.is_not_found() => {
                warn!("Load balancer {} ({}) is gone, looking it up by name", recorded.name, recorded.id);
            }
            Err(e) => return Err(e.into()),
        }
    }
    find_load_balancer(client, name).await
}

/// Drive the load balancer and its per-port listeners, pools and monitors
pub async fn reconcile_load_balancer(
    client: &dyn OpenStackClientTrait,
    cluster: &ClusterContext,
    spec: &ApiServerLoadBalancer,
    api_server_port: u16,
    status: &mut Option<LoadBalancerStatus>,
) -> Result<ReconcileOutcome, ControllerError> {
    let name = load_balancer_name(cluster);
    let lb = match current_load_balancer(client, &name, status).await? {
        Some(lb) => lb,
        None => {
            let lb = create_load_balancer(client, cluster, spec, &name).await?;
            *status = Some(LoadBalancerStatus {
                id: lb.id,
                name: lb.name,
                ip: lb.vip_address,
                ports: vec![],
                allowed_cidrs: vec![],
            });
            return Ok(ReconcileOutcome::Requeue(LOAD_BALANCER_POLL_INTERVAL));
        }
    };

    let recorded = status.get_or_insert_with(LoadBalancerStatus::default);
    if recorded.id != lb.id {
        recorded.ports.clear();
    }
    recorded.id = lb.id.clone();
    recorded.name = lb.name.clone();
    recorded.ip = lb.vip_address.clone();

    match lb.provisioning_status {
        ProvisioningStatus::Active => {}
        ProvisioningStatus::Error => {
            return Err(ControllerError::ResourceFailed(format!(
                "load balancer {} ({}) is in ERROR",
                lb.name, lb.id
            )));
        }
        ProvisioningStatus::Deleted => {
            return Err(ControllerError::ResourceFailed(format!(
                "load balancer {} ({}) was deleted",
                lb.name, lb.id
            )));
        }
        pending => {
            debug!("Load balancer {} is {:?}", lb.id, pending);
            return Ok(ReconcileOutcome::Requeue(LOAD_BALANCER_POLL_INTERVAL));
        }
    }

    let mut allowed_cidrs = spec.allowed_cidrs.clone();
    allowed_cidrs.sort();
    allowed_cidrs.dedup();

    for port in forwarded_ports(spec, api_server_port) {
        match reconcile_port(client, &lb, port, &allowed_cidrs).await? {
            Some(port_status) => {
                recorded.ports.retain(|p| p.port != port);
                recorded.ports.push(port_status);
            }
            None => return Ok(ReconcileOutcome::Requeue(LOAD_BALANCER_POLL_INTERVAL)),
        }
    }
    recorded.allowed_cidrs = allowed_cidrs;
    Ok(ReconcileOutcome::Ready)
}

async fn create_load_balancer(
    client: &dyn OpenStackClientTrait,
    cluster: &ClusterContext,
    spec: &ApiServerLoadBalancer,
    name: &str,
) -> Result<LoadBalancer, ControllerError> {
    let subnet = cluster
        .network
        .as_ref()
        .and_then(|n| n.subnets.first())
        .ok_or_else(|| ControllerError::DependencyNotReady("cluster network has no subnet yet".to_string()))?;
    let mut tags = vec![cluster.ownership_tag()];
    tags.extend(cluster.tags.iter().cloned());
    let lb = client
        .create_load_balancer(&CreateLoadBalancerOpts {
            name: name.to_string(),
            vip_subnet_id: subnet.id.clone(),
            provider: spec.provider.clone(),
            flavor_id: spec.flavor.clone(),
            description: Some(format!(
                "Kubernetes API server for cluster {}/{}",
                cluster.namespace, cluster.name
            )),
            tags,
        })
        .await?;
    info!("Created load balancer {} ({}) with VIP {}", lb.name, lb.id, lb.vip_address);
    Ok(lb)
}

/// Listener, pool and monitor for one port
///
/// `None` means a change was submitted and the load balancer is busy.
async fn reconcile_port(
    client: &dyn OpenStackClientTrait,
    lb: &LoadBalancer,
    port: u16,
    allowed_cidrs: &[String],
) -> Result<Option<LoadBalancerPortStatus>, ControllerError> {
    let name = port_resource_name(&lb.name, port);

    let listeners = client
        .list_listeners(&ListenerFilter {
            name: Some(name.clone()),
            loadbalancer_id: Some(lb.id.clone()),
        })
        .await?
        .into_iter()
        .filter(|l| l.name == name)
        .collect();
    let Some(listener) = at_most_one(listeners, "listener", &name)? else {
        let listener = client
            .create_listener(&CreateListenerOpts {
                name: name.clone(),
                loadbalancer_id: lb.id.clone(),
                protocol: PROTOCOL.to_string(),
                protocol_port: port,
                allowed_cidrs: allowed_cidrs.to_vec(),
            })
            .await?;
        info!("Created listener {} ({}) on port {}", listener.name, listener.id, port);
        return Ok(None);
    };

    let mut current_cidrs = listener.allowed_cidrs.clone().unwrap_or_default();
    current_cidrs.sort();
    if current_cidrs != allowed_cidrs {
        client.update_listener_allowed_cidrs(&listener.id, allowed_cidrs).await?;
        info!("Updated allowed CIDRs of listener {} to {:?}", listener.name, allowed_cidrs);
        return Ok(None);
    }

    let pools = client
        .list_pools(&PoolFilter {
            name: Some(name.clone()),
            loadbalancer_id: Some(lb.id.clone()),
        })
        .await?
        .into_iter()
        .filter(|p| p.name == name)
        .collect();
    let Some(pool) = at_most_one(pools, "pool", &name)? else {
        let pool = client
            .create_pool(&CreatePoolOpts {
                name: name.clone(),
                listener_id: listener.id.clone(),
                protocol: PROTOCOL.to_string(),
                lb_algorithm: LB_ALGORITHM.to_string(),
            })
            .await?;
        info!("Created pool {} ({})", pool.name, pool.id);
        return Ok(None);
    };

    let monitors = client
        .list_monitors(&MonitorFilter {
            name: Some(name.clone()),
            pool_id: Some(pool.id.clone()),
        })
        .await?
        .into_iter()
        .filter(|m| m.name == name)
        .collect();
    let Some(monitor) = at_most_one(monitors, "health monitor", &name)? else {
        let monitor = client
            .create_monitor(&CreateMonitorOpts {
                name: name.clone(),
                pool_id: pool.id.clone(),
                monitor_type: PROTOCOL.to_string(),
                delay: MONITOR_DELAY,
                timeout: MONITOR_TIMEOUT,
                max_retries: MONITOR_MAX_RETRIES,
                max_retries_down: MONITOR_MAX_RETRIES_DOWN,
            })
            .await?;
        info!("Created health monitor {} ({})", monitor.name, monitor.id);
        return Ok(None);
    };

    Ok(Some(LoadBalancerPortStatus {
        port,
        listener_id: listener.id,
        pool_id: pool.id,
        monitor_id: Some(monitor.id),
    }))
}

/// Tear the load balancer down one child at a time
///
/// Monitors go first, then pools, then listeners, then the load balancer
/// itself without cascade.
pub async fn delete_load_balancer(
    client: &dyn OpenStackClientTrait,
    cluster: &ClusterContext,
    status: &mut Option<LoadBalancerStatus>,
) -> Result<ReconcileOutcome, ControllerError> {
    let name = load_balancer_name(cluster);
    let Some(lb) = current_load_balancer(client, &name, status).await? else {
        *status = None;
        return Ok(ReconcileOutcome::Ready);
    };
    if lb.provisioning_status.is_pending() {
        debug!("Load balancer {} is {:?}", lb.id, lb.provisioning_status);
        return Ok(ReconcileOutcome::Requeue(LOAD_BALANCER_POLL_INTERVAL));
    }

    let pools = client
        .list_pools(&PoolFilter {
            name: None,
            loadbalancer_id: Some(lb.id.clone()),
        })
        .await?;
    for pool in &pools {
        let monitors = client
            .list_monitors(&MonitorFilter {
                name: None,
                pool_id: Some(pool.id.clone()),
            })
            .await?;
        for monitor in monitors {
            if removed(client.delete_monitor(&monitor.id).await)? {
                info!("Deleted health monitor {} ({})", monitor.name, monitor.id);
                return Ok(ReconcileOutcome::Requeue(LOAD_BALANCER_POLL_INTERVAL));
            }
        }
    }
    for pool in pools {
        if removed(client.delete_pool(&pool.id).await)? {
            info!("Deleted pool {} ({})", pool.name, pool.id);
            return Ok(ReconcileOutcome::Requeue(LOAD_BALANCER_POLL_INTERVAL));
        }
    }

    let listeners = client
        .list_listeners(&ListenerFilter {
            name: None,
            loadbalancer_id: Some(lb.id.clone()),
        })
        .await?;
    for listener in listeners {
        if removed(client.delete_listener(&listener.id).await)? {
            info!("Deleted listener {} ({})", listener.name, listener.id);
            return Ok(ReconcileOutcome::Requeue(LOAD_BALANCER_POLL_INTERVAL));
        }
    }

    delete_load_balancer_checked(client, &lb.id, false).await?;
    info!("Deleting load balancer {} ({})", lb.name, lb.id);
    if let Some(recorded) = status.as_mut() {
        recorded.ports.clear();
    }
    Ok(ReconcileOutcome::Requeue(LOAD_BALANCER_POLL_INTERVAL))
}

/// Delete a load balancer, refusing when it still has children and
/// `cascade` is off
pub async fn delete_load_balancer_checked(
    client: &dyn OpenStackClientTrait,
    id: &str,
    cascade: bool,
) -> Result<(), ControllerError> {
    if !cascade {
        let lb = match client.get_load_balancer(id).await {
            Ok(lb) => lb,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if !lb.listeners.is_empty() || !lb.pools.is_empty() {
            return Err(ControllerError::HasAssociatedResources(format!(
                "load balancer {} still has {} listener(s) and {} pool(s)",
                id,
                lb.listeners.len(),
                lb.pools.len()
            )));
        }
    }
    match client.delete_load_balancer(id, cascade).await {
        Err(e) if e.is_not_found() => Ok(()),
        other => other.map_err(ControllerError::from),
    }
}

/// Whether a delete actually removed something
fn removed(result: Result<(), openstack_client::OpenStackError>) -> Result<bool, ControllerError> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use openstack_client::Operation;

    fn lb_spec() -> ApiServerLoadBalancer {
        ApiServerLoadBalancer {
            enabled: true,
            provider: None,
            flavor: None,
            additional_ports: vec![22, 6443],
            allowed_cidrs: vec!["10.0.0.0/8".to_string()],
        }
    }

    /// Reconcile, settling the load balancer between passes, until ready
    async fn converge(
        cloud: &TestCloud,
        cluster: &ClusterContext,
        spec: &ApiServerLoadBalancer,
        status: &mut Option<LoadBalancerStatus>,
    ) -> usize {
        for pass in 1..=20 {
            let outcome = reconcile_load_balancer(&cloud.mock, cluster, spec, 6443, status)
                .await
                .unwrap();
            if outcome.is_ready() {
                return pass;
            }
            cloud.mock.advance().unwrap();
        }
        panic!("load balancer did not converge");
    }

    #[test]
    fn test_forwarded_ports_dedup() {
        assert_eq!(forwarded_ports(&lb_spec(), 6443), vec![6443, 22]);
    }

    #[tokio::test]
    async fn test_builds_listener_pool_monitor_per_port() {
        let cloud = seed_cloud();
        let cluster = cluster_context(&cloud);
        let spec = lb_spec();
        let mut status = None;

        converge(&cloud, &cluster, &spec, &mut status).await;
        let status = status.unwrap();
        assert_eq!(status.name, "k8s-clusterapi-cluster-default-c1-kubeapi");
        assert_eq!(status.ports.iter().map(|p| p.port).collect::<Vec<_>>(), vec![6443, 22]);
        assert!(status.ports.iter().all(|p| p.monitor_id.is_some()));
        assert_eq!(status.allowed_cidrs, vec!["10.0.0.0/8".to_string()]);

        assert_eq!(cloud.mock.count(Operation::CreateLoadBalancer), 1);
        assert_eq!(cloud.mock.listeners().len(), 2);
        assert_eq!(cloud.mock.pools().len(), 2);
        let monitor = cloud.mock.monitors()[0].clone();
        assert_eq!((monitor.delay, monitor.timeout, monitor.max_retries), (10, 5, 5));
        let lb = cloud.mock.load_balancers()[0].clone();
        assert_eq!(lb.vip_subnet_id, cloud.subnet.id);
        assert!(lb.tags.contains(&cluster.ownership_tag()));
    }

    #[tokio::test]
    async fn test_finds_existing_load_balancer_before_creating() {
        let cloud = seed_cloud();
        let cluster = cluster_context(&cloud);
        let spec = lb_spec();
        let mut lost = None;
        converge(&cloud, &cluster, &spec, &mut lost).await;
        cloud.mock.clear_calls();

        // Status was never written back
        let mut status = None;
        let passes = converge(&cloud, &cluster, &spec, &mut status).await;
        assert_eq!(passes, 1);
        assert!(cloud.mock.mutating_calls().is_empty());
        assert_eq!(status, lost);
    }

    #[tokio::test]
    async fn test_allowed_cidrs_change_updates_listeners() {
        let cloud = seed_cloud();
        let cluster = cluster_context(&cloud);
        let mut spec = lb_spec();
        let mut status = None;
        converge(&cloud, &cluster, &spec, &mut status).await;
        cloud.mock.clear_calls();

        spec.allowed_cidrs = vec!["192.168.0.0/16".to_string(), "10.0.0.0/8".to_string()];
        converge(&cloud, &cluster, &spec, &mut status).await;
        assert_eq!(cloud.mock.count(Operation::UpdateListener), 2);
        assert_eq!(cloud.mock.mutating_calls().len(), 2);
        assert_eq!(status.unwrap().allowed_cidrs.len(), 2);
    }

    #[tokio::test]
    async fn test_error_state_is_terminal() {
        let cloud = seed_cloud();
        let cluster = cluster_context(&cloud);
        let mut status = None;
        reconcile_load_balancer(&cloud.mock, &cluster, &lb_spec(), 6443, &mut status)
            .await
            .unwrap();
        let id = status.as_ref().unwrap().id.clone();
        cloud.mock.set_load_balancer_status(&id, ProvisioningStatus::Error);
        let result = reconcile_load_balancer(&cloud.mock, &cluster, &lb_spec(), 6443, &mut status).await;
        assert!(matches!(result, Err(ControllerError::ResourceFailed(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_children_then_load_balancer() {
        let cloud = seed_cloud();
        let cluster = cluster_context(&cloud);
        let spec = lb_spec();
        let mut status = None;
        converge(&cloud, &cluster, &spec, &mut status).await;
        cloud.mock.clear_calls();

        for _ in 0..20 {
            let outcome = delete_load_balancer(&cloud.mock, &cluster, &mut status).await.unwrap();
            if outcome.is_ready() {
                break;
            }
            cloud.mock.advance().unwrap();
        }
        assert!(status.is_none());
        assert!(cloud.mock.load_balancers().is_empty());
        let ops = cloud.mock.mutating_operations();
        assert_eq!(ops.last(), Some(&Operation::DeleteLoadBalancer));
        let first_pool = ops.iter().position(|o| *o == Operation::DeletePool).unwrap();
        let last_monitor = ops.iter().rposition(|o| *o == Operation::DeleteMonitor).unwrap();
        let first_listener = ops.iter().position(|o| *o == Operation::DeleteListener).unwrap();
        assert!(last_monitor < first_pool);
        assert!(first_pool < first_listener);
    }

    #[tokio::test]
    async fn test_delete_without_cascade_refuses_children() {
        let cloud = seed_cloud();
        let cluster = cluster_context(&cloud);
        let mut status = None;
        converge(&cloud, &cluster, &lb_spec(), &mut status).await;
        cloud.mock.clear_calls();

        let id = status.unwrap().id;
        let result = delete_load_balancer_checked(&cloud.mock, &id, false).await;
        assert!(matches!(result, Err(ControllerError::HasAssociatedResources(_))));
        assert_eq!(cloud.mock.count(Operation::DeleteLoadBalancer), 0);

        delete_load_balancer_checked(&cloud.mock, &id, true).await.unwrap();
        cloud.mock.advance().unwrap();
        assert!(cloud.mock.load_balancers().is_empty());
    }
}
