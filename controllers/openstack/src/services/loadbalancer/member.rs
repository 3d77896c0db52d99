//! Control-plane pool members
//!
//! Every control-plane machine is a member named after the machine in each
//! pool of the API server load balancer. A member with a stale address is
//! replaced, never updated.

use crate::error::ControllerError;
use crate::services::{ReconcileOutcome, LOAD_BALANCER_POLL_INTERVAL};
use crds::{LoadBalancerMemberStatus, LoadBalancerStatus};
use openstack_client::{CreateMemberOpts, Member, MemberFilter, OpenStackClientTrait, ProvisioningStatus};
use std::collections::HashSet;
use tracing::{debug, info};

async fn list_named_members(
    client: &dyn OpenStackClientTrait,
    pool_id: &str,
    name: &str,
) -> Result<Vec<Member>, openstack_client::OpenStackError> {
    Ok(client
        .list_members(
            pool_id,
            &MemberFilter {
                name: Some(name.to_string()),
                address: None,
            },
        )
        .await?
        .into_iter()
        .filter(|m| m.name == name)
        .collect())
}

/// Load balancer state as seen by members: `None` when it is busy
async fn accepting_changes(
    client: &dyn OpenStackClientTrait,
    lb: &LoadBalancerStatus,
) -> Result<Option<ProvisioningStatus>, ControllerError> {
    let current = match client.get_load_balancer(&lb.id).await {
        Ok(current) => current,
        Err(e) if e.is_not_found() => return Ok(Some(ProvisioningStatus::Deleted)),
        Err(e) => return Err(e.into()),
    };
    if current.provisioning_status.is_pending() {
        debug!("Load balancer {} is {:?}", lb.id, current.provisioning_status);
        return Ok(None);
    }
    Ok(Some(current.provisioning_status))
}

/// Make `machine_name` a member at `address` in every pool of `lb`
pub async fn reconcile_members(
    client: &dyn OpenStackClientTrait,
    lb: &LoadBalancerStatus,
    machine_name: &str,
    address: &str,
    subnet_id: Option<&str>,
    members: &mut Vec<LoadBalancerMemberStatus>,
) -> Result<ReconcileOutcome, ControllerError> {
    if lb.ports.is_empty() {
        return Err(ControllerError::DependencyNotReady(format!(
            "load balancer {} has no pools yet",
            lb.name
        )));
    }
    match accepting_changes(client, lb).await? {
        None => return Ok(ReconcileOutcome::Requeue(LOAD_BALANCER_POLL_INTERVAL)),
        Some(ProvisioningStatus::Active) => {}
        Some(other) => {
            return Err(ControllerError::DependencyNotReady(format!(
                "load balancer {} is {:?}",
                lb.name, other
            )));
        }
    }

    for port in &lb.ports {
        let existing = list_named_members(client, &port.pool_id, machine_name).await?;
        let (current, stale): (Vec<Member>, Vec<Member>) = existing.into_iter().partition(|m| m.address == address);

        // One change per pass: Octavia locks the load balancer after each
        if let Some(member) = stale.first().or_else(|| current.get(1)) {
            client.delete_member(&port.pool_id, &member.id).await?;
            info!(
                "Removed member {} ({}) at {} from pool {}",
                member.name, member.id, member.address, port.pool_id
            );
            members.retain(|m| m.member_id != member.id);
            return Ok(ReconcileOutcome::Requeue(LOAD_BALANCER_POLL_INTERVAL));
        }

        let recorded = match current.into_iter().next() {
            Some(member) => LoadBalancerMemberStatus {
                pool_id: port.pool_id.clone(),
                member_id: member.id,
                address: member.address,
            },
            None => {
                let member = client
                    .create_member(
                        &port.pool_id,
                        &CreateMemberOpts {
                            name: machine_name.to_string(),
                            address: address.to_string(),
                            protocol_port: port.port,
                            subnet_id: subnet_id.map(str::to_string),
                        },
                    )
                    .await?;
                info!("Added {} at {}:{} to pool {}", machine_name, address, port.port, port.pool_id);
                members.retain(|m| m.pool_id != port.pool_id);
                members.push(LoadBalancerMemberStatus {
                    pool_id: port.pool_id.clone(),
                    member_id: member.id,
                    address: member.address,
                });
                return Ok(ReconcileOutcome::Requeue(LOAD_BALANCER_POLL_INTERVAL));
            }
        };
        members.retain(|m| m.pool_id != port.pool_id);
        members.push(recorded);
    }

    let pools: HashSet<&str> = lb.ports.iter().map(|p| p.pool_id.as_str()).collect();
    members.retain(|m| pools.contains(m.pool_id.as_str()));
    Ok(ReconcileOutcome::Ready)
}

/// Remove `machine_name` from every pool it was added to
///
/// A load balancer, pool or member that is already gone counts as removed.
pub async fn remove_members(
    client: &dyn OpenStackClientTrait,
    lb: Option<&LoadBalancerStatus>,
    machine_name: &str,
    members: &mut Vec<LoadBalancerMemberStatus>,
) -> Result<ReconcileOutcome, ControllerError> {
    let Some(lb) = lb else {
        members.clear();
        return Ok(ReconcileOutcome::Ready);
    };
    match accepting_changes(client, lb).await? {
        None => return Ok(ReconcileOutcome::Requeue(LOAD_BALANCER_POLL_INTERVAL)),
        Some(ProvisioningStatus::Deleted) => {
            members.clear();
            return Ok(ReconcileOutcome::Ready);
        }
        Some(_) => {}
    }

    let mut pool_ids: Vec<String> = lb.ports.iter().map(|p| p.pool_id.clone()).collect();
    for member in members.iter() {
        if !pool_ids.contains(&member.pool_id) {
            pool_ids.push(member.pool_id.clone());
        }
    }

    for pool_id in pool_ids {
        let found = match list_named_members(client, &pool_id, machine_name).await {
            Ok(found) => found,
            Err(e) if e.is_not_found() => {
                members.retain(|m| m.pool_id != pool_id);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        for member in found {
            match client.delete_member(&pool_id, &member.id).await {
                Ok(()) => {
                    info!("Removed {} ({}) from pool {}", machine_name, member.id, pool_id);
                    members.retain(|m| m.member_id != member.id);
                    return Ok(ReconcileOutcome::Requeue(LOAD_BALANCER_POLL_INTERVAL));
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }
        members.retain(|m| m.pool_id != pool_id);
    }
    Ok(ReconcileOutcome::Ready)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::loadbalancer::reconcile_load_balancer;
    use crate::test_utils::*;
    use crds::ApiServerLoadBalancer;
    use openstack_client::Operation;

    async fn ready_load_balancer(cloud: &TestCloud, additional_ports: Vec<u16>) -> LoadBalancerStatus {
        let cluster = cluster_context(cloud);
        let spec = ApiServerLoadBalancer {
            enabled: true,
            additional_ports,
            ..Default::default()
        };
        let mut status = None;
        for _ in 0..20 {
            if reconcile_load_balancer(&cloud.mock, &cluster, &spec, 6443, &mut status)
                .await
                .unwrap()
                .is_ready()
            {
                break;
            }
            cloud.mock.advance().unwrap();
        }
        cloud.mock.clear_calls();
        status.unwrap()
    }

    async fn converge_members(
        cloud: &TestCloud,
        lb: &LoadBalancerStatus,
        address: &str,
        members: &mut Vec<LoadBalancerMemberStatus>,
    ) {
        for _ in 0..20 {
            if reconcile_members(&cloud.mock, lb, "m1", address, Some(&cloud.subnet.id), members)
                .await
                .unwrap()
                .is_ready()
            {
                return;
            }
            cloud.mock.advance().unwrap();
        }
        panic!("members did not converge");
    }

    #[tokio::test]
    async fn test_member_in_every_pool() {
        let cloud = seed_cloud();
        let lb = ready_load_balancer(&cloud, vec![22]).await;
        let mut members = vec![];
        converge_members(&cloud, &lb, "10.6.0.10", &mut members).await;

        assert_eq!(members.len(), 2);
        assert_eq!(cloud.mock.count(Operation::CreateMember), 2);
        let ports: Vec<u16> = cloud.mock.members().iter().map(|(_, m)| m.protocol_port).collect();
        assert!(ports.contains(&6443) && ports.contains(&22));

        cloud.mock.clear_calls();
        converge_members(&cloud, &lb, "10.6.0.10", &mut members).await;
        assert!(cloud.mock.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_address_is_replaced() {
        let cloud = seed_cloud();
        let lb = ready_load_balancer(&cloud, vec![]).await;
        let mut members = vec![];
        converge_members(&cloud, &lb, "10.6.0.10", &mut members).await;
        cloud.mock.clear_calls();

        converge_members(&cloud, &lb, "10.6.0.11", &mut members).await;
        assert_eq!(
            cloud.mock.mutating_operations(),
            vec![Operation::DeleteMember, Operation::CreateMember]
        );
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].address, "10.6.0.11");
    }

    #[tokio::test]
    async fn test_busy_load_balancer_requeues_without_changes() {
        let cloud = seed_cloud();
        let lb = ready_load_balancer(&cloud, vec![]).await;
        cloud.mock.set_load_balancer_status(&lb.id, ProvisioningStatus::PendingUpdate);
        let mut members = vec![];
        let outcome = reconcile_members(&cloud.mock, &lb, "m1", "10.6.0.10", None, &mut members)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Requeue(LOAD_BALANCER_POLL_INTERVAL));
        assert!(cloud.mock.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_remove_members_tolerates_missing_pieces() {
        let cloud = seed_cloud();
        let lb = ready_load_balancer(&cloud, vec![22]).await;
        let mut members = vec![];
        converge_members(&cloud, &lb, "10.6.0.10", &mut members).await;

        // A pool recorded in status that no longer exists
        members.push(LoadBalancerMemberStatus {
            pool_id: "gone".to_string(),
            member_id: "gone".to_string(),
            address: "10.6.0.10".to_string(),
        });
        cloud.mock.clear_calls();
        for _ in 0..10 {
            if remove_members(&cloud.mock, Some(&lb), "m1", &mut members)
                .await
                .unwrap()
                .is_ready()
            {
                break;
            }
            cloud.mock.advance().unwrap();
        }
        assert!(members.is_empty());
        assert!(cloud.mock.members().is_empty());
        assert_eq!(cloud.mock.count(Operation::DeleteMember), 2);

        // Load balancer gone entirely
        members.push(LoadBalancerMemberStatus {
            pool_id: lb.ports[0].pool_id.clone(),
            member_id: "x".to_string(),
            address: "10.6.0.10".to_string(),
        });
        let missing = LoadBalancerStatus {
            id: "missing".to_string(),
            ..lb.clone()
        };
        assert!(remove_members(&cloud.mock, Some(&missing), "m1", &mut members)
            .await
            .unwrap()
            .is_ready());
        assert!(members.is_empty());
    }
}
