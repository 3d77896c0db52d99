//! Virtual clock for MockOpenStackClient
//!
//! One `advance()` settles everything that was pending before the call.

use super::{MockOpenStackClient, MockState, ServerOutcome, VolumeOutcome};
use crate::error::OpenStackError;
use crate::models::ProvisioningStatus;

impl MockOpenStackClient {
    /// Move every pending resource to its settled state
    ///
    /// - volumes `creating` become `available` (or `error`, see `set_volume_outcome`)
    /// - servers in `BUILD` become `ACTIVE` (or `ERROR`, see `set_server_outcome`)
    /// - deleted servers disappear, taking delete-on-termination volumes with them
    /// - load balancers and their children leave `PENDING_CREATE`/`PENDING_UPDATE`
    /// - load balancers in `PENDING_DELETE` disappear with all their children
    pub fn advance(&self) -> Result<(), OpenStackError> {
        let mut state = self.lock();
        settle_volumes(&mut state);
        settle_servers(&mut state)?;
        settle_load_balancers(&mut state)
    }
}

fn settle_volumes(state: &mut MockState) {
    let outcome = state.volume_outcome;
    for volume in state.volumes.values_mut().filter(|v| v.status == "creating") {
        volume.status = match outcome {
            VolumeOutcome::Available => "available",
            VolumeOutcome::Error => "error",
        }
        .to_string();
    }
}

fn settle_servers(state: &mut MockState) -> Result<(), OpenStackError> {
    let outcome = state.server_outcome;
    for record in state.servers.values_mut().filter(|r| !r.deleting) {
        if record.server.status == "BUILD" {
            record.server.status = match outcome {
                ServerOutcome::Active => "ACTIVE",
                ServerOutcome::Error => "ERROR",
            }
            .to_string();
        }
    }

    let deleted: Vec<String> = state
        .servers
        .iter()
        .filter(|(_, r)| r.deleting)
        .map(|(id, _)| id.clone())
        .collect();
    for server_id in deleted {
        let Some(record) = state.servers.remove(&server_id) else {
            continue;
        };
        for volume_id in &record.delete_on_termination {
            // delete_volume refuses attached volumes, so the boot volume must still exist
            if state.volumes.remove(volume_id).is_none() {
                return Err(OpenStackError::Internal(format!(
                    "boot volume {} of server {} vanished while attached",
                    volume_id, server_id
                )));
            }
        }
        for volume in state.volumes.values_mut() {
            let before = volume.attachments.len();
            volume.attachments.retain(|a| a.server_id != server_id);
            if volume.attachments.len() != before && volume.attachments.is_empty() {
                volume.status = "available".to_string();
            }
        }
        for port in state.ports.values_mut().filter(|p| p.device_id == server_id) {
            port.device_id.clear();
            port.status = "DOWN".to_string();
        }
        for group in state.server_groups.values_mut() {
            group.members.retain(|m| m != &server_id);
        }
    }
    Ok(())
}

fn settle_load_balancers(state: &mut MockState) -> Result<(), OpenStackError> {
    let removed: Vec<String> = state
        .load_balancers
        .values()
        .filter(|lb| lb.provisioning_status == ProvisioningStatus::PendingDelete)
        .map(|lb| lb.id.clone())
        .collect();
    for lb_id in &removed {
        state.load_balancers.remove(lb_id);
        let pools: Vec<String> = state
            .pools
            .values()
            .filter(|p| p.loadbalancers.iter().any(|r| &r.id == lb_id))
            .map(|p| p.id.clone())
            .collect();
        state.listeners.retain(|_, l| !l.loadbalancers.iter().any(|r| &r.id == lb_id));
        state.pools.retain(|id, _| !pools.contains(id));
        state.members.retain(|_, r| !pools.contains(&r.pool_id));
        state
            .monitors
            .retain(|_, m| !m.pools.iter().any(|r| pools.contains(&r.id)));
    }

    for lb in state.load_balancers.values_mut() {
        if matches!(
            lb.provisioning_status,
            ProvisioningStatus::PendingCreate | ProvisioningStatus::PendingUpdate
        ) {
            lb.provisioning_status = ProvisioningStatus::Active;
            lb.operating_status = "ONLINE".to_string();
        }
    }

    let settle = |status: &mut ProvisioningStatus| {
        if matches!(status, ProvisioningStatus::PendingCreate | ProvisioningStatus::PendingUpdate) {
            *status = ProvisioningStatus::Active;
        }
    };
    for listener in state.listeners.values_mut() {
        settle(&mut listener.provisioning_status);
    }
    for pool in state.pools.values_mut() {
        if pool.loadbalancers.is_empty() {
            return Err(OpenStackError::Internal(format!("pool {} has no load balancer", pool.id)));
        }
        settle(&mut pool.provisioning_status);
    }
    for record in state.members.values_mut() {
        settle(&mut record.member.provisioning_status);
    }
    for monitor in state.monitors.values_mut() {
        settle(&mut monitor.provisioning_status);
    }
    Ok(())
}
