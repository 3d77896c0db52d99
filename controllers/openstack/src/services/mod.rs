//! OpenStack reconciliation engine
//!
//! Create-or-adopt-or-delete logic for every OpenStack resource the
//! controller manages. Nothing in here talks to Kubernetes: each service
//! takes the desired spec, the object's status record (mutated in place so
//! partial progress survives errors) and an [`OpenStackClientTrait`].
//!
//! Every cloud call inside one reconcile is awaited in order. Waiting for
//! OpenStack (volume creation, server build, load balancer updates) is never
//! done in-process: services return [`ReconcileOutcome::Requeue`] instead.
//!
//! - `compute`: servers, root volumes, server groups, reference resolution
//! - `networking`: ports, trunks, security groups, floating IPs, networks
//! - `loadbalancer`: the API server load balancer and its pool members
//! - `cluster`: cluster-scoped orchestration of the above

pub mod cluster;
pub mod compute;
pub mod loadbalancer;
pub mod networking;

use crate::error::ControllerError;
use crds::{
    LoadBalancerStatus, NetworkStatus, OpenStackCluster, OpenStackClusterSpec, OpenStackClusterStatus, OpenStackMachineSpec,
    SecurityGroupStatus,
};
use openstack_client::OpenStackError;
use std::time::Duration;

/// Poll interval while a volume is being created
pub const VOLUME_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Poll interval while a server is building
pub const SERVER_POLL_INTERVAL: Duration = Duration::from_secs(15);
/// Poll interval while a server delete is in progress
pub const SERVER_DELETE_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Poll interval while a load balancer is PENDING_*
pub const LOAD_BALANCER_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Poll interval while waiting on another object
pub const DEPENDENCY_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Result of one reconcile step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Desired state reached
    Ready,
    /// OpenStack is still working; call again after the delay
    Requeue(Duration),
}

impl ReconcileOutcome {
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// What a machine needs to know about its cluster
///
/// Built from the OpenStackCluster object; every field the cluster has not
/// published yet is `None` and machines requeue until it appears.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterContext {
    pub name: String,
    pub namespace: String,
    pub network: Option<NetworkStatus>,
    pub external_network: Option<NetworkStatus>,
    /// The cluster manages security groups (they may not exist yet)
    pub manages_security_groups: bool,
    pub control_plane_security_group: Option<SecurityGroupStatus>,
    pub worker_security_group: Option<SecurityGroupStatus>,
    /// The cluster has an API server load balancer (it may not exist yet)
    pub load_balancer_enabled: bool,
    pub api_server_load_balancer: Option<LoadBalancerStatus>,
    pub disable_api_server_floating_ip: bool,
    pub tags: Vec<String>,
}

impl From<&OpenStackCluster> for ClusterContext {
    fn from(cluster: &OpenStackCluster) -> Self {
        Self::new(
            cluster.metadata.name.as_deref().unwrap_or_default(),
            cluster.metadata.namespace.as_deref().unwrap_or_default(),
            &cluster.spec,
            &cluster.status.clone().unwrap_or_default(),
        )
    }
}

impl ClusterContext {
    pub fn new(name: &str, namespace: &str, spec: &OpenStackClusterSpec, status: &OpenStackClusterStatus) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            network: status.network.clone(),
            external_network: status.external_network.clone(),
            manages_security_groups: spec.managed_security_groups.is_some(),
            control_plane_security_group: status.control_plane_security_group.clone(),
            worker_security_group: status.worker_security_group.clone(),
            load_balancer_enabled: spec.api_server_load_balancer.as_ref().is_some_and(|lb| lb.enabled),
            api_server_load_balancer: status.api_server_load_balancer.clone(),
            disable_api_server_floating_ip: spec.disable_api_server_floating_ip,
            tags: spec.tags.clone(),
        }
    }

    /// Tag marking resources that belong to this cluster
    pub fn ownership_tag(&self) -> String {
        format!("stackops-cluster-{}-{}", self.namespace, self.name)
    }
}

/// Everything a machine reconcile reads
#[derive(Debug, Clone, Copy)]
pub struct MachineContext<'a> {
    /// Machine object name, also the server name
    pub name: &'a str,
    pub namespace: &'a str,
    pub spec: &'a OpenStackMachineSpec,
    pub cluster: &'a ClusterContext,
}

impl MachineContext<'_> {
    /// Tag marking resources that belong to this machine
    pub fn ownership_tag(&self) -> String {
        format!("stackops-machine-{}", self.name)
    }

    /// Cluster, machine and user tags, sorted and deduplicated
    pub fn tags(&self) -> Vec<String> {
        let mut tags = vec![self.cluster.ownership_tag(), self.ownership_tag()];
        tags.extend(self.cluster.tags.iter().cloned());
        tags.extend(self.spec.tags.iter().cloned());
        tags.sort();
        tags.dedup();
        tags
    }

    /// Value recorded in volume metadata to identify the owner
    pub fn owner_reference(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Reduce a list result to the single expected match
///
/// Zero matches is `None`; more than one is a terminal ambiguity.
pub fn at_most_one<T>(mut items: Vec<T>, what: &str, name: &str) -> Result<Option<T>, ControllerError> {
    match items.len() {
        0 => Ok(None),
        1 => Ok(items.pop()),
        n => Err(ControllerError::AmbiguousResource(format!(
            "{n} {what}s match {name:?}, expected at most one"
        ))),
    }
}

/// Like [`at_most_one`] but a missing resource is an invalid reference
pub fn exactly_one<T>(items: Vec<T>, what: &str, name: &str) -> Result<T, ControllerError> {
    at_most_one(items, what, name)?
        .ok_or_else(|| ControllerError::InvalidConfig(format!("no {what} matches {name:?}")))
}

/// Treat NotFound on a delete as success
pub fn ignore_not_found(result: Result<(), OpenStackError>) -> Result<(), ControllerError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other.map_err(ControllerError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at_most_one() {
        assert_eq!(at_most_one(Vec::<u8>::new(), "port", "m1-0").unwrap(), None);
        assert_eq!(at_most_one(vec![7], "port", "m1-0").unwrap(), Some(7));
        assert!(matches!(
            at_most_one(vec![1, 2], "port", "m1-0"),
            Err(ControllerError::AmbiguousResource(_))
        ));
    }

    #[test]
    fn test_exactly_one_missing_is_invalid_config() {
        assert!(matches!(
            exactly_one(Vec::<u8>::new(), "image", "img-a"),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_ignore_not_found() {
        assert!(ignore_not_found(Err(OpenStackError::NotFound("port".into()))).is_ok());
        assert!(ignore_not_found(Err(OpenStackError::Conflict("in use".into()))).is_err());
    }
}
