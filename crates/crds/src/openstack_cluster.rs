//! OpenStackCluster CRD
//!
//! Cluster-scoped OpenStack resources shared by every machine of a cluster:
//! the (pre-existing) cluster network, the managed security groups and the
//! API server load balancer. Machines only read this object's status.

use crate::references::{FailureReason, IdentityRef, NetworkParam, SubnetParam};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Default Kubernetes API server port
pub const DEFAULT_API_SERVER_PORT: u16 = 6443;

fn default_api_server_port() -> u16 {
    DEFAULT_API_SERVER_PORT
}

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "stackops.microscaler.io",
    version = "v1alpha1",
    kind = "OpenStackCluster",
    namespaced,
    status = "OpenStackClusterStatus",
    shortname = "osc",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Endpoint","type":"string","jsonPath":".status.apiServerLoadBalancer.ip"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackClusterSpec {
    pub identity_ref: IdentityRef,

    /// Existing network the machines attach to
    pub network: NetworkParam,

    /// Subnets of `network` to use; empty means all of them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetParam>,

    /// External network for floating IPs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_network: Option<NetworkParam>,

    /// Create and maintain control-plane and worker security groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_security_groups: Option<ManagedSecurityGroups>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_load_balancer: Option<ApiServerLoadBalancer>,

    #[serde(default = "default_api_server_port")]
    pub api_server_port: u16,

    /// Do not give control-plane machines a floating IP when there is no load balancer
    #[serde(default)]
    pub disable_api_server_floating_ip: bool,

    /// Tags added to cluster-scoped resources
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManagedSecurityGroups {
    /// Replace the per-port rules between cluster machines with allow-all rules
    #[serde(default)]
    pub allow_all_in_cluster_traffic: bool,

    /// Extra rules added to the control-plane group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub control_plane_rules: Vec<SecurityGroupRuleSpec>,

    /// Extra rules added to the worker group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub worker_rules: Vec<SecurityGroupRuleSpec>,

    /// Extra rules added to both groups
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all_nodes_rules: Vec<SecurityGroupRuleSpec>,
}

/// Managed security group a rule may point at
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ManagedGroupRole {
    ControlPlane,
    Worker,
}

/// User supplied security group rule
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupRuleSpec {
    pub description: String,

    /// `ingress` or `egress`
    pub direction: String,

    /// `IPv4` (default) or `IPv6`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ether_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_min: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_max: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip_prefix: Option<String>,

    /// One rule is created per listed group
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub remote_managed_groups: Vec<ManagedGroupRole>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiServerLoadBalancer {
    #[serde(default)]
    pub enabled: bool,

    /// Octavia provider, e.g. `amphora` or `ovn`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Octavia flavor ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,

    /// Ports forwarded in addition to the API server port
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_ports: Vec<u16>,

    /// Source CIDRs allowed through the listeners; empty allows everyone
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_cidrs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackClusterStatus {
    /// Network, security groups and load balancer are all in place
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_network: Option<NetworkStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_plane_security_group: Option<SecurityGroupStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_security_group: Option<SecurityGroupStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_server_load_balancer: Option<LoadBalancerStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    pub id: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subnets: Vec<SubnetStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetStatus {
    pub id: String,
    pub name: String,
    pub cidr: String,
}

/// A security group and the rule set last applied to it
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupStatus {
    pub id: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<SecurityGroupRuleStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupRuleStatus {
    pub id: String,
    pub direction: String,
    pub ether_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_min: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_max: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_group_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_ip_prefix: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerStatus {
    pub id: String,
    pub name: String,

    /// VIP address
    pub ip: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<LoadBalancerPortStatus>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_cidrs: Vec<String>,
}

/// Listener, pool and monitor serving one port
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerPortStatus {
    pub port: u16,
    pub listener_id: String,
    pub pool_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitor_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_server_port_default() {
        let spec: OpenStackClusterSpec = serde_json::from_value(serde_json::json!({
            "identityRef": { "name": "cloud-config", "cloudName": "openstack" },
            "network": { "filter": { "name": "k8s-net" } }
        }))
        .unwrap();
        assert_eq!(spec.api_server_port, DEFAULT_API_SERVER_PORT);
        assert!(spec.managed_security_groups.is_none());
    }

    #[test]
    fn test_managed_group_role_names() {
        let role: ManagedGroupRole = serde_json::from_value(serde_json::json!("control-plane")).unwrap();
        assert_eq!(role, ManagedGroupRole::ControlPlane);
    }
}
