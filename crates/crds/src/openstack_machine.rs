//! OpenStackMachine CRD
//!
//! One OpenStack server together with its ports, optional trunks, optional
//! root volume and load-balancer membership.

use crate::references::{FailureReason, IdentityRef, ImageParam, NetworkParam, SecurityGroupParam, ServerGroupParam, SubnetParam};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "stackops.microscaler.io",
    version = "v1alpha1",
    kind = "OpenStackMachine",
    namespaced,
    status = "OpenStackMachineStatus",
    shortname = "osm",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.instanceState"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackMachineSpec {
    /// Name of the OpenStackCluster this machine belongs to
    pub cluster_name: String,

    /// Credentials used for every OpenStack call
    pub identity_ref: IdentityRef,

    /// Boot image
    pub image: ImageParam,

    /// Flavor name; one of `flavor` and `flavorId` is required
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flavor_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_group: Option<ServerGroupParam>,

    /// Security groups applied to every port that does not set its own.
    ///
    /// Unset leaves the choice to OpenStack (the project default group);
    /// an empty list explicitly requests no security groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<Vec<SecurityGroupParam>>,

    /// Ports in attachment order; empty means one port on the cluster network
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortOpts>,

    /// Create a trunk on every port
    #[serde(default)]
    pub trunk: bool,

    /// Boot from a volume instead of the image on local disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<RootVolume>,

    /// Tags added to the server, its ports and trunks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_metadata: Vec<ServerMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_drive: Option<bool>,

    /// Failure domain of the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,

    /// Member of the control plane (load balancer member, API security group)
    #[serde(default)]
    pub control_plane: bool,

    /// Specific floating IP address for a control-plane machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_ip: Option<String>,
}

/// Desired port
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PortOpts {
    /// Network of the port; defaults to the cluster network
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkParam>,

    /// Requested addresses; empty lets OpenStack pick from the first subnet
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed_ips: Vec<FixedIpParam>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_port_security: Option<bool>,

    /// Port name becomes `<machine>-<nameSuffix>` instead of `<machine>-<index>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_suffix: Option<String>,

    /// Overrides the machine-level security groups for this port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<Vec<SecurityGroupParam>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Overrides the machine-level trunk flag for this port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunk: Option<bool>,
}

/// Requested fixed IP of a port
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FixedIpParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<SubnetParam>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Boot volume
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RootVolume {
    /// Size in GiB; 0 disables boot-from-volume
    #[serde(rename = "sizeGiB")]
    pub size_gib: u32,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,

    /// Takes precedence over the machine's failure domain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerMetadata {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OpenStackMachineStatus {
    /// Server is ACTIVE and every dependent resource is in place
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,

    #[serde(default)]
    pub instance_state: InstanceState,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_ip: Option<String>,

    /// References resolved on the first reconcile; never re-resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedMachineSpec>,

    /// OpenStack resources created or adopted so far
    #[serde(default)]
    pub resources: MachineResources,

    /// Pool memberships of the control-plane load balancer
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub load_balancer_members: Vec<LoadBalancerMemberStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reconciled: Option<chrono::DateTime<chrono::Utc>>,
}

/// Lifecycle state of the server
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum InstanceState {
    /// No server requested yet
    #[default]
    Absent,

    /// Server requested, OpenStack still building it
    Building,

    Active,

    /// Server reported a status other than ACTIVE or BUILD
    Error,

    /// Server delete requested, waiting for OpenStack to remove it
    Deleting,

    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineAddress {
    /// `InternalIP` or `ExternalIP`
    #[serde(rename = "type")]
    pub address_type: String,
    pub address: String,
}

/// OpenStack resources owned by the machine
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MachineResources {
    /// One entry per resolved port, in the same order.
    ///
    /// If entry `i` exists then ports `0..=i` exist in OpenStack, and
    /// `ports[i]` belongs to `resolved.ports[i]`. Ports are appended one at a
    /// time and only removed during deletion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortStatus>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume: Option<RootVolumeStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortStatus {
    pub id: String,
    pub network_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trunk_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RootVolumeStatus {
    pub id: String,

    /// Once true, never reset to false
    #[serde(default)]
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerMemberStatus {
    pub pool_id: String,
    pub member_id: String,
    pub address: String,
}

/// Concrete IDs and per-port create options decided on the first reconcile
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMachineSpec {
    pub image_id: String,
    pub flavor_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_group_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<ResolvedPortSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedPortSpec {
    pub name: String,
    pub network_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fixed_ips: Vec<ResolvedFixedIp>,

    /// Unset: leave it to OpenStack; empty: explicitly none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<Vec<String>>,

    #[serde(default)]
    pub disable_port_security: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default)]
    pub trunk: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedFixedIp {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(extra: serde_json::Value) -> OpenStackMachineSpec {
        let mut base = serde_json::json!({
            "clusterName": "c1",
            "identityRef": { "name": "cloud-config", "cloudName": "openstack" },
            "image": { "filter": { "name": "img-a" } },
            "flavor": "m1.small"
        });
        if let (Some(base), Some(extra)) = (base.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        serde_json::from_value(base).unwrap()
    }

    #[test]
    fn test_unset_and_empty_security_groups_differ() {
        assert_eq!(spec(serde_json::json!({})).security_groups, None);
        assert_eq!(
            spec(serde_json::json!({ "securityGroups": [] })).security_groups,
            Some(vec![])
        );
    }

    #[test]
    fn test_root_volume_field_names() {
        let machine = spec(serde_json::json!({
            "rootVolume": { "sizeGiB": 10, "type": "ssd" }
        }));
        let volume = machine.root_volume.unwrap();
        assert_eq!(volume.size_gib, 10);
        assert_eq!(volume.volume_type.as_deref(), Some("ssd"));
    }

    #[test]
    fn test_status_defaults() {
        let status: OpenStackMachineStatus = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(status.instance_state, InstanceState::Absent);
        assert!(status.resources.ports.is_empty());
        assert!(!status.ready);
    }
}
