//! Networking (Neutron) models
//!
//! Networks, subnets, ports, trunks, security groups and floating IPs.

use serde::{Deserialize, Serialize};

/// Network model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub subnets: Vec<String>,
    #[serde(rename = "router:external", default)]
    pub external: bool,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Filter for listing networks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkFilter {
    pub id: Option<String>,
    pub name: Option<String>,
    pub tags: Vec<String>,
    pub external: Option<bool>,
}

/// Subnet model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subnet {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub network_id: String,
    #[serde(default)]
    pub cidr: String,
    #[serde(default)]
    pub ip_version: u8,
}

/// Filter for listing subnets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubnetFilter {
    pub id: Option<String>,
    pub name: Option<String>,
    pub network_id: Option<String>,
    pub cidr: Option<String>,
}

/// Fixed IP of a port (response shape)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixedIp {
    pub subnet_id: String,
    pub ip_address: String,
}

/// Fixed IP request: either field may be omitted and Neutron fills it in
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FixedIpOpts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
}

/// Port model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Port {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub network_id: String,
    #[serde(default)]
    pub fixed_ips: Vec<FixedIp>,
    #[serde(default)]
    pub security_groups: Vec<String>,
    #[serde(default)]
    pub port_security_enabled: Option<bool>,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Filter for listing ports
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PortFilter {
    pub name: Option<String>,
    pub network_id: Option<String>,
    pub device_id: Option<String>,
    pub tags: Vec<String>,
}

/// Request options for creating a port
///
/// `security_groups: None` leaves the field out of the request (Neutron applies
/// the project default group); `Some(vec![])` explicitly requests none.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreatePortOpts {
    pub name: String,
    pub network_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_ips: Option<Vec<FixedIpOpts>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_security_enabled: Option<bool>,
}

/// Neutron resources that carry tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaggedResource {
    Network,
    Port,
    Trunk,
    SecurityGroup,
}

impl TaggedResource {
    /// Collection name in the Neutron URL space
    pub fn collection(self) -> &'static str {
        match self {
            Self::Network => "networks",
            Self::Port => "ports",
            Self::Trunk => "trunks",
            Self::SecurityGroup => "security-groups",
        }
    }
}

/// Trunk model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trunk {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub port_id: String,
    #[serde(default)]
    pub sub_ports: Vec<Subport>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Trunk subport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subport {
    pub port_id: String,
    #[serde(default)]
    pub segmentation_type: String,
    #[serde(default)]
    pub segmentation_id: u32,
}

/// Filter for listing trunks
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrunkFilter {
    pub name: Option<String>,
    pub port_id: Option<String>,
}

/// Request options for creating a trunk
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateTrunkOpts {
    pub name: String,
    pub port_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Security group rule direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RuleDirection {
    Ingress,
    Egress,
}

/// Security group rule ether type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EtherType {
    #[serde(rename = "IPv4")]
    Ipv4,
    #[serde(rename = "IPv6")]
    Ipv6,
}

/// Security group model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "security_group_rules")]
    pub rules: Vec<SecurityGroupRule>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Security group rule model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityGroupRule {
    pub id: String,
    pub security_group_id: String,
    pub direction: RuleDirection,
    pub ethertype: EtherType,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub port_range_min: Option<u16>,
    #[serde(default)]
    pub port_range_max: Option<u16>,
    #[serde(default)]
    pub remote_group_id: Option<String>,
    #[serde(default)]
    pub remote_ip_prefix: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Filter for listing security groups
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SecurityGroupFilter {
    pub id: Option<String>,
    pub name: Option<String>,
    pub tags: Vec<String>,
}

/// Request options for creating a security group
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateSecurityGroupOpts {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Request options for creating a security group rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateSecurityGroupRuleOpts {
    pub security_group_id: String,
    pub direction: RuleDirection,
    pub ethertype: EtherType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_range_min: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_range_max: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip_prefix: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Floating IP model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FloatingIp {
    pub id: String,
    pub floating_ip_address: String,
    pub floating_network_id: String,
    #[serde(default)]
    pub port_id: Option<String>,
    #[serde(default)]
    pub fixed_ip_address: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: String,
}

/// Filter for listing floating IPs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloatingIpFilter {
    pub floating_ip_address: Option<String>,
    pub port_id: Option<String>,
}

/// Request options for creating a floating IP
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateFloatingIpOpts {
    pub floating_network_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub floating_ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}
