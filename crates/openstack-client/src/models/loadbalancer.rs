//! Load balancer (Octavia v2) models

use serde::{Deserialize, Serialize};

/// Octavia provisioning status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningStatus {
    Active,
    PendingCreate,
    PendingUpdate,
    PendingDelete,
    Deleted,
    Error,
}

impl ProvisioningStatus {
    /// Any of the PENDING_* states: the object is immutable until it settles
    pub fn is_pending(self) -> bool {
        matches!(self, Self::PendingCreate | Self::PendingUpdate | Self::PendingDelete)
    }
}

/// `{"id": ...}` reference used by Octavia for relations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdRef {
    pub id: String,
}

/// Load balancer model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoadBalancer {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub vip_address: String,
    #[serde(default)]
    pub vip_port_id: String,
    #[serde(default)]
    pub vip_subnet_id: String,
    pub provisioning_status: ProvisioningStatus,
    #[serde(default)]
    pub operating_status: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub listeners: Vec<IdRef>,
    #[serde(default)]
    pub pools: Vec<IdRef>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Filter for listing load balancers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadBalancerFilter {
    pub name: Option<String>,
}

/// Request options for creating a load balancer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateLoadBalancerOpts {
    pub name: String,
    pub vip_subnet_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flavor_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Listener model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Listener {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub protocol: String,
    pub protocol_port: u16,
    #[serde(default)]
    pub loadbalancers: Vec<IdRef>,
    #[serde(default)]
    pub default_pool_id: Option<String>,
    #[serde(default)]
    pub allowed_cidrs: Option<Vec<String>>,
    pub provisioning_status: ProvisioningStatus,
}

/// Filter for listing listeners
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListenerFilter {
    pub name: Option<String>,
    pub loadbalancer_id: Option<String>,
}

/// Request options for creating a listener
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateListenerOpts {
    pub name: String,
    pub loadbalancer_id: String,
    pub protocol: String,
    pub protocol_port: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_cidrs: Vec<String>,
}

/// Pool model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pool {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub protocol: String,
    pub lb_algorithm: String,
    #[serde(default)]
    pub listeners: Vec<IdRef>,
    #[serde(default)]
    pub loadbalancers: Vec<IdRef>,
    #[serde(default)]
    pub members: Vec<IdRef>,
    #[serde(default)]
    pub healthmonitor_id: Option<String>,
    pub provisioning_status: ProvisioningStatus,
}

/// Filter for listing pools
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolFilter {
    pub name: Option<String>,
    pub loadbalancer_id: Option<String>,
}

/// Request options for creating a pool
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreatePoolOpts {
    pub name: String,
    pub listener_id: String,
    pub protocol: String,
    pub lb_algorithm: String,
}

/// Pool member model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Member {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub address: String,
    pub protocol_port: u16,
    #[serde(default)]
    pub subnet_id: Option<String>,
    pub provisioning_status: ProvisioningStatus,
}

/// Filter for listing pool members
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemberFilter {
    pub name: Option<String>,
    pub address: Option<String>,
}

/// Request options for creating a pool member
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateMemberOpts {
    pub name: String,
    pub address: String,
    pub protocol_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
}

/// Health monitor model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Monitor {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub monitor_type: String,
    pub delay: u32,
    pub timeout: u32,
    pub max_retries: u32,
    #[serde(default)]
    pub max_retries_down: u32,
    #[serde(default)]
    pub pools: Vec<IdRef>,
    pub provisioning_status: ProvisioningStatus,
}

/// Filter for listing health monitors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorFilter {
    pub name: Option<String>,
    pub pool_id: Option<String>,
}

/// Request options for creating a health monitor
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateMonitorOpts {
    pub name: String,
    pub pool_id: String,
    #[serde(rename = "type")]
    pub monitor_type: String,
    pub delay: u32,
    pub timeout: u32,
    pub max_retries: u32,
    pub max_retries_down: u32,
}
