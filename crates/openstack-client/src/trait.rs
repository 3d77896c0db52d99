//! OpenStackClient trait for mocking
//!
//! This trait abstracts the OpenStack services behind one object so the
//! reconciliation engine can run against the HTTP client in production and
//! against `MockOpenStackClient` in unit tests.

use crate::error::OpenStackError;
use crate::models::*;

/// Trait for OpenStack API client operations
///
/// Every verb is a single API call: no retries, no waiting. List verbs take a
/// filter and return every match; interpreting zero or many results is the
/// caller's job. All async methods must be `Send` to work with Tokio's
/// work-stealing runtime.
#[async_trait::async_trait]
pub trait OpenStackClientTrait: Send + Sync {
    /// Region this client is scoped to (informational)
    fn region(&self) -> Option<&str>;

    // Compute Operations
    async fn list_servers(&self, filter: &ServerFilter) -> Result<Vec<Server>, OpenStackError>;
    async fn get_server(&self, id: &str) -> Result<Server, OpenStackError>;
    async fn create_server(&self, opts: &CreateServerOpts) -> Result<Server, OpenStackError>;
    async fn delete_server(&self, id: &str) -> Result<(), OpenStackError>;
    async fn list_flavors(&self) -> Result<Vec<Flavor>, OpenStackError>;
    async fn get_flavor(&self, id: &str) -> Result<Flavor, OpenStackError>;
    async fn list_server_groups(&self) -> Result<Vec<ServerGroup>, OpenStackError>;
    async fn get_server_group(&self, id: &str) -> Result<ServerGroup, OpenStackError>;
    async fn create_server_group(&self, opts: &CreateServerGroupOpts) -> Result<ServerGroup, OpenStackError>;
    async fn delete_server_group(&self, id: &str) -> Result<(), OpenStackError>;

    // Image Operations
    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<Image>, OpenStackError>;
    async fn get_image(&self, id: &str) -> Result<Image, OpenStackError>;

    // Block Storage Operations
    async fn list_volumes(&self, filter: &VolumeFilter) -> Result<Vec<Volume>, OpenStackError>;
    async fn get_volume(&self, id: &str) -> Result<Volume, OpenStackError>;
    async fn create_volume(&self, opts: &CreateVolumeOpts) -> Result<Volume, OpenStackError>;
    async fn delete_volume(&self, id: &str) -> Result<(), OpenStackError>;

    // Network Operations
    async fn list_networks(&self, filter: &NetworkFilter) -> Result<Vec<Network>, OpenStackError>;
    async fn get_network(&self, id: &str) -> Result<Network, OpenStackError>;
    async fn list_subnets(&self, filter: &SubnetFilter) -> Result<Vec<Subnet>, OpenStackError>;
    async fn list_ports(&self, filter: &PortFilter) -> Result<Vec<Port>, OpenStackError>;
    async fn get_port(&self, id: &str) -> Result<Port, OpenStackError>;
    async fn create_port(&self, opts: &CreatePortOpts) -> Result<Port, OpenStackError>;
    async fn delete_port(&self, id: &str) -> Result<(), OpenStackError>;
    async fn replace_tags(&self, resource: TaggedResource, id: &str, tags: &[String]) -> Result<(), OpenStackError>;
    async fn list_trunks(&self, filter: &TrunkFilter) -> Result<Vec<Trunk>, OpenStackError>;
    async fn create_trunk(&self, opts: &CreateTrunkOpts) -> Result<Trunk, OpenStackError>;
    async fn delete_trunk(&self, id: &str) -> Result<(), OpenStackError>;
    async fn list_trunk_subports(&self, trunk_id: &str) -> Result<Vec<Subport>, OpenStackError>;
    async fn remove_subports(&self, trunk_id: &str, port_ids: &[String]) -> Result<(), OpenStackError>;
    async fn list_security_groups(&self, filter: &SecurityGroupFilter) -> Result<Vec<SecurityGroup>, OpenStackError>;
    async fn get_security_group(&self, id: &str) -> Result<SecurityGroup, OpenStackError>;
    async fn create_security_group(&self, opts: &CreateSecurityGroupOpts) -> Result<SecurityGroup, OpenStackError>;
    async fn delete_security_group(&self, id: &str) -> Result<(), OpenStackError>;
    async fn create_security_group_rule(&self, opts: &CreateSecurityGroupRuleOpts) -> Result<SecurityGroupRule, OpenStackError>;
    async fn delete_security_group_rule(&self, id: &str) -> Result<(), OpenStackError>;
    async fn list_floating_ips(&self, filter: &FloatingIpFilter) -> Result<Vec<FloatingIp>, OpenStackError>;
    async fn create_floating_ip(&self, opts: &CreateFloatingIpOpts) -> Result<FloatingIp, OpenStackError>;
    async fn associate_floating_ip(&self, id: &str, port_id: Option<&str>) -> Result<FloatingIp, OpenStackError>;
    async fn delete_floating_ip(&self, id: &str) -> Result<(), OpenStackError>;

    // Load Balancer Operations
    async fn list_load_balancers(&self, filter: &LoadBalancerFilter) -> Result<Vec<LoadBalancer>, OpenStackError>;
    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer, OpenStackError>;
    async fn create_load_balancer(&self, opts: &CreateLoadBalancerOpts) -> Result<LoadBalancer, OpenStackError>;
    async fn delete_load_balancer(&self, id: &str, cascade: bool) -> Result<(), OpenStackError>;
    async fn list_listeners(&self, filter: &ListenerFilter) -> Result<Vec<Listener>, OpenStackError>;
    async fn create_listener(&self, opts: &CreateListenerOpts) -> Result<Listener, OpenStackError>;
    async fn update_listener_allowed_cidrs(&self, id: &str, allowed_cidrs: &[String]) -> Result<Listener, OpenStackError>;
    async fn delete_listener(&self, id: &str) -> Result<(), OpenStackError>;
    async fn list_pools(&self, filter: &PoolFilter) -> Result<Vec<Pool>, OpenStackError>;
    async fn create_pool(&self, opts: &CreatePoolOpts) -> Result<Pool, OpenStackError>;
    async fn delete_pool(&self, id: &str) -> Result<(), OpenStackError>;
    async fn list_members(&self, pool_id: &str, filter: &MemberFilter) -> Result<Vec<Member>, OpenStackError>;
    async fn create_member(&self, pool_id: &str, opts: &CreateMemberOpts) -> Result<Member, OpenStackError>;
    async fn delete_member(&self, pool_id: &str, member_id: &str) -> Result<(), OpenStackError>;
    async fn list_monitors(&self, filter: &MonitorFilter) -> Result<Vec<Monitor>, OpenStackError>;
    async fn create_monitor(&self, opts: &CreateMonitorOpts) -> Result<Monitor, OpenStackError>;
    async fn delete_monitor(&self, id: &str) -> Result<(), OpenStackError>;
}
