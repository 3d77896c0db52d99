//! Mock OpenStackClient for unit testing
//!
//! An explicit in-memory cloud implementing `OpenStackClientTrait`. Nothing
//! happens in the background: resources that OpenStack would move
//! asynchronously (volumes, servers, load balancers) stay in their pending
//! state until the test calls [`MockOpenStackClient::advance`].
//!
//! The mock is organized into domain-specific modules:
//! - `compute.rs` - servers, flavors, server groups
//! - `image.rs` - images
//! - `volume.rs` - block storage volumes
//! - `network.rs` - networks, subnets, ports, trunks, security groups, floating IPs
//! - `loadbalancer.rs` - load balancers, listeners, pools, members, monitors
//! - `clock.rs` - the virtual clock tick

mod clock;
mod compute;
mod image;
mod loadbalancer;
mod network;
mod volume;

use crate::error::OpenStackError;
use crate::models::*;
use crate::openstack_trait::OpenStackClientTrait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// API operations recorded in the call log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListServers,
    GetServer,
    CreateServer,
    DeleteServer,
    ListFlavors,
    GetFlavor,
    ListServerGroups,
    GetServerGroup,
    CreateServerGroup,
    DeleteServerGroup,
    ListImages,
    GetImage,
    ListVolumes,
    GetVolume,
    CreateVolume,
    DeleteVolume,
    ListNetworks,
    GetNetwork,
    ListSubnets,
    ListPorts,
    GetPort,
    CreatePort,
    DeletePort,
    ReplaceTags,
    ListTrunks,
    CreateTrunk,
    DeleteTrunk,
    ListTrunkSubports,
    RemoveSubports,
    ListSecurityGroups,
    GetSecurityGroup,
    CreateSecurityGroup,
    DeleteSecurityGroup,
    CreateSecurityGroupRule,
    DeleteSecurityGroupRule,
    ListFloatingIps,
    CreateFloatingIp,
    AssociateFloatingIp,
    DeleteFloatingIp,
    ListLoadBalancers,
    GetLoadBalancer,
    CreateLoadBalancer,
    DeleteLoadBalancer,
    ListListeners,
    CreateListener,
    UpdateListener,
    DeleteListener,
    ListPools,
    CreatePool,
    DeletePool,
    ListMembers,
    CreateMember,
    DeleteMember,
    ListMonitors,
    CreateMonitor,
    DeleteMonitor,
}

impl Operation {
    /// Whether the operation changes cloud state
    pub fn is_mutating(self) -> bool {
        !matches!(
            self,
            Self::ListServers
                | Self::GetServer
                | Self::ListFlavors
                | Self::GetFlavor
                | Self::ListServerGroups
                | Self::GetServerGroup
                | Self::ListImages
                | Self::GetImage
                | Self::ListVolumes
                | Self::GetVolume
                | Self::ListNetworks
                | Self::GetNetwork
                | Self::ListSubnets
                | Self::ListPorts
                | Self::GetPort
                | Self::ListTrunks
                | Self::ListTrunkSubports
                | Self::ListSecurityGroups
                | Self::GetSecurityGroup
                | Self::ListFloatingIps
                | Self::ListLoadBalancers
                | Self::GetLoadBalancer
                | Self::ListListeners
                | Self::ListPools
                | Self::ListMembers
                | Self::ListMonitors
        )
    }
}

/// One recorded API call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub operation: Operation,
    /// ID or name the call was about (empty for unfiltered lists)
    pub target: String,
}

/// What a `creating` volume turns into on the next `advance()`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VolumeOutcome {
    #[default]
    Available,
    Error,
}

/// What a `BUILD` server turns into on the next `advance()`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ServerOutcome {
    #[default]
    Active,
    Error,
}

pub(crate) struct ServerRecord {
    pub server: Server,
    pub request: Option<CreateServerOpts>,
    pub flavor_id: String,
    pub ports: Vec<String>,
    pub delete_on_termination: Vec<String>,
    pub deleting: bool,
}

pub(crate) struct MemberRecord {
    pub pool_id: String,
    pub member: Member,
}

#[derive(Default)]
pub(crate) struct MockState {
    pub counter: u128,
    pub ip_counters: HashMap<String, u32>,
    pub calls: Vec<Call>,
    pub failures: HashMap<Operation, VecDeque<OpenStackError>>,
    pub volume_outcome: VolumeOutcome,
    pub server_outcome: ServerOutcome,
    pub servers: BTreeMap<String, ServerRecord>,
    pub flavors: BTreeMap<String, Flavor>,
    pub server_groups: BTreeMap<String, ServerGroup>,
    pub images: BTreeMap<String, Image>,
    pub volumes: BTreeMap<String, Volume>,
    pub networks: BTreeMap<String, Network>,
    pub subnets: BTreeMap<String, Subnet>,
    pub ports: BTreeMap<String, Port>,
    pub trunks: BTreeMap<String, Trunk>,
    pub security_groups: BTreeMap<String, SecurityGroup>,
    pub floating_ips: BTreeMap<String, FloatingIp>,
    pub load_balancers: BTreeMap<String, LoadBalancer>,
    pub listeners: BTreeMap<String, Listener>,
    pub pools: BTreeMap<String, Pool>,
    pub members: BTreeMap<String, MemberRecord>,
    pub monitors: BTreeMap<String, Monitor>,
}

impl MockState {
    /// Deterministic UUID-shaped ID
    pub(crate) fn next_id(&mut self) -> String {
        self.counter += 1;
        Uuid::from_u128(self.counter).to_string()
    }

    /// Next free address in a subnet, counting from .10
    pub(crate) fn next_ip(&mut self, subnet: &Subnet) -> String {
        let counter = self.ip_counters.entry(subnet.id.clone()).or_insert(9);
        *counter += 1;
        let base = subnet.cidr.split('/').next().unwrap_or_default();
        let octets: Vec<&str> = base.split('.').collect();
        if octets.len() == 4 {
            format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], counter)
        } else {
            format!("{}{:x}", base, counter)
        }
    }

    pub(crate) fn first_subnet_of(&self, network_id: &str) -> Option<Subnet> {
        self.networks
            .get(network_id)
            .and_then(|network| network.subnets.first())
            .and_then(|subnet_id| self.subnets.get(subnet_id))
            .cloned()
    }
}

/// Mock OpenStackClient for testing
///
/// Clones share the same in-memory cloud, so a test can hand one clone to
/// the code under test and keep another for setup and assertions.
#[derive(Clone, Default)]
pub struct MockOpenStackClient {
    pub(crate) region: Option<String>,
    pub(crate) state: Arc<Mutex<MockState>>,
}

impl MockOpenStackClient {
    /// Create an empty mock cloud
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty mock cloud scoped to a region
    pub fn with_region(region: impl Into<String>) -> Self {
        Self {
            region: Some(region.into()),
            ..Self::default()
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only means another test thread panicked mid-update
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a call and return the state, or the injected failure for it
    pub(crate) fn begin(
        &self,
        operation: Operation,
        target: impl Into<String>,
    ) -> Result<MutexGuard<'_, MockState>, OpenStackError> {
        let mut state = self.lock();
        state.calls.push(Call {
            operation,
            target: target.into(),
        });
        if let Some(err) = state.failures.get_mut(&operation).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(state)
    }

    // Test controls

    /// Make the next call of `operation` fail with `err` (one-shot, queued)
    pub fn fail_next(&self, operation: Operation, err: OpenStackError) {
        self.lock().failures.entry(operation).or_default().push_back(err);
    }

    /// Choose what pending volumes become on the next `advance()`
    pub fn set_volume_outcome(&self, outcome: VolumeOutcome) {
        self.lock().volume_outcome = outcome;
    }

    /// Choose what building servers become on the next `advance()`
    pub fn set_server_outcome(&self, outcome: ServerOutcome) {
        self.lock().server_outcome = outcome;
    }

    /// Every call made so far, in order
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Mutating calls made so far, in order
    pub fn mutating_calls(&self) -> Vec<Call> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation.is_mutating())
            .cloned()
            .collect()
    }

    /// Operations of the mutating calls, in order
    pub fn mutating_operations(&self) -> Vec<Operation> {
        self.mutating_calls().into_iter().map(|call| call.operation).collect()
    }

    /// Number of calls of one operation
    pub fn count(&self, operation: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation == operation)
            .count()
    }

    /// Forget the call log (state is kept)
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    // Seeding

    /// Add a tenant network
    pub fn add_network(&self, name: &str) -> Network {
        self.insert_network(name, false)
    }

    /// Add an external (provider) network, usable for floating IPs
    pub fn add_external_network(&self, name: &str) -> Network {
        self.insert_network(name, true)
    }

    fn insert_network(&self, name: &str, external: bool) -> Network {
        let mut state = self.lock();
        let network = Network {
            id: state.next_id(),
            name: name.to_string(),
            subnets: vec![],
            external,
            tags: vec![],
        };
        state.networks.insert(network.id.clone(), network.clone());
        network
    }

    /// Add a subnet and link it to its network
    pub fn add_subnet(&self, network_id: &str, name: &str, cidr: &str) -> Subnet {
        let mut state = self.lock();
        let subnet = Subnet {
            id: state.next_id(),
            name: name.to_string(),
            network_id: network_id.to_string(),
            cidr: cidr.to_string(),
            ip_version: if cidr.contains(':') { 6 } else { 4 },
        };
        if let Some(network) = state.networks.get_mut(network_id) {
            network.subnets.push(subnet.id.clone());
        }
        state.subnets.insert(subnet.id.clone(), subnet.clone());
        subnet
    }

    /// Add an active image
    pub fn add_image(&self, name: &str, tags: &[&str]) -> Image {
        let mut state = self.lock();
        let image = Image {
            id: state.next_id(),
            name: name.to_string(),
            status: "active".to_string(),
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
        };
        state.images.insert(image.id.clone(), image.clone());
        image
    }

    /// Add a flavor
    pub fn add_flavor(&self, name: &str) -> Flavor {
        let mut state = self.lock();
        let flavor = Flavor {
            id: state.next_id(),
            name: name.to_string(),
            vcpus: 2,
            ram: 4096,
            disk: 20,
        };
        state.flavors.insert(flavor.id.clone(), flavor.clone());
        flavor
    }

    /// Add a volume in the given status, optionally attached to a server
    pub fn add_volume(&self, name: &str, size: u32, status: &str, attached_to: Option<&str>) -> Volume {
        let mut state = self.lock();
        let volume = Volume {
            id: state.next_id(),
            name: name.to_string(),
            size,
            status: status.to_string(),
            attachments: attached_to
                .map(|server_id| {
                    vec![VolumeAttachment {
                        server_id: server_id.to_string(),
                        attachment_id: None,
                        device: Some("/dev/vda".to_string()),
                    }]
                })
                .unwrap_or_default(),
            availability_zone: None,
            volume_type: None,
            metadata: HashMap::new(),
        };
        state.volumes.insert(volume.id.clone(), volume.clone());
        volume
    }

    /// Add a server that was created outside the system under test
    pub fn add_server(&self, name: &str, status: &str) -> Server {
        let mut state = self.lock();
        let server = Server {
            id: state.next_id(),
            name: name.to_string(),
            status: status.to_string(),
            addresses: HashMap::new(),
            availability_zone: None,
            task_state: None,
            metadata: HashMap::new(),
            tags: vec![],
        };
        state.servers.insert(
            server.id.clone(),
            ServerRecord {
                server: server.clone(),
                request: None,
                flavor_id: String::new(),
                ports: vec![],
                delete_on_termination: vec![],
                deleting: false,
            },
        );
        server
    }

    /// Add a port on a network with an address from its first subnet
    pub fn add_port(&self, name: &str, network_id: &str) -> Port {
        let mut state = self.lock();
        let id = state.next_id();
        let fixed_ips = match state.first_subnet_of(network_id) {
            Some(subnet) => vec![FixedIp {
                subnet_id: subnet.id.clone(),
                ip_address: state.next_ip(&subnet),
            }],
            None => vec![],
        };
        let port = Port {
            id,
            name: name.to_string(),
            network_id: network_id.to_string(),
            fixed_ips,
            security_groups: vec![],
            port_security_enabled: Some(true),
            device_id: String::new(),
            status: "DOWN".to_string(),
            description: String::new(),
            tags: vec![],
        };
        state.ports.insert(port.id.clone(), port.clone());
        port
    }

    /// Add a trunk subport (e.g. attached by another system)
    pub fn add_subport(&self, trunk_id: &str, port_id: &str, segmentation_id: u32) {
        if let Some(trunk) = self.lock().trunks.get_mut(trunk_id) {
            trunk.sub_ports.push(Subport {
                port_id: port_id.to_string(),
                segmentation_type: "vlan".to_string(),
                segmentation_id,
            });
        }
    }

    /// Add an empty security group
    pub fn add_security_group(&self, name: &str) -> SecurityGroup {
        let mut state = self.lock();
        let group = SecurityGroup {
            id: state.next_id(),
            name: name.to_string(),
            description: String::new(),
            rules: vec![],
            tags: vec![],
        };
        state.security_groups.insert(group.id.clone(), group.clone());
        group
    }

    /// Add a rule to an existing security group
    pub fn add_security_group_rule(&self, opts: &CreateSecurityGroupRuleOpts) -> Option<SecurityGroupRule> {
        let mut state = self.lock();
        let id = state.next_id();
        let group = state.security_groups.get_mut(&opts.security_group_id)?;
        let rule = network::rule_from_opts(id, opts);
        group.rules.push(rule.clone());
        Some(rule)
    }

    /// Add a server group
    pub fn add_server_group(&self, name: &str, policy: &str) -> ServerGroup {
        let mut state = self.lock();
        let group = ServerGroup {
            id: state.next_id(),
            name: name.to_string(),
            policy: policy.to_string(),
            members: vec![],
        };
        state.server_groups.insert(group.id.clone(), group.clone());
        group
    }

    // Inspection and direct manipulation

    /// Servers currently known, including ones pending deletion
    pub fn servers(&self) -> Vec<Server> {
        self.lock().servers.values().map(|r| r.server.clone()).collect()
    }

    /// Request a server was created with (None for seeded servers)
    pub fn server_request(&self, id: &str) -> Option<CreateServerOpts> {
        self.lock().servers.get(id).and_then(|r| r.request.clone())
    }

    /// Whether a server delete was accepted but not yet completed
    pub fn is_server_deleting(&self, id: &str) -> bool {
        self.lock().servers.get(id).is_some_and(|r| r.deleting)
    }

    /// Forget an accepted delete, as Nova does when the compute host loses it
    pub fn abandon_server_delete(&self, id: &str) {
        if let Some(record) = self.lock().servers.get_mut(id) {
            record.deleting = false;
            record.server.task_state = None;
        }
    }

    pub fn set_server_status(&self, id: &str, status: &str) {
        if let Some(record) = self.lock().servers.get_mut(id) {
            record.server.status = status.to_string();
        }
    }

    pub fn volumes(&self) -> Vec<Volume> {
        self.lock().volumes.values().cloned().collect()
    }

    pub fn set_volume_status(&self, id: &str, status: &str) {
        if let Some(volume) = self.lock().volumes.get_mut(id) {
            volume.status = status.to_string();
        }
    }

    /// Remove a volume behind the system's back
    pub fn remove_volume(&self, id: &str) {
        self.lock().volumes.remove(id);
    }

    pub fn ports(&self) -> Vec<Port> {
        self.lock().ports.values().cloned().collect()
    }

    pub fn trunks(&self) -> Vec<Trunk> {
        self.lock().trunks.values().cloned().collect()
    }

    pub fn security_groups(&self) -> Vec<SecurityGroup> {
        self.lock().security_groups.values().cloned().collect()
    }

    pub fn floating_ips(&self) -> Vec<FloatingIp> {
        self.lock().floating_ips.values().cloned().collect()
    }

    pub fn server_groups(&self) -> Vec<ServerGroup> {
        self.lock().server_groups.values().cloned().collect()
    }

    pub fn load_balancers(&self) -> Vec<LoadBalancer> {
        self.lock().load_balancers.values().cloned().collect()
    }

    pub fn set_load_balancer_status(&self, id: &str, status: ProvisioningStatus) {
        if let Some(lb) = self.lock().load_balancers.get_mut(id) {
            lb.provisioning_status = status;
        }
    }

    pub fn listeners(&self) -> Vec<Listener> {
        self.lock().listeners.values().cloned().collect()
    }

    pub fn pools(&self) -> Vec<Pool> {
        self.lock().pools.values().cloned().collect()
    }

    /// Members of every pool as (pool ID, member)
    pub fn members(&self) -> Vec<(String, Member)> {
        self.lock()
            .members
            .values()
            .map(|r| (r.pool_id.clone(), r.member.clone()))
            .collect()
    }

    pub fn monitors(&self) -> Vec<Monitor> {
        self.lock().monitors.values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl OpenStackClientTrait for MockOpenStackClient {
    fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    // Compute Operations - delegated to compute module
    async fn list_servers(&self, filter: &ServerFilter) -> Result<Vec<Server>, OpenStackError> {
        compute::list_servers(self, filter)
    }

    async fn get_server(&self, id: &str) -> Result<Server, OpenStackError> {
        compute::get_server(self, id)
    }

    async fn create_server(&self, opts: &CreateServerOpts) -> Result<Server, OpenStackError> {
        compute::create_server(self, opts)
    }

    async fn delete_server(&self, id: &str) -> Result<(), OpenStackError> {
        compute::delete_server(self, id)
    }

    async fn list_flavors(&self) -> Result<Vec<Flavor>, OpenStackError> {
        compute::list_flavors(self)
    }

    async fn get_flavor(&self, id: &str) -> Result<Flavor, OpenStackError> {
        compute::get_flavor(self, id)
    }

    async fn list_server_groups(&self) -> Result<Vec<ServerGroup>, OpenStackError> {
        compute::list_server_groups(self)
    }

    async fn get_server_group(&self, id: &str) -> Result<ServerGroup, OpenStackError> {
        compute::get_server_group(self, id)
    }

    async fn create_server_group(&self, opts: &CreateServerGroupOpts) -> Result<ServerGroup, OpenStackError> {
        compute::create_server_group(self, opts)
    }

    async fn delete_server_group(&self, id: &str) -> Result<(), OpenStackError> {
        compute::delete_server_group(self, id)
    }

    // Image Operations - delegated to image module
    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<Image>, OpenStackError> {
        image::list_images(self, filter)
    }

    async fn get_image(&self, id: &str) -> Result<Image, OpenStackError> {
        image::get_image(self, id)
    }

    // Block Storage Operations - delegated to volume module
    async fn list_volumes(&self, filter: &VolumeFilter) -> Result<Vec<Volume>, OpenStackError> {
        volume::list_volumes(self, filter)
    }

    async fn get_volume(&self, id: &str) -> Result<Volume, OpenStackError> {
        volume::get_volume(self, id)
    }

    async fn create_volume(&self, opts: &CreateVolumeOpts) -> Result<Volume, OpenStackError> {
        volume::create_volume(self, opts)
    }

    async fn delete_volume(&self, id: &str) -> Result<(), OpenStackError> {
        volume::delete_volume(self, id)
    }

    // Network Operations - delegated to network module
    async fn list_networks(&self, filter: &NetworkFilter) -> Result<Vec<Network>, OpenStackError> {
        network::list_networks(self, filter)
    }

    async fn get_network(&self, id: &str) -> Result<Network, OpenStackError> {
        network::get_network(self, id)
    }

    async fn list_subnets(&self, filter: &SubnetFilter) -> Result<Vec<Subnet>, OpenStackError> {
        network::list_subnets(self, filter)
    }

    async fn list_ports(&self, filter: &PortFilter) -> Result<Vec<Port>, OpenStackError> {
        network::list_ports(self, filter)
    }

    async fn get_port(&self, id: &str) -> Result<Port, OpenStackError> {
        network::get_port(self, id)
    }

    async fn create_port(&self, opts: &CreatePortOpts) -> Result<Port, OpenStackError> {
        network::create_port(self, opts)
    }

    async fn delete_port(&self, id: &str) -> Result<(), OpenStackError> {
        network::delete_port(self, id)
    }

    async fn replace_tags(&self, resource: TaggedResource, id: &str, tags: &[String]) -> Result<(), OpenStackError> {
        network::replace_tags(self, resource, id, tags)
    }

    async fn list_trunks(&self, filter: &TrunkFilter) -> Result<Vec<Trunk>, OpenStackError> {
        network::list_trunks(self, filter)
    }

    async fn create_trunk(&self, opts: &CreateTrunkOpts) -> Result<Trunk, OpenStackError> {
        network::create_trunk(self, opts)
    }

    async fn delete_trunk(&self, id: &str) -> Result<(), OpenStackError> {
        network::delete_trunk(self, id)
    }

    async fn list_trunk_subports(&self, trunk_id: &str) -> Result<Vec<Subport>, OpenStackError> {
        network::list_trunk_subports(self, trunk_id)
    }

    async fn remove_subports(&self, trunk_id: &str, port_ids: &[String]) -> Result<(), OpenStackError> {
        network::remove_subports(self, trunk_id, port_ids)
    }

    async fn list_security_groups(&self, filter: &SecurityGroupFilter) -> Result<Vec<SecurityGroup>, OpenStackError> {
        network::list_security_groups(self, filter)
    }

    async fn get_security_group(&self, id: &str) -> Result<SecurityGroup, OpenStackError> {
        network::get_security_group(self, id)
    }

    async fn create_security_group(&self, opts: &CreateSecurityGroupOpts) -> Result<SecurityGroup, OpenStackError> {
        network::create_security_group(self, opts)
    }

    async fn delete_security_group(&self, id: &str) -> Result<(), OpenStackError> {
        network::delete_security_group(self, id)
    }

    async fn create_security_group_rule(&self, opts: &CreateSecurityGroupRuleOpts) -> Result<SecurityGroupRule, OpenStackError> {
        network::create_security_group_rule(self, opts)
    }

    async fn delete_security_group_rule(&self, id: &str) -> Result<(), OpenStackError> {
        network::delete_security_group_rule(self, id)
    }

    async fn list_floating_ips(&self, filter: &FloatingIpFilter) -> Result<Vec<FloatingIp>, OpenStackError> {
        network::list_floating_ips(self, filter)
    }

    async fn create_floating_ip(&self, opts: &CreateFloatingIpOpts) -> Result<FloatingIp, OpenStackError> {
        network::create_floating_ip(self, opts)
    }

    async fn associate_floating_ip(&self, id: &str, port_id: Option<&str>) -> Result<FloatingIp, OpenStackError> {
        network::associate_floating_ip(self, id, port_id)
    }

    async fn delete_floating_ip(&self, id: &str) -> Result<(), OpenStackError> {
        network::delete_floating_ip(self, id)
    }

    // Load Balancer Operations - delegated to loadbalancer module
    async fn list_load_balancers(&self, filter: &LoadBalancerFilter) -> Result<Vec<LoadBalancer>, OpenStackError> {
        loadbalancer::list_load_balancers(self, filter)
    }

    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer, OpenStackError> {
        loadbalancer::get_load_balancer(self, id)
    }

    async fn create_load_balancer(&self, opts: &CreateLoadBalancerOpts) -> Result<LoadBalancer, OpenStackError> {
        loadbalancer::create_load_balancer(self, opts)
    }

    async fn delete_load_balancer(&self, id: &str, cascade: bool) -> Result<(), OpenStackError> {
        loadbalancer::delete_load_balancer(self, id, cascade)
    }

    async fn list_listeners(&self, filter: &ListenerFilter) -> Result<Vec<Listener>, OpenStackError> {
        loadbalancer::list_listeners(self, filter)
    }

    async fn create_listener(&self, opts: &CreateListenerOpts) -> Result<Listener, OpenStackError> {
        loadbalancer::create_listener(self, opts)
    }

    async fn update_listener_allowed_cidrs(&self, id: &str, allowed_cidrs: &[String]) -> Result<Listener, OpenStackError> {
        loadbalancer::update_listener_allowed_cidrs(self, id, allowed_cidrs)
    }

    async fn delete_listener(&self, id: &str) -> Result<(), OpenStackError> {
        loadbalancer::delete_listener(self, id)
    }

    async fn list_pools(&self, filter: &PoolFilter) -> Result<Vec<Pool>, OpenStackError> {
        loadbalancer::list_pools(self, filter)
    }

    async fn create_pool(&self, opts: &CreatePoolOpts) -> Result<Pool, OpenStackError> {
        loadbalancer::create_pool(self, opts)
    }

    async fn delete_pool(&self, id: &str) -> Result<(), OpenStackError> {
        loadbalancer::delete_pool(self, id)
    }

    async fn list_members(&self, pool_id: &str, filter: &MemberFilter) -> Result<Vec<Member>, OpenStackError> {
        loadbalancer::list_members(self, pool_id, filter)
    }

    async fn create_member(&self, pool_id: &str, opts: &CreateMemberOpts) -> Result<Member, OpenStackError> {
        loadbalancer::create_member(self, pool_id, opts)
    }

    async fn delete_member(&self, pool_id: &str, member_id: &str) -> Result<(), OpenStackError> {
        loadbalancer::delete_member(self, pool_id, member_id)
    }

    async fn list_monitors(&self, filter: &MonitorFilter) -> Result<Vec<Monitor>, OpenStackError> {
        loadbalancer::list_monitors(self, filter)
    }

    async fn create_monitor(&self, opts: &CreateMonitorOpts) -> Result<Monitor, OpenStackError> {
        loadbalancer::create_monitor(self, opts)
    }

    async fn delete_monitor(&self, id: &str) -> Result<(), OpenStackError> {
        loadbalancer::delete_monitor(self, id)
    }
}

/// Every tag in `wanted` is present in `tags`
pub(crate) fn has_tags(tags: &[String], wanted: &[String]) -> bool {
    wanted.iter().all(|t| tags.contains(t))
}

/// `None` in a filter matches everything
pub(crate) fn matches(wanted: Option<&String>, actual: &str) -> bool {
    wanted.is_none_or(|w| w == actual)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ids_are_deterministic() {
        let a = MockOpenStackClient::new();
        let b = MockOpenStackClient::new();
        assert_eq!(a.add_network("n").id, b.add_network("n").id);
        assert_eq!(a.add_network("n").id, "00000000-0000-0000-0000-000000000002");
    }

    #[tokio::test]
    async fn test_fail_next_is_one_shot_and_recorded() {
        let client = MockOpenStackClient::new();
        client.fail_next(
            Operation::ListNetworks,
            OpenStackError::Api {
                status: 503,
                message: "unavailable".to_string(),
            },
        );
        assert!(client.list_networks(&NetworkFilter::default()).await.is_err());
        assert!(client.list_networks(&NetworkFilter::default()).await.is_ok());
        assert_eq!(client.count(Operation::ListNetworks), 2);
        assert!(client.mutating_calls().is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let client = MockOpenStackClient::new();
        let other = client.clone();
        other.add_flavor("m1.small");
        assert_eq!(client.list_flavors().await.unwrap().len(), 1);
    }

    #[test]
    fn test_operation_classification() {
        assert!(Operation::CreatePort.is_mutating());
        assert!(Operation::RemoveSubports.is_mutating());
        assert!(Operation::UpdateListener.is_mutating());
        assert!(!Operation::ListPorts.is_mutating());
        assert!(!Operation::GetLoadBalancer.is_mutating());
    }
}
