//! Test utilities for unit testing the engine and reconcilers
//!
//! Seeds a mock cloud with the network, image and flavor every machine
//! test needs, and builds specs and contexts pointing at them.

#[cfg(test)]
use crate::services::ClusterContext;
#[cfg(test)]
use crds::*;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use openstack_client::{Flavor, Image, MockOpenStackClient, Network, Subnet};

/// Resources seeded into a mock cloud
#[cfg(test)]
pub struct TestCloud {
    pub mock: MockOpenStackClient,
    pub network: Network,
    pub subnet: Subnet,
    pub image: Image,
    pub flavor: Flavor,
}

/// Mock cloud with a cluster network, an image and a flavor
#[cfg(test)]
pub fn seed_cloud() -> TestCloud {
    let mock = MockOpenStackClient::new();
    let network = mock.add_network("k8s-net");
    let subnet = mock.add_subnet(&network.id, "k8s-subnet", "10.6.0.0/24");
    let image = mock.add_image("ubuntu-22.04", &["k8s"]);
    let flavor = mock.add_flavor("m1.small");
    TestCloud {
        mock,
        network,
        subnet,
        image,
        flavor,
    }
}

/// Cluster context whose network is the seeded cluster network
#[cfg(test)]
pub fn cluster_context(cloud: &TestCloud) -> ClusterContext {
    ClusterContext {
        name: "c1".to_string(),
        namespace: "default".to_string(),
        network: Some(NetworkStatus {
            id: cloud.network.id.clone(),
            name: cloud.network.name.clone(),
            subnets: vec![SubnetStatus {
                id: cloud.subnet.id.clone(),
                name: cloud.subnet.name.clone(),
                cidr: cloud.subnet.cidr.clone(),
            }],
        }),
        ..Default::default()
    }
}

/// Minimal machine spec: seeded image by name, seeded flavor, one default port
#[cfg(test)]
pub fn machine_spec() -> OpenStackMachineSpec {
    OpenStackMachineSpec {
        cluster_name: "c1".to_string(),
        identity_ref: IdentityRef {
            name: "cloud-config".to_string(),
            cloud_name: "openstack".to_string(),
        },
        image: ResourceParam::by_name("ubuntu-22.04"),
        flavor: Some("m1.small".to_string()),
        flavor_id: None,
        ssh_key_name: None,
        server_group: None,
        security_groups: None,
        ports: vec![],
        trunk: false,
        root_volume: None,
        tags: vec![],
        server_metadata: vec![],
        user_data: None,
        config_drive: None,
        availability_zone: None,
        control_plane: false,
        floating_ip: None,
    }
}

/// Port on a named network with an optional name suffix
#[cfg(test)]
pub fn port_on(network: &str, suffix: Option<&str>) -> PortOpts {
    PortOpts {
        network: Some(ResourceParam::by_name(network)),
        name_suffix: suffix.map(str::to_string),
        ..Default::default()
    }
}

/// Helper to create a test OpenStackMachine
#[cfg(test)]
pub fn create_test_machine(name: &str, namespace: &str, spec: OpenStackMachineSpec) -> OpenStackMachine {
    OpenStackMachine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// Helper to create a test OpenStackCluster on a named network
#[cfg(test)]
pub fn create_test_cluster(name: &str, namespace: &str, network: &str) -> OpenStackCluster {
    OpenStackCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: OpenStackClusterSpec {
            identity_ref: IdentityRef {
                name: "cloud-config".to_string(),
                cloud_name: "openstack".to_string(),
            },
            network: ResourceParam::by_name(network),
            subnets: vec![],
            external_network: None,
            managed_security_groups: None,
            api_server_load_balancer: None,
            api_server_port: DEFAULT_API_SERVER_PORT,
            disable_api_server_floating_ip: false,
            tags: vec![],
        },
        status: None,
    }
}
