//! Network and subnet lookup
//!
//! Networks are referenced, never created: a reference either names an ID
//! or a filter that must match exactly one network.

use crate::error::ControllerError;
use crate::services::{exactly_one, ReconcileOutcome};
use crds::{NetworkParam, NetworkStatus, SubnetParam, SubnetStatus};
use openstack_client::{Network, NetworkFilter, OpenStackClientTrait, Subnet, SubnetFilter};
use tracing::debug;

/// Resolve a network reference
pub async fn resolve_network(
    client: &dyn OpenStackClientTrait,
    param: &NetworkParam,
    external: Option<bool>,
) -> Result<Network, ControllerError> {
    if param.is_empty() {
        return Err(ControllerError::InvalidConfig("network reference is empty".to_string()));
    }
    if let Some(id) = &param.id {
        return match client.get_network(id).await {
            Ok(network) => Ok(network),
            Err(e) if e.is_not_found() => Err(ControllerError::InvalidConfig(format!("network {id} not found"))),
            Err(e) => Err(e.into()),
        };
    }

    let filter = param.filter.clone().unwrap_or_default();
    let label = filter.name.clone().unwrap_or_else(|| filter.tags.join(","));
    let networks = client
        .list_networks(&NetworkFilter {
            id: None,
            name: filter.name.clone(),
            tags: filter.tags.clone(),
            external,
        })
        .await?;
    let networks = networks
        .into_iter()
        .filter(|n| filter.name.as_ref().is_none_or(|name| &n.name == name))
        .collect();
    exactly_one(networks, "network", &label)
}

/// Resolve a subnet reference within a network
pub async fn resolve_subnet(
    client: &dyn OpenStackClientTrait,
    network_id: &str,
    param: &SubnetParam,
) -> Result<Subnet, ControllerError> {
    let filter = param.filter.clone().unwrap_or_default();
    if param.id.is_none() && filter.name.is_none() && filter.cidr.is_none() {
        return Err(ControllerError::InvalidConfig("subnet reference is empty".to_string()));
    }
    let label = param
        .id
        .clone()
        .or_else(|| filter.name.clone())
        .or_else(|| filter.cidr.clone())
        .unwrap_or_default();
    let subnets = client
        .list_subnets(&SubnetFilter {
            id: param.id.clone(),
            name: filter.name.clone(),
            network_id: Some(network_id.to_string()),
            cidr: filter.cidr.clone(),
        })
        .await?;
    let subnets = subnets
        .into_iter()
        .filter(|s| filter.name.as_ref().is_none_or(|name| &s.name == name))
        .collect();
    exactly_one(subnets, "subnet", &label)
}

/// Resolve the cluster network and the subnets machines use
///
/// No subnet references means every subnet of the network.
pub async fn reconcile_cluster_network(
    client: &dyn OpenStackClientTrait,
    param: &NetworkParam,
    subnet_params: &[SubnetParam],
    status: &mut Option<NetworkStatus>,
) -> Result<ReconcileOutcome, ControllerError> {
    let network = resolve_network(client, param, None).await?;

    let subnets = if subnet_params.is_empty() {
        client
            .list_subnets(&SubnetFilter {
                network_id: Some(network.id.clone()),
                ..Default::default()
            })
            .await?
    } else {
        let mut subnets = Vec::with_capacity(subnet_params.len());
        for param in subnet_params {
            subnets.push(resolve_subnet(client, &network.id, param).await?);
        }
        subnets
    };
    if subnets.is_empty() {
        return Err(ControllerError::InvalidConfig(format!(
            "network {} has no subnets",
            network.name
        )));
    }

    // Keep the network's own subnet order so "first subnet" is stable
    let mut ordered: Vec<SubnetStatus> = Vec::with_capacity(subnets.len());
    for id in &network.subnets {
        if let Some(subnet) = subnets.iter().find(|s| &s.id == id) {
            ordered.push(subnet_status(subnet));
        }
    }
    for subnet in &subnets {
        if !ordered.iter().any(|s| s.id == subnet.id) {
            ordered.push(subnet_status(subnet));
        }
    }

    debug!("Cluster network {} ({}) with {} subnet(s)", network.name, network.id, ordered.len());
    *status = Some(NetworkStatus {
        id: network.id,
        name: network.name,
        subnets: ordered,
    });
    Ok(ReconcileOutcome::Ready)
}

/// Resolve the external network used for floating IPs
pub async fn reconcile_external_network(
    client: &dyn OpenStackClientTrait,
    param: &NetworkParam,
    status: &mut Option<NetworkStatus>,
) -> Result<ReconcileOutcome, ControllerError> {
    let network = resolve_network(client, param, Some(true)).await?;
    if !network.external {
        return Err(ControllerError::InvalidConfig(format!(
            "network {} is not an external network",
            network.name
        )));
    }
    *status = Some(NetworkStatus {
        id: network.id,
        name: network.name,
        subnets: vec![],
    });
    Ok(ReconcileOutcome::Ready)
}

fn subnet_status(subnet: &Subnet) -> SubnetStatus {
    SubnetStatus {
        id: subnet.id.clone(),
        name: subnet.name.clone(),
        cidr: subnet.cidr.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{ResourceParam, SubnetFilter as SubnetRefFilter};
    use openstack_client::MockOpenStackClient;

    #[tokio::test]
    async fn test_resolve_network_by_name() {
        let mock = MockOpenStackClient::new();
        let net = mock.add_network("net-1");
        mock.add_network("net-10");

        let found = resolve_network(&mock, &ResourceParam::by_name("net-1"), None).await.unwrap();
        assert_eq!(found.id, net.id);
    }

    #[tokio::test]
    async fn test_missing_and_duplicate_networks() {
        let mock = MockOpenStackClient::new();
        assert!(matches!(
            resolve_network(&mock, &ResourceParam::by_name("net-1"), None).await,
            Err(ControllerError::InvalidConfig(_))
        ));

        mock.add_network("net-1");
        mock.add_network("net-1");
        assert!(matches!(
            resolve_network(&mock, &ResourceParam::by_name("net-1"), None).await,
            Err(ControllerError::AmbiguousResource(_))
        ));
    }

    #[tokio::test]
    async fn test_cluster_network_status_lists_subnets() {
        let mock = MockOpenStackClient::new();
        let net = mock.add_network("k8s");
        let first = mock.add_subnet(&net.id, "k8s-a", "10.6.0.0/24");
        mock.add_subnet(&net.id, "k8s-b", "10.6.1.0/24");

        let mut status = None;
        reconcile_cluster_network(&mock, &ResourceParam::by_name("k8s"), &[], &mut status)
            .await
            .unwrap();
        let status = status.unwrap();
        assert_eq!(status.id, net.id);
        assert_eq!(status.subnets.len(), 2);
        assert_eq!(status.subnets[0].id, first.id);

        let mut only_b = None;
        let params = vec![SubnetParam {
            id: None,
            filter: Some(SubnetRefFilter {
                name: None,
                cidr: Some("10.6.1.0/24".to_string()),
            }),
        }];
        reconcile_cluster_network(&mock, &ResourceParam::by_id(&net.id), &params, &mut only_b)
            .await
            .unwrap();
        assert_eq!(only_b.unwrap().subnets[0].name, "k8s-b");
    }

    #[tokio::test]
    async fn test_external_network_must_be_external() {
        let mock = MockOpenStackClient::new();
        mock.add_network("public");
        let mut status = None;
        assert!(
            reconcile_external_network(&mock, &ResourceParam::by_name("public"), &mut status)
                .await
                .is_err()
        );

        mock.add_external_network("ext-net");
        reconcile_external_network(&mock, &ResourceParam::by_name("ext-net"), &mut status)
            .await
            .unwrap();
        assert_eq!(status.unwrap().name, "ext-net");
    }
}
