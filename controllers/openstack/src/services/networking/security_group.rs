//! Security groups
//!
//! Groups are found by exact name before being created. Rules are diffed on
//! their identity (direction, ether type, protocol, port range, remote
//! group, remote prefix); descriptions are not part of a rule's identity, so
//! re-running with the same rule set issues no mutating calls.
//!
//! The cluster manages two groups, one for control-plane machines and one
//! for workers. Their rules reference each other, so both groups exist
//! before any rule is applied.

use crate::error::ControllerError;
use crate::services::{at_most_one, exactly_one, ignore_not_found, ClusterContext};
use crds::{
    ManagedGroupRole, ManagedSecurityGroups, OpenStackClusterStatus, SecurityGroupParam, SecurityGroupRuleSpec,
    SecurityGroupRuleStatus, SecurityGroupStatus,
};
use openstack_client::{
    CreateSecurityGroupOpts, CreateSecurityGroupRuleOpts, EtherType, OpenStackClientTrait, RuleDirection,
    SecurityGroup, SecurityGroupFilter, SecurityGroupRule, TaggedResource,
};
use tracing::{debug, info};

const ETCD_PORTS: (u16, u16) = (2379, 2380);
const KUBELET_PORT: u16 = 10250;
const BGP_PORT: u16 = 179;
const NODE_PORTS: (u16, u16) = (30000, 32767);
/// IP protocol number of IP-in-IP encapsulation
const IP_IN_IP_PROTOCOL: &str = "4";

/// Resolve a security group reference to its ID
pub async fn resolve_security_group(
    client: &dyn OpenStackClientTrait,
    param: &SecurityGroupParam,
) -> Result<String, ControllerError> {
    if param.is_empty() {
        return Err(ControllerError::InvalidConfig("security group reference is empty".to_string()));
    }
    if let Some(id) = &param.id {
        return match client.get_security_group(id).await {
            Ok(group) => Ok(group.id),
            Err(e) if e.is_not_found() => Err(ControllerError::InvalidConfig(format!(
                "security group {id} not found"
            ))),
            Err(e) => Err(e.into()),
        };
    }
    let filter = param.filter.clone().unwrap_or_default();
    let label = filter.name.clone().unwrap_or_else(|| filter.tags.join(","));
    let groups = client
        .list_security_groups(&SecurityGroupFilter {
            id: None,
            name: filter.name.clone(),
            tags: filter.tags.clone(),
        })
        .await?;
    let groups = groups
        .into_iter()
        .filter(|g| filter.name.as_ref().is_none_or(|name| &g.name == name))
        .collect();
    Ok(exactly_one(groups, "security group", &label)?.id)
}

/// A rule as it should exist in a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredRule {
    pub direction: RuleDirection,
    pub ether_type: EtherType,
    /// Lowercase protocol name or number; `None` is any protocol
    pub protocol: Option<String>,
    pub port_range_min: Option<u16>,
    pub port_range_max: Option<u16>,
    pub remote_group_id: Option<String>,
    pub remote_ip_prefix: Option<String>,
    pub description: Option<String>,
}

type RuleKey<'a> = (
    RuleDirection,
    EtherType,
    Option<String>,
    Option<u16>,
    Option<u16>,
    Option<&'a str>,
    Option<&'a str>,
);

impl DesiredRule {
    fn ingress(description: &str, protocol: Option<&str>, ports: Option<(u16, u16)>) -> Self {
        Self {
            direction: RuleDirection::Ingress,
            ether_type: EtherType::Ipv4,
            protocol: protocol.map(str::to_string),
            port_range_min: ports.map(|(min, _)| min),
            port_range_max: ports.map(|(_, max)| max),
            remote_group_id: None,
            remote_ip_prefix: None,
            description: Some(description.to_string()),
        }
    }

    fn egress(ether_type: EtherType) -> Self {
        Self {
            direction: RuleDirection::Egress,
            ether_type,
            protocol: None,
            port_range_min: None,
            port_range_max: None,
            remote_group_id: None,
            remote_ip_prefix: None,
            description: Some("Full open".to_string()),
        }
    }

    fn with_remote_group(mut self, group_id: &str) -> Self {
        self.remote_group_id = Some(group_id.to_string());
        self
    }

    fn key(&self) -> RuleKey<'_> {
        (
            self.direction,
            self.ether_type,
            normalize_protocol(self.protocol.as_deref()),
            self.port_range_min,
            self.port_range_max,
            self.remote_group_id.as_deref(),
            self.remote_ip_prefix.as_deref(),
        )
    }

    fn matches(&self, rule: &SecurityGroupRule) -> bool {
        self.key()
            == (
                rule.direction,
                rule.ethertype,
                normalize_protocol(rule.protocol.as_deref()),
                rule.port_range_min,
                rule.port_range_max,
                rule.remote_group_id.as_deref(),
                rule.remote_ip_prefix.as_deref(),
            )
    }

    fn to_opts(&self, security_group_id: &str) -> CreateSecurityGroupRuleOpts {
        CreateSecurityGroupRuleOpts {
            security_group_id: security_group_id.to_string(),
            direction: self.direction,
            ethertype: self.ether_type,
            protocol: normalize_protocol(self.protocol.as_deref()),
            port_range_min: self.port_range_min,
            port_range_max: self.port_range_max,
            remote_group_id: self.remote_group_id.clone(),
            remote_ip_prefix: self.remote_ip_prefix.clone(),
            description: self.description.clone(),
        }
    }
}

fn normalize_protocol(protocol: Option<&str>) -> Option<String> {
    match protocol.map(str::to_ascii_lowercase) {
        Some(p) if p == "any" || p.is_empty() => None,
        other => other,
    }
}

fn direction_name(direction: RuleDirection) -> &'static str {
    match direction {
        RuleDirection::Ingress => "ingress",
        RuleDirection::Egress => "egress",
    }
}

fn ether_type_name(ether_type: EtherType) -> &'static str {
    match ether_type {
        EtherType::Ipv4 => "IPv4",
        EtherType::Ipv6 => "IPv6",
    }
}

fn rule_status(id: &str, rule: &DesiredRule) -> SecurityGroupRuleStatus {
    SecurityGroupRuleStatus {
        id: id.to_string(),
        direction: direction_name(rule.direction).to_string(),
        ether_type: ether_type_name(rule.ether_type).to_string(),
        protocol: normalize_protocol(rule.protocol.as_deref()),
        port_range_min: rule.port_range_min,
        port_range_max: rule.port_range_max,
        remote_group_id: rule.remote_group_id.clone(),
        remote_ip_prefix: rule.remote_ip_prefix.clone(),
        description: rule.description.clone(),
    }
}

/// Find a group by exact name, or create it; tags are merged in either way
pub async fn ensure_group(
    client: &dyn OpenStackClientTrait,
    name: &str,
    description: &str,
    tags: &[String],
) -> Result<SecurityGroup, ControllerError> {
    let existing = client
        .list_security_groups(&SecurityGroupFilter {
            name: Some(name.to_string()),
            ..Default::default()
        })
        .await?;
    let existing = existing.into_iter().filter(|g| g.name == name).collect();
    let mut group = match at_most_one(existing, "security group", name)? {
        Some(group) => group,
        None => {
            let group = client
                .create_security_group(&CreateSecurityGroupOpts {
                    name: name.to_string(),
                    description: Some(description.to_string()),
                })
                .await?;
            info!("Created security group {} ({})", group.name, group.id);
            group
        }
    };

    if !tags.iter().all(|t| group.tags.contains(t)) {
        let mut merged = group.tags.clone();
        merged.extend(tags.iter().filter(|t| !group.tags.contains(t)).cloned());
        client.replace_tags(TaggedResource::SecurityGroup, &group.id, &merged).await?;
        group.tags = merged;
    }
    Ok(group)
}

/// Make the rules of `group` equal to `desired`
///
/// Returns the applied rule set with OpenStack rule IDs, in `desired` order.
pub async fn apply_rules(
    client: &dyn OpenStackClientTrait,
    group: &SecurityGroup,
    desired: &[DesiredRule],
) -> Result<Vec<SecurityGroupRuleStatus>, ControllerError> {
    let mut unique: Vec<&DesiredRule> = Vec::with_capacity(desired.len());
    for rule in desired {
        if !unique.iter().any(|r| r.key() == rule.key()) {
            unique.push(rule);
        }
    }

    for rule in &group.rules {
        if !unique.iter().any(|d| d.matches(rule)) {
            debug!("Deleting rule {} from security group {}", rule.id, group.name);
            ignore_not_found(client.delete_security_group_rule(&rule.id).await)?;
        }
    }

    let mut applied = Vec::with_capacity(unique.len());
    for rule in unique {
        let id = match group.rules.iter().find(|r| rule.matches(r)) {
            Some(existing) => existing.id.clone(),
            None => {
                let created = client.create_security_group_rule(&rule.to_opts(&group.id)).await?;
                debug!("Created rule {} in security group {}", created.id, group.name);
                created.id
            }
        };
        applied.push(rule_status(&id, rule));
    }
    Ok(applied)
}

/// IDs of the two managed groups
#[derive(Debug, Clone)]
pub struct ManagedGroupIds {
    pub control_plane: String,
    pub worker: String,
}

impl ManagedGroupIds {
    fn get(&self, role: ManagedGroupRole) -> &str {
        match role {
            ManagedGroupRole::ControlPlane => &self.control_plane,
            ManagedGroupRole::Worker => &self.worker,
        }
    }
}

/// `k8s-cluster-<namespace>-<cluster>-secgroup-<role>`
pub fn managed_group_name(cluster: &ClusterContext, role: ManagedGroupRole) -> String {
    let suffix = match role {
        ManagedGroupRole::ControlPlane => "controlplane",
        ManagedGroupRole::Worker => "worker",
    };
    format!("k8s-cluster-{}-{}-secgroup-{}", cluster.namespace, cluster.name, suffix)
}

/// Expand a user rule into concrete rules, one per remote managed group
pub fn rules_from_spec(spec: &SecurityGroupRuleSpec, ids: &ManagedGroupIds) -> Result<Vec<DesiredRule>, ControllerError> {
    let direction = match spec.direction.to_ascii_lowercase().as_str() {
        "ingress" => RuleDirection::Ingress,
        "egress" => RuleDirection::Egress,
        other => {
            return Err(ControllerError::InvalidConfig(format!(
                "rule {:?}: unknown direction {other:?}",
                spec.description
            )));
        }
    };
    let ether_type = match spec.ether_type.as_deref() {
        None | Some("IPv4") => EtherType::Ipv4,
        Some("IPv6") => EtherType::Ipv6,
        Some(other) => {
            return Err(ControllerError::InvalidConfig(format!(
                "rule {:?}: unknown ether type {other:?}",
                spec.description
            )));
        }
    };
    if spec.remote_ip_prefix.is_some() && !spec.remote_managed_groups.is_empty() {
        return Err(ControllerError::InvalidConfig(format!(
            "rule {:?}: remoteIpPrefix and remoteManagedGroups are mutually exclusive",
            spec.description
        )));
    }

    let base = DesiredRule {
        direction,
        ether_type,
        protocol: spec.protocol.clone(),
        port_range_min: spec.port_range_min,
        port_range_max: spec.port_range_max,
        remote_group_id: None,
        remote_ip_prefix: spec.remote_ip_prefix.clone(),
        description: Some(spec.description.clone()),
    };
    if spec.remote_managed_groups.is_empty() {
        return Ok(vec![base]);
    }
    Ok(spec
        .remote_managed_groups
        .iter()
        .map(|role| base.clone().with_remote_group(ids.get(*role)))
        .collect())
}

fn from_cluster(rule: DesiredRule, ids: &ManagedGroupIds) -> [DesiredRule; 2] {
    [
        rule.clone().with_remote_group(&ids.control_plane),
        rule.with_remote_group(&ids.worker),
    ]
}

/// Rules of the control-plane group
pub fn control_plane_rules(
    managed: &ManagedSecurityGroups,
    api_server_port: u16,
    ids: &ManagedGroupIds,
) -> Result<Vec<DesiredRule>, ControllerError> {
    let mut rules = vec![DesiredRule::egress(EtherType::Ipv4), DesiredRule::egress(EtherType::Ipv6)];
    rules.push(DesiredRule::ingress(
        "Kubernetes API",
        Some("tcp"),
        Some((api_server_port, api_server_port)),
    ));
    if managed.allow_all_in_cluster_traffic {
        rules.extend(from_cluster(DesiredRule::ingress("In-cluster Ingress", None, None), ids));
    } else {
        rules.push(DesiredRule::ingress("Etcd", Some("tcp"), Some(ETCD_PORTS)).with_remote_group(&ids.control_plane));
        rules.extend(node_rules(ids));
    }
    for spec in managed.control_plane_rules.iter().chain(&managed.all_nodes_rules) {
        rules.extend(rules_from_spec(spec, ids)?);
    }
    Ok(rules)
}

/// Rules of the worker group
pub fn worker_rules(managed: &ManagedSecurityGroups, ids: &ManagedGroupIds) -> Result<Vec<DesiredRule>, ControllerError> {
    let mut rules = vec![DesiredRule::egress(EtherType::Ipv4), DesiredRule::egress(EtherType::Ipv6)];
    if managed.allow_all_in_cluster_traffic {
        rules.extend(from_cluster(DesiredRule::ingress("In-cluster Ingress", None, None), ids));
    } else {
        rules.push(DesiredRule::ingress("Node Port Services", Some("tcp"), Some(NODE_PORTS)));
        rules.extend(node_rules(ids));
    }
    for spec in managed.worker_rules.iter().chain(&managed.all_nodes_rules) {
        rules.extend(rules_from_spec(spec, ids)?);
    }
    Ok(rules)
}

/// Kubelet, BGP and IP-in-IP from every cluster machine
fn node_rules(ids: &ManagedGroupIds) -> Vec<DesiredRule> {
    let mut rules = Vec::with_capacity(6);
    rules.extend(from_cluster(
        DesiredRule::ingress("Kubelet API", Some("tcp"), Some((KUBELET_PORT, KUBELET_PORT))),
        ids,
    ));
    rules.extend(from_cluster(
        DesiredRule::ingress("BGP (calico)", Some("tcp"), Some((BGP_PORT, BGP_PORT))),
        ids,
    ));
    rules.extend(from_cluster(
        DesiredRule::ingress("IP-in-IP (calico)", Some(IP_IN_IP_PROTOCOL), None),
        ids,
    ));
    rules
}

/// Create both managed groups and bring their rules in line
pub async fn reconcile_managed_security_groups(
    client: &dyn OpenStackClientTrait,
    cluster: &ClusterContext,
    managed: &ManagedSecurityGroups,
    api_server_port: u16,
    status: &mut OpenStackClusterStatus,
) -> Result<(), ControllerError> {
    let mut tags = vec![cluster.ownership_tag()];
    tags.extend(cluster.tags.iter().cloned());

    let cp_name = managed_group_name(cluster, ManagedGroupRole::ControlPlane);
    let worker_name = managed_group_name(cluster, ManagedGroupRole::Worker);
    let control_plane = ensure_group(client, &cp_name, "Cluster API managed group", &tags).await?;
    let worker = ensure_group(client, &worker_name, "Cluster API managed group", &tags).await?;

    let ids = ManagedGroupIds {
        control_plane: control_plane.id.clone(),
        worker: worker.id.clone(),
    };
    let cp_rules = apply_rules(client, &control_plane, &control_plane_rules(managed, api_server_port, &ids)?).await?;
    status.control_plane_security_group = Some(SecurityGroupStatus {
        id: control_plane.id,
        name: control_plane.name,
        rules: cp_rules,
    });
    let worker_rules = apply_rules(client, &worker, &worker_rules(managed, &ids)?).await?;
    status.worker_security_group = Some(SecurityGroupStatus {
        id: worker.id,
        name: worker.name,
        rules: worker_rules,
    });
    Ok(())
}

/// Delete both managed groups
///
/// Rules pointing from one managed group at the other are removed first.
/// A group still attached to a port comes back as a conflict and the
/// delete is retried.
pub async fn delete_managed_security_groups(
    client: &dyn OpenStackClientTrait,
    cluster: &ClusterContext,
    status: &mut OpenStackClusterStatus,
) -> Result<(), ControllerError> {
    let mut groups = Vec::with_capacity(2);
    for (role, recorded) in [
        (ManagedGroupRole::ControlPlane, &status.control_plane_security_group),
        (ManagedGroupRole::Worker, &status.worker_security_group),
    ] {
        let name = managed_group_name(cluster, role);
        let found = match recorded {
            Some(recorded) => match client.get_security_group(&recorded.id).await {
                Ok(group) => vec![group],
                Err(e) if e.is_not_found() => vec![],
                Err(e) => return Err(e.into()),
            },
            None => client
                .list_security_groups(&SecurityGroupFilter {
                    name: Some(name.clone()),
                    ..Default::default()
                })
                .await?
                .into_iter()
                .filter(|g| g.name == name)
                .collect(),
        };
        groups.extend(found);
    }

    let ids: Vec<String> = groups.iter().map(|g| g.id.clone()).collect();
    for group in &groups {
        for rule in &group.rules {
            if rule.remote_group_id.as_ref().is_some_and(|remote| ids.contains(remote)) {
                ignore_not_found(client.delete_security_group_rule(&rule.id).await)?;
            }
        }
    }
    for group in &groups {
        ignore_not_found(client.delete_security_group(&group.id).await)?;
        info!("Deleted security group {} ({})", group.name, group.id);
    }

    status.control_plane_security_group = None;
    status.worker_security_group = None;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use openstack_client::{MockOpenStackClient, Operation};

    fn cluster() -> ClusterContext {
        ClusterContext {
            name: "c1".to_string(),
            namespace: "default".to_string(),
            manages_security_groups: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_managed_groups_are_created_then_stable() {
        let mock = MockOpenStackClient::new();
        let mut status = OpenStackClusterStatus::default();
        let managed = ManagedSecurityGroups::default();

        reconcile_managed_security_groups(&mock, &cluster(), &managed, 6443, &mut status)
            .await
            .unwrap();

        let cp = status.control_plane_security_group.clone().unwrap();
        let worker = status.worker_security_group.clone().unwrap();
        assert_eq!(cp.name, "k8s-cluster-default-c1-secgroup-controlplane");
        assert!(cp.rules.iter().any(|r| r.port_range_min == Some(6443)));
        assert!(cp
            .rules
            .iter()
            .any(|r| r.port_range_min == Some(2379) && r.remote_group_id.as_deref() == Some(cp.id.as_str())));
        assert!(worker.rules.iter().any(|r| r.port_range_min == Some(30000)));
        assert!(worker
            .rules
            .iter()
            .any(|r| r.protocol.as_deref() == Some("4") && r.remote_group_id.as_deref() == Some(worker.id.as_str())));
        let groups = mock.security_groups();
        assert!(groups.iter().all(|g| g.tags.contains(&"stackops-cluster-default-c1".to_string())));

        mock.clear_calls();
        let before = status.clone();
        reconcile_managed_security_groups(&mock, &cluster(), &managed, 6443, &mut status)
            .await
            .unwrap();
        assert!(mock.mutating_calls().is_empty());
        assert_eq!(status, before);
    }

    #[tokio::test]
    async fn test_apply_rules_removes_extra_and_ignores_description() {
        let mock = MockOpenStackClient::new();
        let group = mock.add_security_group("sg");
        let ssh = DesiredRule::ingress("SSH", Some("tcp"), Some((22, 22)));
        let stray = mock
            .add_security_group_rule(&DesiredRule::ingress("old", Some("tcp"), Some((80, 80))).to_opts(&group.id))
            .unwrap();
        mock.add_security_group_rule(&DesiredRule::ingress("renamed", Some("TCP"), Some((22, 22))).to_opts(&group.id));
        let group = mock.security_groups().into_iter().find(|g| g.id == group.id).unwrap();

        let applied = apply_rules(&mock, &group, &[ssh.clone(), ssh]).await.unwrap();

        assert_eq!(applied.len(), 1);
        assert_eq!(mock.mutating_operations(), vec![Operation::DeleteSecurityGroupRule]);
        assert_eq!(mock.calls().last().unwrap().target, stray.id);
    }

    #[test]
    fn test_user_rule_expands_per_remote_group() {
        let ids = ManagedGroupIds {
            control_plane: "cp".to_string(),
            worker: "w".to_string(),
        };
        let spec = SecurityGroupRuleSpec {
            description: "metrics".to_string(),
            direction: "ingress".to_string(),
            ether_type: None,
            protocol: Some("tcp".to_string()),
            port_range_min: Some(9100),
            port_range_max: Some(9100),
            remote_ip_prefix: None,
            remote_managed_groups: vec![ManagedGroupRole::ControlPlane, ManagedGroupRole::Worker],
        };
        let rules = rules_from_spec(&spec, &ids).unwrap();
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[1].remote_group_id.as_deref(), Some("w"));

        let bad = SecurityGroupRuleSpec {
            direction: "sideways".to_string(),
            ..spec
        };
        assert!(matches!(rules_from_spec(&bad, &ids), Err(ControllerError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_allow_all_replaces_per_port_rules() {
        let mock = MockOpenStackClient::new();
        let mut status = OpenStackClusterStatus::default();
        let managed = ManagedSecurityGroups {
            allow_all_in_cluster_traffic: true,
            ..Default::default()
        };
        reconcile_managed_security_groups(&mock, &cluster(), &managed, 6443, &mut status)
            .await
            .unwrap();
        let worker = status.worker_security_group.unwrap();
        assert!(worker.rules.iter().all(|r| r.port_range_min.is_none()));
        assert_eq!(worker.rules.len(), 4);
    }

    #[tokio::test]
    async fn test_delete_managed_groups() {
        let mock = MockOpenStackClient::new();
        let mut status = OpenStackClusterStatus::default();
        reconcile_managed_security_groups(&mock, &cluster(), &ManagedSecurityGroups::default(), 6443, &mut status)
            .await
            .unwrap();

        delete_managed_security_groups(&mock, &cluster(), &mut status).await.unwrap();
        assert!(mock.security_groups().is_empty());
        assert!(status.control_plane_security_group.is_none());

        // Nothing left: found by name, nothing to do
        delete_managed_security_groups(&mock, &cluster(), &mut status).await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_group_names_are_ambiguous() {
        let mock = MockOpenStackClient::new();
        mock.add_security_group("k8s-cluster-default-c1-secgroup-controlplane");
        mock.add_security_group("k8s-cluster-default-c1-secgroup-controlplane");
        let mut status = OpenStackClusterStatus::default();
        let result =
            reconcile_managed_security_groups(&mock, &cluster(), &ManagedSecurityGroups::default(), 6443, &mut status)
                .await;
        assert!(matches!(result, Err(ControllerError::AmbiguousResource(_))));
        assert_eq!(mock.count(Operation::CreateSecurityGroup), 0);
    }
}
