//! OpenStack API client
//!
//! Implements [`OpenStackClientTrait`] over the compute, network, image,
//! block-storage and load-balancer REST APIs using a Keystone token.

use crate::auth::{self, AuthOptions, EndpointOptions};
use crate::common::query::with_query;
use crate::common::{unwrap_key, HttpClient, Service};
use crate::error::OpenStackError;
use crate::models::*;
use crate::openstack_trait::OpenStackClientTrait;
use base64::Engine;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// OpenStack API client
#[derive(Debug, Clone)]
pub struct OpenStackClient {
    http: HttpClient,
    region: Option<String>,
}

impl OpenStackClient {
    /// Authenticate against Keystone and build a client for the resolved endpoints
    ///
    /// # Arguments
    /// * `auth` - Credentials and project scope
    /// * `endpoint_opts` - Region and interface used to pick catalog endpoints
    /// * `timeout` - Per-request timeout applied to every call
    pub async fn authenticate(
        auth: &AuthOptions,
        endpoint_opts: &EndpointOptions,
        timeout: Duration,
    ) -> Result<Self, OpenStackError> {
        let client = Client::builder().timeout(timeout).build()?;
        let session = auth::authenticate(&client, auth, endpoint_opts).await?;
        debug!("Authenticated against {}", auth.auth_url);
        Ok(Self {
            http: HttpClient::new(client, session.token, session.endpoints),
            region: endpoint_opts.region.clone(),
        })
    }

    /// Build a client from an already prepared HTTP wrapper
    pub fn from_http(http: HttpClient, region: Option<String>) -> Self {
        Self { http, region }
    }
}

/// JSON body for `POST /servers`
pub fn server_create_body(opts: &CreateServerOpts) -> serde_json::Value {
    let mut server = serde_json::json!({
        "name": opts.name,
        "flavorRef": opts.flavor_ref,
        "networks": opts.ports.iter().map(|id| serde_json::json!({ "port": id })).collect::<Vec<_>>(),
    });
    if let Some(image) = &opts.image_ref {
        server["imageRef"] = serde_json::json!(image);
    }
    if let Some(key) = &opts.key_name {
        server["key_name"] = serde_json::json!(key);
    }
    if let Some(user_data) = &opts.user_data {
        server["user_data"] =
            serde_json::json!(base64::engine::general_purpose::STANDARD.encode(user_data.as_bytes()));
    }
    if !opts.metadata.is_empty() {
        server["metadata"] = serde_json::json!(opts.metadata);
    }
    if let Some(config_drive) = opts.config_drive {
        server["config_drive"] = serde_json::json!(config_drive);
    }
    if let Some(az) = &opts.availability_zone {
        server["availability_zone"] = serde_json::json!(az);
    }
    if !opts.tags.is_empty() {
        server["tags"] = serde_json::json!(opts.tags);
    }
    if !opts.block_devices.is_empty() {
        server["block_device_mapping_v2"] = serde_json::json!(opts.block_devices);
    }

    let mut body = serde_json::json!({ "server": server });
    if let Some(group) = &opts.server_group_id {
        body["os:scheduler_hints"] = serde_json::json!({ "group": group });
    }
    body
}

#[async_trait::async_trait]
impl OpenStackClientTrait for OpenStackClient {
    fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    // Compute Operations

    async fn list_servers(&self, filter: &ServerFilter) -> Result<Vec<Server>, OpenStackError> {
        let body = self.http.get(Service::Compute, &with_query("/servers/detail", filter)).await?;
        unwrap_key(body, "servers")
    }

    async fn get_server(&self, id: &str) -> Result<Server, OpenStackError> {
        let body = self.http.get(Service::Compute, &format!("/servers/{}", id)).await?;
        unwrap_key(body, "server")
    }

    async fn create_server(&self, opts: &CreateServerOpts) -> Result<Server, OpenStackError> {
        // The create response only carries the ID; fetch the full record
        let body = self.http.post(Service::Compute, "/servers", &server_create_body(opts)).await?;
        let created: IdOnly = unwrap_key(body, "server")?;
        self.get_server(&created.id).await
    }

    async fn delete_server(&self, id: &str) -> Result<(), OpenStackError> {
        self.http.delete(Service::Compute, &format!("/servers/{}", id)).await
    }

    async fn list_flavors(&self) -> Result<Vec<Flavor>, OpenStackError> {
        let body = self.http.get(Service::Compute, "/flavors/detail").await?;
        unwrap_key(body, "flavors")
    }

    async fn get_flavor(&self, id: &str) -> Result<Flavor, OpenStackError> {
        let body = self.http.get(Service::Compute, &format!("/flavors/{}", id)).await?;
        unwrap_key(body, "flavor")
    }

    async fn list_server_groups(&self) -> Result<Vec<ServerGroup>, OpenStackError> {
        let body = self.http.get(Service::Compute, "/os-server-groups").await?;
        unwrap_key(body, "server_groups")
    }

    async fn get_server_group(&self, id: &str) -> Result<ServerGroup, OpenStackError> {
        let body = self.http.get(Service::Compute, &format!("/os-server-groups/{}", id)).await?;
        unwrap_key(body, "server_group")
    }

    async fn create_server_group(&self, opts: &CreateServerGroupOpts) -> Result<ServerGroup, OpenStackError> {
        let request = serde_json::json!({ "server_group": opts });
        let body = self.http.post(Service::Compute, "/os-server-groups", &request).await?;
        unwrap_key(body, "server_group")
    }

    async fn delete_server_group(&self, id: &str) -> Result<(), OpenStackError> {
        self.http.delete(Service::Compute, &format!("/os-server-groups/{}", id)).await
    }

    // Image Operations

    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<Image>, OpenStackError> {
        let body = self.http.get(Service::Image, &with_query("/images", filter)).await?;
        unwrap_key(body, "images")
    }

    async fn get_image(&self, id: &str) -> Result<Image, OpenStackError> {
        // Glance returns the image object without a wrapper key
        self.http.get(Service::Image, &format!("/images/{}", id)).await
    }

    // Block Storage Operations

    async fn list_volumes(&self, filter: &VolumeFilter) -> Result<Vec<Volume>, OpenStackError> {
        let body = self.http.get(Service::Volume, &with_query("/volumes/detail", filter)).await?;
        unwrap_key(body, "volumes")
    }

    async fn get_volume(&self, id: &str) -> Result<Volume, OpenStackError> {
        let body = self.http.get(Service::Volume, &format!("/volumes/{}", id)).await?;
        unwrap_key(body, "volume")
    }

    async fn create_volume(&self, opts: &CreateVolumeOpts) -> Result<Volume, OpenStackError> {
        let request = serde_json::json!({ "volume": opts });
        let body = self.http.post(Service::Volume, "/volumes", &request).await?;
        unwrap_key(body, "volume")
    }

    async fn delete_volume(&self, id: &str) -> Result<(), OpenStackError> {
        self.http.delete(Service::Volume, &format!("/volumes/{}", id)).await
    }

    // Network Operations

    async fn list_networks(&self, filter: &NetworkFilter) -> Result<Vec<Network>, OpenStackError> {
        let body = self.http.get(Service::Network, &with_query("/networks", filter)).await?;
        unwrap_key(body, "networks")
    }

    async fn get_network(&self, id: &str) -> Result<Network, OpenStackError> {
        let body = self.http.get(Service::Network, &format!("/networks/{}", id)).await?;
        unwrap_key(body, "network")
    }

    async fn list_subnets(&self, filter: &SubnetFilter) -> Result<Vec<Subnet>, OpenStackError> {
        let body = self.http.get(Service::Network, &with_query("/subnets", filter)).await?;
        unwrap_key(body, "subnets")
    }

    async fn list_ports(&self, filter: &PortFilter) -> Result<Vec<Port>, OpenStackError> {
        let body = self.http.get(Service::Network, &with_query("/ports", filter)).await?;
        unwrap_key(body, "ports")
    }

    async fn get_port(&self, id: &str) -> Result<Port, OpenStackError> {
        let body = self.http.get(Service::Network, &format!("/ports/{}", id)).await?;
        unwrap_key(body, "port")
    }

    async fn create_port(&self, opts: &CreatePortOpts) -> Result<Port, OpenStackError> {
        let request = serde_json::json!({ "port": opts });
        let body = self.http.post(Service::Network, "/ports", &request).await?;
        unwrap_key(body, "port")
    }

    async fn delete_port(&self, id: &str) -> Result<(), OpenStackError> {
        self.http.delete(Service::Network, &format!("/ports/{}", id)).await
    }

    async fn replace_tags(&self, resource: TaggedResource, id: &str, tags: &[String]) -> Result<(), OpenStackError> {
        let request = serde_json::json!({ "tags": tags });
        let path = format!("/{}/{}/tags", resource.collection(), id);
        let _: serde_json::Value = self.http.put(Service::Network, &path, &request).await?;
        Ok(())
    }

    async fn list_trunks(&self, filter: &TrunkFilter) -> Result<Vec<Trunk>, OpenStackError> {
        let body = self.http.get(Service::Network, &with_query("/trunks", filter)).await?;
        unwrap_key(body, "trunks")
    }

    async fn create_trunk(&self, opts: &CreateTrunkOpts) -> Result<Trunk, OpenStackError> {
        let request = serde_json::json!({ "trunk": opts });
        let body = self.http.post(Service::Network, "/trunks", &request).await?;
        unwrap_key(body, "trunk")
    }

    async fn delete_trunk(&self, id: &str) -> Result<(), OpenStackError> {
        self.http.delete(Service::Network, &format!("/trunks/{}", id)).await
    }

    async fn list_trunk_subports(&self, trunk_id: &str) -> Result<Vec<Subport>, OpenStackError> {
        let body = self
            .http
            .get(Service::Network, &format!("/trunks/{}/get_subports", trunk_id))
            .await?;
        unwrap_key(body, "sub_ports")
    }

    async fn remove_subports(&self, trunk_id: &str, port_ids: &[String]) -> Result<(), OpenStackError> {
        let request = serde_json::json!({
            "sub_ports": port_ids.iter().map(|id| serde_json::json!({ "port_id": id })).collect::<Vec<_>>()
        });
        let path = format!("/trunks/{}/remove_subports", trunk_id);
        let _: serde_json::Value = self.http.put(Service::Network, &path, &request).await?;
        Ok(())
    }

    async fn list_security_groups(&self, filter: &SecurityGroupFilter) -> Result<Vec<SecurityGroup>, OpenStackError> {
        let body = self
            .http
            .get(Service::Network, &with_query("/security-groups", filter))
            .await?;
        unwrap_key(body, "security_groups")
    }

    async fn get_security_group(&self, id: &str) -> Result<SecurityGroup, OpenStackError> {
        let body = self
            .http
            .get(Service::Network, &format!("/security-groups/{}", id))
            .await?;
        unwrap_key(body, "security_group")
    }

    async fn create_security_group(&self, opts: &CreateSecurityGroupOpts) -> Result<SecurityGroup, OpenStackError> {
        let request = serde_json::json!({ "security_group": opts });
        let body = self.http.post(Service::Network, "/security-groups", &request).await?;
        unwrap_key(body, "security_group")
    }

    async fn delete_security_group(&self, id: &str) -> Result<(), OpenStackError> {
        self.http
            .delete(Service::Network, &format!("/security-groups/{}", id))
            .await
    }

    async fn create_security_group_rule(
        &self,
        opts: &CreateSecurityGroupRuleOpts,
    ) -> Result<SecurityGroupRule, OpenStackError> {
        let request = serde_json::json!({ "security_group_rule": opts });
        let body = self
            .http
            .post(Service::Network, "/security-group-rules", &request)
            .await?;
        unwrap_key(body, "security_group_rule")
    }

    async fn delete_security_group_rule(&self, id: &str) -> Result<(), OpenStackError> {
        self.http
            .delete(Service::Network, &format!("/security-group-rules/{}", id))
            .await
    }

    async fn list_floating_ips(&self, filter: &FloatingIpFilter) -> Result<Vec<FloatingIp>, OpenStackError> {
        let body = self.http.get(Service::Network, &with_query("/floatingips", filter)).await?;
        unwrap_key(body, "floatingips")
    }

    async fn create_floating_ip(&self, opts: &CreateFloatingIpOpts) -> Result<FloatingIp, OpenStackError> {
        let request = serde_json::json!({ "floatingip": opts });
        let body = self.http.post(Service::Network, "/floatingips", &request).await?;
        unwrap_key(body, "floatingip")
    }

    async fn associate_floating_ip(&self, id: &str, port_id: Option<&str>) -> Result<FloatingIp, OpenStackError> {
        let request = serde_json::json!({ "floatingip": { "port_id": port_id } });
        let body = self
            .http
            .put(Service::Network, &format!("/floatingips/{}", id), &request)
            .await?;
        unwrap_key(body, "floatingip")
    }

    async fn delete_floating_ip(&self, id: &str) -> Result<(), OpenStackError> {
        self.http.delete(Service::Network, &format!("/floatingips/{}", id)).await
    }

    // Load Balancer Operations

    async fn list_load_balancers(&self, filter: &LoadBalancerFilter) -> Result<Vec<LoadBalancer>, OpenStackError> {
        let body = self
            .http
            .get(Service::LoadBalancer, &with_query("/lbaas/loadbalancers", filter))
            .await?;
        unwrap_key(body, "loadbalancers")
    }

    async fn get_load_balancer(&self, id: &str) -> Result<LoadBalancer, OpenStackError> {
        let body = self
            .http
            .get(Service::LoadBalancer, &format!("/lbaas/loadbalancers/{}", id))
            .await?;
        unwrap_key(body, "loadbalancer")
    }

    async fn create_load_balancer(&self, opts: &CreateLoadBalancerOpts) -> Result<LoadBalancer, OpenStackError> {
        let request = serde_json::json!({ "loadbalancer": opts });
        let body = self
            .http
            .post(Service::LoadBalancer, "/lbaas/loadbalancers", &request)
            .await?;
        unwrap_key(body, "loadbalancer")
    }

    async fn delete_load_balancer(&self, id: &str, cascade: bool) -> Result<(), OpenStackError> {
        let path = if cascade {
            format!("/lbaas/loadbalancers/{}?cascade=true", id)
        } else {
            format!("/lbaas/loadbalancers/{}", id)
        };
        self.http.delete(Service::LoadBalancer, &path).await
    }

    async fn list_listeners(&self, filter: &ListenerFilter) -> Result<Vec<Listener>, OpenStackError> {
        let body = self
            .http
            .get(Service::LoadBalancer, &with_query("/lbaas/listeners", filter))
            .await?;
        unwrap_key(body, "listeners")
    }

    async fn create_listener(&self, opts: &CreateListenerOpts) -> Result<Listener, OpenStackError> {
        let request = serde_json::json!({ "listener": opts });
        let body = self
            .http
            .post(Service::LoadBalancer, "/lbaas/listeners", &request)
            .await?;
        unwrap_key(body, "listener")
    }

    async fn update_listener_allowed_cidrs(&self, id: &str, allowed_cidrs: &[String]) -> Result<Listener, OpenStackError> {
        let request = serde_json::json!({ "listener": { "allowed_cidrs": allowed_cidrs } });
        let body = self
            .http
            .put(Service::LoadBalancer, &format!("/lbaas/listeners/{}", id), &request)
            .await?;
        unwrap_key(body, "listener")
    }

    async fn delete_listener(&self, id: &str) -> Result<(), OpenStackError> {
        self.http
            .delete(Service::LoadBalancer, &format!("/lbaas/listeners/{}", id))
            .await
    }

    async fn list_pools(&self, filter: &PoolFilter) -> Result<Vec<Pool>, OpenStackError> {
        let body = self
            .http
            .get(Service::LoadBalancer, &with_query("/lbaas/pools", filter))
            .await?;
        unwrap_key(body, "pools")
    }

    async fn create_pool(&self, opts: &CreatePoolOpts) -> Result<Pool, OpenStackError> {
        let request = serde_json::json!({ "pool": opts });
        let body = self.http.post(Service::LoadBalancer, "/lbaas/pools", &request).await?;
        unwrap_key(body, "pool")
    }

    async fn delete_pool(&self, id: &str) -> Result<(), OpenStackError> {
        self.http
            .delete(Service::LoadBalancer, &format!("/lbaas/pools/{}", id))
            .await
    }

    async fn list_members(&self, pool_id: &str, filter: &MemberFilter) -> Result<Vec<Member>, OpenStackError> {
        let path = with_query(&format!("/lbaas/pools/{}/members", pool_id), filter);
        let body = self.http.get(Service::LoadBalancer, &path).await?;
        unwrap_key(body, "members")
    }

    async fn create_member(&self, pool_id: &str, opts: &CreateMemberOpts) -> Result<Member, OpenStackError> {
        let request = serde_json::json!({ "member": opts });
        let body = self
            .http
            .post(Service::LoadBalancer, &format!("/lbaas/pools/{}/members", pool_id), &request)
            .await?;
        unwrap_key(body, "member")
    }

    async fn delete_member(&self, pool_id: &str, member_id: &str) -> Result<(), OpenStackError> {
        self.http
            .delete(
                Service::LoadBalancer,
                &format!("/lbaas/pools/{}/members/{}", pool_id, member_id),
            )
            .await
    }

    async fn list_monitors(&self, filter: &MonitorFilter) -> Result<Vec<Monitor>, OpenStackError> {
        let body = self
            .http
            .get(Service::LoadBalancer, &with_query("/lbaas/healthmonitors", filter))
            .await?;
        unwrap_key(body, "healthmonitors")
    }

    async fn create_monitor(&self, opts: &CreateMonitorOpts) -> Result<Monitor, OpenStackError> {
        let request = serde_json::json!({ "healthmonitor": opts });
        let body = self
            .http
            .post(Service::LoadBalancer, "/lbaas/healthmonitors", &request)
            .await?;
        unwrap_key(body, "healthmonitor")
    }

    async fn delete_monitor(&self, id: &str) -> Result<(), OpenStackError> {
        self.http
            .delete(Service::LoadBalancer, &format!("/lbaas/healthmonitors/{}", id))
            .await
    }
}

#[derive(Debug, serde::Deserialize)]
struct IdOnly {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_server_create_body_boot_from_volume() {
        let opts = CreateServerOpts {
            name: "m1".to_string(),
            image_ref: None,
            flavor_ref: "flavor-1".to_string(),
            key_name: Some("ops".to_string()),
            ports: vec!["p1".to_string(), "p2".to_string()],
            user_data: Some("#cloud-config".to_string()),
            metadata: BTreeMap::from([("role".to_string(), "worker".to_string())]),
            config_drive: Some(true),
            availability_zone: Some("az1".to_string()),
            tags: vec!["cluster-a".to_string()],
            block_devices: vec![BlockDeviceMapping::boot_volume("vol-1")],
            server_group_id: Some("sg-1".to_string()),
        };
        let body = server_create_body(&opts);
        let server = &body["server"];
        assert!(server.get("imageRef").is_none());
        assert_eq!(server["networks"][1]["port"], "p2");
        assert_eq!(server["user_data"], "I2Nsb3VkLWNvbmZpZw==");
        assert_eq!(server["block_device_mapping_v2"][0]["uuid"], "vol-1");
        assert_eq!(server["block_device_mapping_v2"][0]["delete_on_termination"], true);
        assert_eq!(body["os:scheduler_hints"]["group"], "sg-1");
    }

    #[test]
    fn test_server_create_body_boot_from_image() {
        let opts = CreateServerOpts {
            name: "m2".to_string(),
            image_ref: Some("img-a".to_string()),
            flavor_ref: "flavor-1".to_string(),
            ..Default::default()
        };
        let body = server_create_body(&opts);
        assert_eq!(body["server"]["imageRef"], "img-a");
        assert!(body["server"].get("block_device_mapping_v2").is_none());
        assert!(body.get("os:scheduler_hints").is_none());
    }

    #[test]
    fn test_port_opts_distinguish_unset_and_empty_security_groups() {
        let unset = CreatePortOpts {
            name: "m1-0".to_string(),
            network_id: "net-1".to_string(),
            ..Default::default()
        };
        let empty = CreatePortOpts {
            security_groups: Some(vec![]),
            ..unset.clone()
        };
        let unset_json = serde_json::to_value(&unset).unwrap();
        let empty_json = serde_json::to_value(&empty).unwrap();
        assert!(unset_json.get("security_groups").is_none());
        assert_eq!(empty_json["security_groups"], serde_json::json!([]));
    }
}
