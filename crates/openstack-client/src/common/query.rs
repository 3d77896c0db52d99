//! Query utilities for OpenStack list endpoints
//!
//! Each typed filter knows how its service spells query parameters.

use crate::models::*;

/// A list filter that can be rendered as query parameters
pub trait QueryFilter {
    /// Key/value pairs in request order; unset fields are omitted
    fn query_pairs(&self) -> Vec<(&'static str, String)>;
}

/// Append the filter's query string to a path
pub fn with_query(path: &str, filter: &impl QueryFilter) -> String {
    let pairs = filter.query_pairs();
    if pairs.is_empty() {
        return path.to_string();
    }
    let query = pairs
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{}?{}", path, query)
}

fn push_opt(pairs: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<&String>) {
    if let Some(value) = value {
        pairs.push((key, value.clone()));
    }
}

fn push_tags(pairs: &mut Vec<(&'static str, String)>, tags: &[String]) {
    if !tags.is_empty() {
        pairs.push(("tags", tags.join(",")));
    }
}

impl QueryFilter for ServerFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        // Nova matches `name` as a regex; anchor it so "m1" does not match "m10"
        if let Some(name) = &self.name {
            pairs.push(("name", format!("^{}$", name)));
        }
        push_tags(&mut pairs, &self.tags);
        pairs
    }
}

impl QueryFilter for ImageFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "name", self.name.as_ref());
        // Glance repeats `tag` instead of taking a comma separated list
        for tag in &self.tags {
            pairs.push(("tag", tag.clone()));
        }
        pairs
    }
}

impl QueryFilter for VolumeFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "name", self.name.as_ref());
        pairs
    }
}

impl QueryFilter for NetworkFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "id", self.id.as_ref());
        push_opt(&mut pairs, "name", self.name.as_ref());
        push_tags(&mut pairs, &self.tags);
        if let Some(external) = self.external {
            pairs.push(("router:external", external.to_string()));
        }
        pairs
    }
}

impl QueryFilter for SubnetFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "id", self.id.as_ref());
        push_opt(&mut pairs, "name", self.name.as_ref());
        push_opt(&mut pairs, "network_id", self.network_id.as_ref());
        push_opt(&mut pairs, "cidr", self.cidr.as_ref());
        pairs
    }
}

impl QueryFilter for PortFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "name", self.name.as_ref());
        push_opt(&mut pairs, "network_id", self.network_id.as_ref());
        push_opt(&mut pairs, "device_id", self.device_id.as_ref());
        push_tags(&mut pairs, &self.tags);
        pairs
    }
}

impl QueryFilter for TrunkFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "name", self.name.as_ref());
        push_opt(&mut pairs, "port_id", self.port_id.as_ref());
        pairs
    }
}

impl QueryFilter for SecurityGroupFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "id", self.id.as_ref());
        push_opt(&mut pairs, "name", self.name.as_ref());
        push_tags(&mut pairs, &self.tags);
        pairs
    }
}

impl QueryFilter for FloatingIpFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "floating_ip_address", self.floating_ip_address.as_ref());
        push_opt(&mut pairs, "port_id", self.port_id.as_ref());
        pairs
    }
}

impl QueryFilter for LoadBalancerFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "name", self.name.as_ref());
        pairs
    }
}

impl QueryFilter for ListenerFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "name", self.name.as_ref());
        push_opt(&mut pairs, "loadbalancer_id", self.loadbalancer_id.as_ref());
        pairs
    }
}

impl QueryFilter for PoolFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "name", self.name.as_ref());
        push_opt(&mut pairs, "loadbalancer_id", self.loadbalancer_id.as_ref());
        pairs
    }
}

impl QueryFilter for MemberFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "name", self.name.as_ref());
        push_opt(&mut pairs, "address", self.address.as_ref());
        pairs
    }
}

impl QueryFilter for MonitorFilter {
    fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        push_opt(&mut pairs, "name", self.name.as_ref());
        push_opt(&mut pairs, "pool_id", self.pool_id.as_ref());
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_name_is_anchored() {
        let filter = ServerFilter {
            name: Some("m1".to_string()),
            tags: vec![],
        };
        assert_eq!(with_query("/servers/detail", &filter), "/servers/detail?name=%5Em1%24");
    }

    #[test]
    fn test_empty_filter_has_no_query_string() {
        assert_eq!(with_query("/ports", &PortFilter::default()), "/ports");
    }

    #[test]
    fn test_port_filter_tags_are_comma_joined() {
        let filter = PortFilter {
            name: Some("m1-0".to_string()),
            network_id: Some("net-1".to_string()),
            device_id: None,
            tags: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(
            with_query("/ports", &filter),
            "/ports?name=m1-0&network_id=net-1&tags=a%2Cb"
        );
    }

    #[test]
    fn test_image_tags_repeat() {
        let filter = ImageFilter {
            name: None,
            tags: vec!["k8s".to_string(), "ubuntu".to_string()],
        };
        assert_eq!(with_query("/images", &filter), "/images?tag=k8s&tag=ubuntu");
    }
}
