//! References to OpenStack resources and credentials
//!
//! OpenStack resources are referenced either by ID or by a filter. A filter
//! must match exactly one resource; zero is an invalid configuration and
//! more than one is ambiguous.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Credentials for the OpenStack project that owns the resources
///
/// Points at a Secret in the object's namespace holding a `clouds.yaml`
/// document under the `clouds.yaml` key.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRef {
    /// Name of the Secret
    pub name: String,

    /// Entry of `clouds:` to use
    pub cloud_name: String,
}

/// Filter matching OpenStack resources by exact name and/or tags
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFilter {
    /// Exact resource name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Every tag must be present on the resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Reference to an image, network, security group or server group
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ResourceParam {
    /// OpenStack ID; takes precedence over `filter`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<ResourceFilter>,
}

impl ResourceParam {
    /// Reference by OpenStack ID
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            filter: None,
        }
    }

    /// Reference by exact name
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            id: None,
            filter: Some(ResourceFilter {
                name: Some(name.into()),
                tags: vec![],
            }),
        }
    }

    /// Neither an ID nor a usable filter was given
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self
                .filter
                .as_ref()
                .is_none_or(|f| f.name.is_none() && f.tags.is_empty())
    }
}

/// Image reference
pub type ImageParam = ResourceParam;

/// Network reference
pub type NetworkParam = ResourceParam;

/// Security group reference
pub type SecurityGroupParam = ResourceParam;

/// Server group reference (filters match on name only)
pub type ServerGroupParam = ResourceParam;

/// Filter matching subnets
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubnetFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cidr: Option<String>,
}

/// Subnet reference
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubnetParam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<SubnetFilter>,
}

/// Why reconciliation of an object stopped advancing
///
/// Set only for errors that will recur identically on retry; clearing it
/// requires a spec change (or deleting the object).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub enum FailureReason {
    /// A reference could not be resolved or the object spec is self-contradictory
    InvalidConfiguration,

    /// More than one OpenStack resource matches a name that must be unique
    AmbiguousResource,

    /// OpenStack moved a resource into an unrecoverable state
    ResourceFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_param() {
        assert!(ResourceParam::default().is_empty());
        assert!(
            ResourceParam {
                id: None,
                filter: Some(ResourceFilter::default())
            }
            .is_empty()
        );
        assert!(!ResourceParam::by_name("img-a").is_empty());
        assert!(!ResourceParam::by_id("6b1a").is_empty());
    }

    #[test]
    fn test_param_json_shape() {
        let param: ResourceParam = serde_json::from_value(serde_json::json!({
            "filter": { "name": "ubuntu-22.04", "tags": ["k8s"] }
        }))
        .unwrap();
        assert_eq!(param.filter.unwrap().tags, vec!["k8s".to_string()]);
    }
}
