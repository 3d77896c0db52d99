//! Compute (Nova) models

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Server model matching the Nova server representation (microversion 2.64)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Server {
    pub id: String,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub addresses: HashMap<String, Vec<ServerAddress>>,
    #[serde(rename = "OS-EXT-AZ:availability_zone", default)]
    pub availability_zone: Option<String>,
    /// Operation Nova is running on the server, e.g. `deleting`
    #[serde(rename = "OS-EXT-STS:task_state", default)]
    pub task_state: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Server {
    /// Parsed server status
    pub fn state(&self) -> ServerStatus {
        ServerStatus::from(self.status.as_str())
    }

    /// Whether Nova is working on a delete request for this server
    pub fn is_deleting(&self) -> bool {
        self.task_state.as_deref() == Some("deleting")
    }

    /// First fixed address reported by Nova, if any
    pub fn first_fixed_ip(&self) -> Option<&str> {
        let mut networks: Vec<&String> = self.addresses.keys().collect();
        networks.sort();
        networks
            .into_iter()
            .filter_map(|network| self.addresses.get(network))
            .flatten()
            .find(|a| a.ip_type.as_deref() != Some("floating"))
            .map(|a| a.addr.as_str())
    }
}

/// One address entry of a server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerAddress {
    pub addr: String,
    pub version: u8,
    #[serde(rename = "OS-EXT-IPS:type", default)]
    pub ip_type: Option<String>,
}

/// Nova server status values this system distinguishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerStatus {
    Active,
    Build,
    Shutoff,
    Error,
    Deleted,
    Other(String),
}

impl From<&str> for ServerStatus {
    fn from(value: &str) -> Self {
        match value {
            "ACTIVE" => Self::Active,
            "BUILD" => Self::Build,
            "SHUTOFF" => Self::Shutoff,
            "ERROR" => Self::Error,
            "DELETED" | "SOFT_DELETED" => Self::Deleted,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Filter for listing servers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerFilter {
    /// Nova treats `name` as a regular expression; callers must compare exactly
    pub name: Option<String>,
    pub tags: Vec<String>,
}

/// Block device mapping source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BlockDeviceSource {
    Volume,
    Image,
    Blank,
}

/// Block device mapping destination
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BlockDeviceDestination {
    Volume,
    Local,
}

/// Entry of `block_device_mapping_v2`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockDeviceMapping {
    pub boot_index: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub source_type: BlockDeviceSource,
    pub destination_type: BlockDeviceDestination,
    pub delete_on_termination: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<u32>,
}

impl BlockDeviceMapping {
    /// Boot from an existing volume, deleted together with the server
    pub fn boot_volume(volume_id: impl Into<String>) -> Self {
        Self {
            boot_index: 0,
            uuid: Some(volume_id.into()),
            source_type: BlockDeviceSource::Volume,
            destination_type: BlockDeviceDestination::Volume,
            delete_on_termination: true,
            volume_size: None,
        }
    }
}

/// Request options for creating a server
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateServerOpts {
    pub name: String,
    /// Omitted when booting from volume
    pub image_ref: Option<String>,
    pub flavor_ref: String,
    pub key_name: Option<String>,
    /// Pre-created port IDs, attached in order
    pub ports: Vec<String>,
    /// Plain-text user data; the HTTP client base64-encodes it
    pub user_data: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub config_drive: Option<bool>,
    pub availability_zone: Option<String>,
    pub tags: Vec<String>,
    pub block_devices: Vec<BlockDeviceMapping>,
    pub server_group_id: Option<String>,
}

/// Flavor model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flavor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub vcpus: u32,
    #[serde(default)]
    pub ram: u64,
    #[serde(default)]
    pub disk: u64,
}

/// Server group model (microversion 2.64 single `policy` field)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub policy: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// Request options for creating a server group
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateServerGroupOpts {
    pub name: String,
    pub policy: String,
}
