//! Block storage (Cinder) models

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Volume model (Cinder v3)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Volume {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Size in GiB
    pub size: u32,
    pub status: String,
    #[serde(default)]
    pub attachments: Vec<VolumeAttachment>,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub volume_type: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Volume {
    /// Volume is ready to be used as a boot device
    pub fn is_available(&self) -> bool {
        self.status == "available"
    }

    /// Volume creation or attachment failed permanently
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }
}

/// Attachment record of a volume
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeAttachment {
    pub server_id: String,
    #[serde(default)]
    pub attachment_id: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
}

/// Filter for listing volumes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeFilter {
    pub name: Option<String>,
}

/// Request options for creating a volume
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CreateVolumeOpts {
    pub name: String,
    pub size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability_zone: Option<String>,
    #[serde(rename = "imageRef", skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}
