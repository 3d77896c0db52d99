//! Image (Glance) models

use serde::{Deserialize, Serialize};

/// Image model (Glance v2)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Image {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Filter for listing images
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageFilter {
    pub name: Option<String>,
    pub tags: Vec<String>,
}
