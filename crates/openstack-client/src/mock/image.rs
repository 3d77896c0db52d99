//! Image operations for MockOpenStackClient

use super::{has_tags, matches, MockOpenStackClient, Operation};
use crate::error::OpenStackError;
use crate::models::*;

pub fn list_images(client: &MockOpenStackClient, filter: &ImageFilter) -> Result<Vec<Image>, OpenStackError> {
    let state = client.begin(Operation::ListImages, filter.name.clone().unwrap_or_default())?;
    Ok(state
        .images
        .values()
        .filter(|i| matches(filter.name.as_ref(), &i.name) && has_tags(&i.tags, &filter.tags))
        .cloned()
        .collect())
}

pub fn get_image(client: &MockOpenStackClient, id: &str) -> Result<Image, OpenStackError> {
    let state = client.begin(Operation::GetImage, id)?;
    state
        .images
        .get(id)
        .cloned()
        .ok_or_else(|| OpenStackError::NotFound(format!("Image {} not found", id)))
}
