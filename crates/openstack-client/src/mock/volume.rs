//! Block storage operations for MockOpenStackClient

use super::{matches, MockOpenStackClient, Operation};
use crate::error::OpenStackError;
use crate::models::*;

pub fn list_volumes(client: &MockOpenStackClient, filter: &VolumeFilter) -> Result<Vec<Volume>, OpenStackError> {
    let state = client.begin(Operation::ListVolumes, filter.name.clone().unwrap_or_default())?;
    Ok(state
        .volumes
        .values()
        .filter(|v| matches(filter.name.as_ref(), &v.name))
        .cloned()
        .collect())
}

pub fn get_volume(client: &MockOpenStackClient, id: &str) -> Result<Volume, OpenStackError> {
    let state = client.begin(Operation::GetVolume, id)?;
    state
        .volumes
        .get(id)
        .cloned()
        .ok_or_else(|| OpenStackError::NotFound(format!("Volume {} not found", id)))
}

pub fn create_volume(client: &MockOpenStackClient, opts: &CreateVolumeOpts) -> Result<Volume, OpenStackError> {
    let mut state = client.begin(Operation::CreateVolume, &opts.name)?;
    if opts.size == 0 {
        return Err(OpenStackError::InvalidRequest("volume size must be positive".to_string()));
    }
    if let Some(image) = &opts.image_ref {
        if !state.images.contains_key(image) {
            return Err(OpenStackError::InvalidRequest(format!("Image {} could not be found", image)));
        }
    }
    let volume = Volume {
        id: state.next_id(),
        name: opts.name.clone(),
        size: opts.size,
        status: "creating".to_string(),
        attachments: vec![],
        availability_zone: opts.availability_zone.clone(),
        volume_type: opts.volume_type.clone(),
        metadata: opts.metadata.clone(),
    };
    state.volumes.insert(volume.id.clone(), volume.clone());
    Ok(volume)
}

pub fn delete_volume(client: &MockOpenStackClient, id: &str) -> Result<(), OpenStackError> {
    let mut state = client.begin(Operation::DeleteVolume, id)?;
    let volume = state
        .volumes
        .get(id)
        .ok_or_else(|| OpenStackError::NotFound(format!("Volume {} not found", id)))?;
    if !volume.attachments.is_empty() || volume.status == "creating" {
        // Cinder answers 400 for volumes in a non-deletable state
        return Err(OpenStackError::InvalidRequest(format!(
            "Volume {} status must be available or error and not attached",
            id
        )));
    }
    state.volumes.remove(id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::VolumeOutcome;
    use crate::openstack_trait::OpenStackClientTrait;

    fn opts(name: &str) -> CreateVolumeOpts {
        CreateVolumeOpts {
            name: name.to_string(),
            size: 10,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_volume_becomes_available_on_advance() {
        let client = MockOpenStackClient::new();
        let volume = client.create_volume(&opts("m1-root")).await.unwrap();
        assert_eq!(volume.status, "creating");
        client.advance().unwrap();
        assert!(client.get_volume(&volume.id).await.unwrap().is_available());
    }

    #[tokio::test]
    async fn test_volume_outcome_error() {
        let client = MockOpenStackClient::new();
        client.set_volume_outcome(VolumeOutcome::Error);
        let volume = client.create_volume(&opts("m1-root")).await.unwrap();
        client.advance().unwrap();
        assert!(client.get_volume(&volume.id).await.unwrap().is_error());
    }

    #[tokio::test]
    async fn test_attached_volume_cannot_be_deleted() {
        let client = MockOpenStackClient::new();
        let volume = client.add_volume("data", 10, "in-use", Some("server-x"));
        assert!(client.delete_volume(&volume.id).await.is_err());
        assert!(client.delete_volume("missing").await.unwrap_err().is_not_found());
    }
}
