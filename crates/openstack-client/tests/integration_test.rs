//! Integration tests for the OpenStack client
//!
//! These tests require a reachable OpenStack cloud.
//! Set OS_AUTH_URL, OS_USERNAME, OS_PASSWORD and OS_PROJECT_NAME (optionally
//! OS_USER_DOMAIN_NAME, OS_PROJECT_DOMAIN_NAME, OS_REGION_NAME) to run.

use openstack_client::{
    AuthOptions, CreateSecurityGroupOpts, EndpointOptions, ImageFilter, NetworkFilter, OpenStackClient,
    OpenStackClientTrait, SecurityGroupFilter, ServerFilter,
};
use std::time::Duration;

async fn client_from_env() -> OpenStackClient {
    let env = |key: &str| std::env::var(key).ok();
    let auth = AuthOptions {
        auth_url: env("OS_AUTH_URL").expect("OS_AUTH_URL environment variable must be set"),
        username: env("OS_USERNAME"),
        password: env("OS_PASSWORD"),
        user_domain_name: env("OS_USER_DOMAIN_NAME"),
        project_name: env("OS_PROJECT_NAME"),
        project_domain_name: env("OS_PROJECT_DOMAIN_NAME"),
        ..Default::default()
    };
    let endpoints = EndpointOptions {
        region: env("OS_REGION_NAME"),
        ..Default::default()
    };
    OpenStackClient::authenticate(&auth, &endpoints, Duration::from_secs(30))
        .await
        .expect("Failed to authenticate")
}

#[tokio::test]
#[ignore] // Requires a running OpenStack cloud
async fn test_authenticate_and_list_servers() {
    let client = client_from_env().await;
    let servers = client.list_servers(&ServerFilter::default()).await;
    assert!(servers.is_ok(), "Failed to list servers");
}

#[tokio::test]
#[ignore]
async fn test_list_images_and_networks() {
    let client = client_from_env().await;

    let images = client
        .list_images(&ImageFilter::default())
        .await
        .expect("Failed to list images");
    println!("Found {} images", images.len());

    let networks = client
        .list_networks(&NetworkFilter::default())
        .await
        .expect("Failed to list networks");
    println!("Found {} networks", networks.len());
}

#[tokio::test]
#[ignore]
async fn test_create_and_delete_security_group() {
    let client = client_from_env().await;
    let name = format!("stackops-it-{}", std::process::id());

    let group = client
        .create_security_group(&CreateSecurityGroupOpts {
            name: name.clone(),
            description: Some("integration test".to_string()),
        })
        .await
        .expect("Failed to create security group");

    let found = client
        .list_security_groups(&SecurityGroupFilter {
            name: Some(name),
            ..Default::default()
        })
        .await
        .expect("Failed to list security groups");
    assert_eq!(found.len(), 1);

    client
        .delete_security_group(&group.id)
        .await
        .expect("Failed to delete security group");
    let err = client.get_security_group(&group.id).await.unwrap_err();
    assert!(err.is_not_found());
}
