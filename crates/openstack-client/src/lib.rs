//! OpenStack API Client
//!
//! A typed client for the OpenStack services a machine/cluster controller
//! needs: compute (Nova), networking (Neutron), image (Glance), block
//! storage (Cinder) and load balancing (Octavia).
//!
//! # Example
//!
//! ```no_run
//! use openstack_client::{AuthOptions, EndpointOptions, OpenStackClient, OpenStackClientTrait, ServerFilter};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let auth = AuthOptions {
//!     auth_url: "https://keystone.example.com:5000".to_string(),
//!     username: Some("capo".to_string()),
//!     password: Some("secret".to_string()),
//!     project_name: Some("infra".to_string()),
//!     ..Default::default()
//! };
//! let client = OpenStackClient::authenticate(&auth, &EndpointOptions::default(), Duration::from_secs(30)).await?;
//!
//! let servers = client
//!     .list_servers(&ServerFilter { name: Some("m1".to_string()), ..Default::default() })
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Single error vocabulary**: not-found, conflict, everything else
//! - **Typed filters and request options** for every list/create verb
//! - **No retries**: callers own retry and backoff policy
//! - **`test-util`**: an in-memory `MockOpenStackClient` with a virtual clock

pub mod auth;
pub mod client;
pub mod common;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod openstack_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use auth::{AuthOptions, EndpointOptions, Session};
pub use client::OpenStackClient;
pub use common::{HttpClient, Service};
pub use error::OpenStackError;
pub use models::*;
pub use openstack_trait::OpenStackClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::{Call, MockOpenStackClient, Operation, ServerOutcome, VolumeOutcome};
