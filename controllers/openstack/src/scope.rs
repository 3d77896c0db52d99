//! OpenStack credentials
//!
//! Every object names a Secret holding a `clouds.yaml` document and the
//! cloud to use from it. Authenticated clients are cached per
//! (namespace, secret, cloud) and rebuilt when the Secret changes or the
//! token gets old.

use crate::error::ControllerError;
use async_trait::async_trait;
use crds::IdentityRef;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use openstack_client::{AuthOptions, EndpointOptions, OpenStackClient, OpenStackClientTrait};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Key of the `clouds.yaml` document inside the identity Secret
pub const CLOUDS_YAML_KEY: &str = "clouds.yaml";

/// Keystone tokens live an hour by default; rebuild well before that
const CLIENT_MAX_AGE: Duration = Duration::from_secs(45 * 60);

/// Source of OpenStack clients for an identity reference
#[async_trait]
pub trait ScopeFactory: Send + Sync {
    /// Client authenticated with the credentials `identity` points at
    async fn client_for(
        &self,
        identity: &IdentityRef,
        namespace: &str,
    ) -> Result<Arc<dyn OpenStackClientTrait>, ControllerError>;

    /// Drop any cached client for `identity`, e.g. after the cloud rejected its token
    async fn invalidate(&self, _identity: &IdentityRef, _namespace: &str) {}
}

#[derive(Debug, Deserialize)]
struct CloudsFile {
    #[serde(default)]
    clouds: HashMap<String, CloudEntry>,
}

#[derive(Debug, Deserialize)]
struct CloudEntry {
    auth: AuthOptions,
    #[serde(default)]
    region_name: Option<String>,
    #[serde(default)]
    interface: Option<String>,
}

/// Pick `cloud_name` out of a `clouds.yaml` document
pub fn cloud_from_yaml(yaml: &str, cloud_name: &str) -> Result<(AuthOptions, EndpointOptions), ControllerError> {
    let file: CloudsFile =
        serde_yaml::from_str(yaml).map_err(|e| ControllerError::Identity(format!("invalid clouds.yaml: {e}")))?;
    let mut clouds = file.clouds;
    let entry = clouds
        .remove(cloud_name)
        .ok_or_else(|| ControllerError::Identity(format!("cloud {cloud_name:?} not found in clouds.yaml")))?;
    if entry.auth.auth_url.is_empty() {
        return Err(ControllerError::Identity(format!("cloud {cloud_name:?} has no auth_url")));
    }
    let endpoint = EndpointOptions {
        region: entry.region_name,
        interface: entry.interface.unwrap_or_else(|| EndpointOptions::default().interface),
    };
    Ok((entry.auth, endpoint))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopeKey {
    namespace: String,
    secret: String,
    cloud: String,
}

impl ScopeKey {
    fn new(identity: &IdentityRef, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            secret: identity.name.clone(),
            cloud: identity.cloud_name.clone(),
        }
    }
}

#[derive(Debug)]
struct CachedClient {
    /// resourceVersion of the Secret the client was built from
    secret_version: Option<String>,
    created: Instant,
    client: Arc<OpenStackClient>,
}

/// Reads credentials from Secrets in the object's namespace
pub struct SecretScopeFactory {
    kube_client: Client,
    request_timeout: Duration,
    cache: Mutex<HashMap<ScopeKey, CachedClient>>,
}

impl std::fmt::Debug for SecretScopeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretScopeFactory")
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl SecretScopeFactory {
    pub fn new(kube_client: Client, request_timeout: Duration) -> Self {
        Self {
            kube_client,
            request_timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn read_secret(&self, identity: &IdentityRef, namespace: &str) -> Result<(String, Option<String>), ControllerError> {
        let secrets: Api<Secret> = Api::namespaced(self.kube_client.clone(), namespace);
        let secret = secrets
            .get_opt(&identity.name)
            .await?
            .ok_or_else(|| ControllerError::Identity(format!("secret {}/{} not found", namespace, identity.name)))?;
        let data = secret
            .data
            .as_ref()
            .and_then(|data| data.get(CLOUDS_YAML_KEY))
            .ok_or_else(|| {
                ControllerError::Identity(format!(
                    "secret {}/{} has no {} key",
                    namespace, identity.name, CLOUDS_YAML_KEY
                ))
            })?;
        let yaml = String::from_utf8(data.0.clone())
            .map_err(|_| ControllerError::Identity(format!("secret {}/{} is not UTF-8", namespace, identity.name)))?;
        Ok((yaml, secret.metadata.resource_version))
    }
}

#[async_trait]
impl ScopeFactory for SecretScopeFactory {
    async fn client_for(
        &self,
        identity: &IdentityRef,
        namespace: &str,
    ) -> Result<Arc<dyn OpenStackClientTrait>, ControllerError> {
        let key = ScopeKey::new(identity, namespace);
        let (yaml, version) = self.read_secret(identity, namespace).await?;

        // Held across authentication so one identity is never logged in twice at once
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.get(&key) {
            if cached.secret_version == version && cached.created.elapsed() < CLIENT_MAX_AGE {
                debug!("Reusing OpenStack client for {}/{} ({})", namespace, identity.name, identity.cloud_name);
                let client: Arc<dyn OpenStackClientTrait> = cached.client.clone();
                return Ok(client);
            }
        }

        let (auth, endpoint) = cloud_from_yaml(&yaml, &identity.cloud_name)?;
        let client = OpenStackClient::authenticate(&auth, &endpoint, self.request_timeout).await?;
        info!(
            "Authenticated to cloud {} for {}/{} (region {})",
            identity.cloud_name,
            namespace,
            identity.name,
            endpoint.region.as_deref().unwrap_or("default")
        );
        let client = Arc::new(client);
        cache.insert(
            key,
            CachedClient {
                secret_version: version,
                created: Instant::now(),
                client: client.clone(),
            },
        );
        let client: Arc<dyn OpenStackClientTrait> = client;
        Ok(client)
    }

    async fn invalidate(&self, identity: &IdentityRef, namespace: &str) {
        if self.cache.lock().await.remove(&ScopeKey::new(identity, namespace)).is_some() {
            debug!("Dropped cached OpenStack client for {}/{}", namespace, identity.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_debug<T: std::fmt::Debug>() {}

    #[test]
    fn test_scope_factory_is_debug() {
        assert_debug::<SecretScopeFactory>();
    }

    const CLOUDS: &str = r#"
clouds:
  openstack:
    auth:
      auth_url: https://keystone.example.com:5000/v3
      username: capo
      password: secret
      project_name: infra
      user_domain_name: Default
    region_name: RegionOne
    interface: internal
  appcred:
    auth:
      auth_url: https://keystone.example.com:5000
      application_credential_id: abc
      application_credential_secret: xyz
"#;

    #[test]
    fn test_password_cloud() {
        let (auth, endpoint) = cloud_from_yaml(CLOUDS, "openstack").unwrap();
        assert_eq!(auth.username.as_deref(), Some("capo"));
        assert_eq!(auth.project_name.as_deref(), Some("infra"));
        assert_eq!(endpoint.region.as_deref(), Some("RegionOne"));
        assert_eq!(endpoint.interface, "internal");
    }

    #[test]
    fn test_application_credential_cloud_defaults_to_public() {
        let (auth, endpoint) = cloud_from_yaml(CLOUDS, "appcred").unwrap();
        assert_eq!(auth.application_credential_id.as_deref(), Some("abc"));
        assert_eq!(endpoint.region, None);
        assert_eq!(endpoint.interface, "public");
    }

    #[test]
    fn test_unknown_cloud_and_bad_yaml() {
        assert!(matches!(
            cloud_from_yaml(CLOUDS, "missing"),
            Err(ControllerError::Identity(_))
        ));
        assert!(matches!(
            cloud_from_yaml("clouds: [", "openstack"),
            Err(ControllerError::Identity(_))
        ));
    }
}
