//! Keystone v3 authentication
//!
//! Exchanges credentials for a scoped token and picks service endpoints out of
//! the returned catalog.

use crate::common::Service;
use crate::error::OpenStackError;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Credentials and scope for a Keystone v3 token request
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AuthOptions {
    /// Identity endpoint, with or without the `/v3` suffix
    pub auth_url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub user_domain_name: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub project_domain_name: Option<String>,
    #[serde(default)]
    pub application_credential_id: Option<String>,
    #[serde(default)]
    pub application_credential_secret: Option<String>,
}

/// Endpoint selection from the catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointOptions {
    pub region: Option<String>,
    /// `public`, `internal` or `admin`
    pub interface: String,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            region: None,
            interface: "public".to_string(),
        }
    }
}

/// Authenticated session: token plus resolved endpoints
#[derive(Debug, Clone)]
pub struct Session {
    pub token: String,
    pub endpoints: HashMap<Service, String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Debug, Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region_id: Option<String>,
    #[serde(default)]
    region: Option<String>,
    url: String,
}

impl AuthOptions {
    /// Build the JSON body for `POST /v3/auth/tokens`
    pub fn token_request_body(&self) -> Result<serde_json::Value, OpenStackError> {
        if let (Some(id), Some(secret)) = (
            &self.application_credential_id,
            &self.application_credential_secret,
        ) {
            // Application credentials carry their own scope
            return Ok(serde_json::json!({
                "auth": {
                    "identity": {
                        "methods": ["application_credential"],
                        "application_credential": { "id": id, "secret": secret }
                    }
                }
            }));
        }

        let username = self.username.as_deref().ok_or_else(|| {
            OpenStackError::InvalidRequest("username or application credential is required".to_string())
        })?;
        let password = self
            .password
            .as_deref()
            .ok_or_else(|| OpenStackError::InvalidRequest("password is required".to_string()))?;
        let user_domain = self.user_domain_name.as_deref().unwrap_or("Default");

        let project = match (&self.project_id, &self.project_name) {
            (Some(id), _) => serde_json::json!({ "id": id }),
            (None, Some(name)) => serde_json::json!({
                "name": name,
                "domain": { "name": self.project_domain_name.as_deref().unwrap_or("Default") }
            }),
            (None, None) => {
                return Err(OpenStackError::InvalidRequest(
                    "project_id or project_name is required".to_string(),
                ));
            }
        };

        Ok(serde_json::json!({
            "auth": {
                "identity": {
                    "methods": ["password"],
                    "password": {
                        "user": {
                            "name": username,
                            "domain": { "name": user_domain },
                            "password": password
                        }
                    }
                },
                "scope": { "project": project }
            }
        }))
    }

    fn tokens_url(&self) -> String {
        let base = self.auth_url.trim_end_matches('/');
        if base.ends_with("/v3") {
            format!("{}/auth/tokens", base)
        } else {
            format!("{}/v3/auth/tokens", base)
        }
    }
}

/// Request a token and resolve the endpoints of every service this crate uses
pub async fn authenticate(
    client: &Client,
    auth: &AuthOptions,
    endpoint_opts: &EndpointOptions,
) -> Result<Session, OpenStackError> {
    let url = auth.tokens_url();
    debug!("Requesting Keystone token from {}", url);

    let response = client
        .post(&url)
        .header("Accept", "application/json")
        .json(&auth.token_request_body()?)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OpenStackError::Authentication(format!(
            "token request failed: {} - {}",
            status, body
        )));
    }

    let token = response
        .headers()
        .get("X-Subject-Token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| OpenStackError::Authentication("response has no X-Subject-Token header".to_string()))?;

    let body: TokenResponse = response.json().await?;
    let endpoints = select_endpoints(&body.token.catalog, endpoint_opts);
    debug!("Resolved {} service endpoints", endpoints.len());

    Ok(Session { token, endpoints })
}

fn select_endpoints(catalog: &[CatalogEntry], opts: &EndpointOptions) -> HashMap<Service, String> {
    let mut endpoints = HashMap::new();
    for service in Service::all() {
        let found = catalog
            .iter()
            .filter(|entry| entry.service_type == service.catalog_type())
            .flat_map(|entry| entry.endpoints.iter())
            .find(|endpoint| {
                let region = endpoint.region_id.as_ref().or(endpoint.region.as_ref());
                endpoint.interface == opts.interface
                    && opts.region.as_ref().is_none_or(|wanted| region == Some(wanted))
            });
        if let Some(endpoint) = found {
            endpoints.insert(service, endpoint.url.clone());
        }
    }
    endpoints
}
