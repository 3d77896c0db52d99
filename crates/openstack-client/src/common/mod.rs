//! Common utilities for the OpenStack API client
//!
//! Provides the authenticated HTTP wrapper shared by every service module.
//! Status codes are translated into [`OpenStackError`] here and nowhere else.

pub mod query;

use crate::error::OpenStackError;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Nova microversion: 2.52 for server tags, 2.64 for the single `policy` field
/// on server groups.
pub const COMPUTE_MICROVERSION: &str = "2.64";

/// OpenStack services addressed by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Compute,
    Network,
    Image,
    Volume,
    LoadBalancer,
}

impl Service {
    /// Service type as it appears in the Keystone catalog
    pub fn catalog_type(self) -> &'static str {
        match self {
            Self::Compute => "compute",
            Self::Network => "network",
            Self::Image => "image",
            Self::Volume => "volumev3",
            Self::LoadBalancer => "load-balancer",
        }
    }

    /// Version path some catalogs omit from the endpoint URL
    pub fn version_suffix(self) -> Option<&'static str> {
        match self {
            Self::Network => Some("/v2.0"),
            Self::Image | Self::LoadBalancer => Some("/v2"),
            Self::Compute | Self::Volume => None,
        }
    }

    /// All services the client needs endpoints for
    pub fn all() -> [Service; 5] {
        [
            Self::Compute,
            Self::Network,
            Self::Image,
            Self::Volume,
            Self::LoadBalancer,
        ]
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.catalog_type())
    }
}

/// Normalize a catalog endpoint: strip the trailing slash and append the
/// version path when the catalog left it out.
pub fn normalize_endpoint(service: Service, url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    match service.version_suffix() {
        Some(suffix) if !trimmed.ends_with(suffix) => format!("{}{}", trimmed, suffix),
        _ => trimmed.to_string(),
    }
}

/// HTTP client wrapper with Keystone token authentication
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    token: String,
    endpoints: HashMap<Service, String>,
}

impl HttpClient {
    /// Create a new HTTP client wrapper from a token and resolved endpoints
    pub fn new(client: Client, token: String, endpoints: HashMap<Service, String>) -> Self {
        let endpoints = endpoints
            .into_iter()
            .map(|(service, url)| (service, normalize_endpoint(service, &url)))
            .collect();
        Self {
            client,
            token,
            endpoints,
        }
    }

    /// Base URL of a service
    pub fn endpoint(&self, service: Service) -> Result<&str, OpenStackError> {
        self.endpoints
            .get(&service)
            .map(String::as_str)
            .ok_or_else(|| {
                OpenStackError::Authentication(format!("no {} endpoint in service catalog", service))
            })
    }

    /// Build a full URL from a service and a path
    pub fn build_url(&self, service: Service, path: &str) -> Result<String, OpenStackError> {
        Ok(format!("{}{}", self.endpoint(service)?, path))
    }

    fn request(&self, method: Method, service: Service, path: &str) -> Result<RequestBuilder, OpenStackError> {
        let url = self.build_url(service, path)?;
        debug!("{} {}", method, url);
        let mut builder = self
            .client
            .request(method, &url)
            .header("X-Auth-Token", &self.token)
            .header("Accept", "application/json");
        if service == Service::Compute {
            builder = builder.header("X-OpenStack-Nova-API-Version", COMPUTE_MICROVERSION);
        }
        Ok(builder)
    }

    /// Map a non-success response into the error vocabulary
    async fn check(response: Response, context: &str) -> Result<Response, OpenStackError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(OpenStackError::from_status(
            status.as_u16(),
            format!("{} failed: {} - {}", context, status, body),
        ))
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, service: Service, path: &str) -> Result<T, OpenStackError> {
        let response = self.request(Method::GET, service, path)?.send().await?;
        let response = Self::check(response, &format!("GET {}", path)).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(OpenStackError::Serialization)
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, OpenStackError> {
        let response = self
            .request(Method::POST, service, path)?
            .json(body)
            .send()
            .await?;
        let response = Self::check(response, &format!("POST {}", path)).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(OpenStackError::Serialization)
    }

    /// Make a PUT request
    pub async fn put<T: DeserializeOwned>(
        &self,
        service: Service,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, OpenStackError> {
        let response = self
            .request(Method::PUT, service, path)?
            .json(body)
            .send()
            .await?;
        let response = Self::check(response, &format!("PUT {}", path)).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(OpenStackError::Serialization)
    }

    /// Make a DELETE request (204 and 202 are both success)
    pub async fn delete(&self, service: Service, path: &str) -> Result<(), OpenStackError> {
        let response = self.request(Method::DELETE, service, path)?.send().await?;
        Self::check(response, &format!("DELETE {}", path)).await?;
        Ok(())
    }
}

/// Extract `body[key]` and deserialize it, e.g. the `server` of `{"server": {...}}`
pub fn unwrap_key<T: DeserializeOwned>(mut body: serde_json::Value, key: &str) -> Result<T, OpenStackError> {
    let value = body
        .get_mut(key)
        .map(serde_json::Value::take)
        .ok_or_else(|| OpenStackError::Api {
            status: 200,
            message: format!("response is missing the '{}' key", key),
        })?;
    serde_json::from_value(value).map_err(OpenStackError::Serialization)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint_appends_missing_version() {
        assert_eq!(
            normalize_endpoint(Service::Network, "https://neutron:9696/"),
            "https://neutron:9696/v2.0"
        );
        assert_eq!(
            normalize_endpoint(Service::LoadBalancer, "https://octavia:9876/v2"),
            "https://octavia:9876/v2"
        );
        assert_eq!(
            normalize_endpoint(Service::Compute, "https://nova:8774/v2.1/"),
            "https://nova:8774/v2.1"
        );
    }

    #[test]
    fn test_unwrap_key() {
        let body = serde_json::json!({"flavor": {"id": "f1", "name": "m1.small"}});
        let flavor: crate::models::Flavor = unwrap_key(body, "flavor").unwrap();
        assert_eq!(flavor.name, "m1.small");

        let missing = unwrap_key::<crate::models::Flavor>(serde_json::json!({}), "flavor");
        assert!(missing.is_err());
    }
}
