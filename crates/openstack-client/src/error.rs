//! OpenStack client errors
//!
//! Every verb in this crate reports failures through [`OpenStackError`].
//! Callers only ever need three questions answered: was it not found, was it
//! a conflict, or was it something else. Protocol status codes are mapped to
//! variants in one place (`common::HttpClient`) and never leak further.

use thiserror::Error;

/// Errors that can occur when interacting with the OpenStack APIs
#[derive(Debug, Error)]
pub enum OpenStackError {
    /// HTTP transport error (connection refused, timeout, TLS)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Resource not found (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflicting state (HTTP 409), e.g. a load balancer that is still
    /// PENDING_UPDATE or a security group that is still in use
    #[error("Conflict: {0}")]
    Conflict(String),

    /// OpenStack API returned any other non-success status
    #[error("OpenStack API error ({status}): {message}")]
    Api {
        /// HTTP status code returned by the service
        status: u16,
        /// Response body or summary
        message: String,
    },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (bad credentials, expired token, missing catalog entry)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Internal invariant violation inside this crate (never expected in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OpenStackError {
    /// Returns true for HTTP 404 style errors
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Returns true for HTTP 409 style errors
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Build an error from an HTTP status code and response body
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            404 => Self::NotFound(message),
            409 => Self::Conflict(message),
            401 | 403 => Self::Authentication(message),
            400 => Self::InvalidRequest(message),
            _ => Self::Api { status, message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(OpenStackError::from_status(404, "gone").is_not_found());
        assert!(OpenStackError::from_status(409, "busy").is_conflict());
        assert!(matches!(
            OpenStackError::from_status(401, "expired"),
            OpenStackError::Authentication(_)
        ));
        assert!(matches!(
            OpenStackError::from_status(503, "unavailable"),
            OpenStackError::Api { status: 503, .. }
        ));
    }

    #[test]
    fn test_other_errors_are_neither_not_found_nor_conflict() {
        let err = OpenStackError::Internal("broken".to_string());
        assert!(!err.is_not_found());
        assert!(!err.is_conflict());
    }
}
