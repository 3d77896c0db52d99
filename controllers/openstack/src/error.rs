//! Controller-specific error types.
//!
//! Errors fall into two groups. Terminal errors will recur identically on
//! every retry, so they are recorded on the object as a failure reason and
//! the object stops advancing until its spec changes. Everything else is
//! transient and is retried with backoff without touching the status.

use crds::FailureReason;
use kube::Error as KubeError;
use openstack_client::OpenStackError;
use thiserror::Error;

/// Errors that can occur in the OpenStack Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// OpenStack API error
    #[error("OpenStack error: {0}")]
    OpenStack(#[from] OpenStackError),

    /// More than one OpenStack resource matches a name that must be unique
    #[error("Ambiguous resource: {0}")]
    AmbiguousResource(String),

    /// Unresolvable reference or contradictory spec
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// OpenStack moved a resource into an unrecoverable state
    #[error("Resource failed: {0}")]
    ResourceFailed(String),

    /// Something this object depends on is not there yet
    #[error("Dependency not ready: {0}")]
    DependencyNotReady(String),

    /// A load balancer still has listeners or pools
    #[error("Load balancer has associated resources: {0}")]
    HasAssociatedResources(String),

    /// Credentials could not be loaded from the identity Secret
    #[error("Identity error: {0}")]
    Identity(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Invariant violated inside the controller
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControllerError {
    /// Retrying with the same inputs cannot succeed
    pub fn is_terminal(&self) -> bool {
        self.failure_reason().is_some()
    }

    /// Failure reason recorded on the object for terminal errors
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::AmbiguousResource(_) => Some(FailureReason::AmbiguousResource),
            Self::InvalidConfig(_) => Some(FailureReason::InvalidConfiguration),
            Self::ResourceFailed(_) => Some(FailureReason::ResourceFailed),
            _ => None,
        }
    }

    /// Not-yet-available dependencies are waited for, not reported
    pub fn is_dependency_wait(&self) -> bool {
        matches!(self, Self::DependencyNotReady(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert_eq!(
            ControllerError::AmbiguousResource("2 volumes named m1-root".into()).failure_reason(),
            Some(FailureReason::AmbiguousResource)
        );
        assert_eq!(
            ControllerError::InvalidConfig("no network".into()).failure_reason(),
            Some(FailureReason::InvalidConfiguration)
        );
        assert!(ControllerError::ResourceFailed("volume error".into()).is_terminal());
    }

    #[test]
    fn test_openstack_errors_are_transient() {
        for err in [
            OpenStackError::Conflict("PENDING_UPDATE".into()),
            OpenStackError::Api {
                status: 503,
                message: "unavailable".into(),
            },
            OpenStackError::NotFound("gone".into()),
        ] {
            assert!(!ControllerError::from(err).is_terminal());
        }
        assert!(!ControllerError::DependencyNotReady("cluster network".into()).is_terminal());
        assert!(!ControllerError::HasAssociatedResources("lb".into()).is_terminal());
    }
}
