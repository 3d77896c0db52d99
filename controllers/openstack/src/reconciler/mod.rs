//! Kubernetes side of reconciliation.
//!
//! Each object kind has a reconciler here that loads what the engine in
//! `services` needs, runs one pass of it and writes the resulting status
//! back. The shared pieces live in this module:
//! - finalizer add/remove via metadata merge patches
//! - status merge patches that only carry what changed
//! - mapping of engine results onto requeue actions and failure fields

pub mod cluster;
pub mod machine;
pub mod server_group;

use crate::backoff::BackoffTracker;
use crate::error::ControllerError;
use crate::scope::ScopeFactory;
use crate::services::{ReconcileOutcome, DEPENDENCY_POLL_INTERVAL};
use chrono::{DateTime, Utc};
use crds::{FailureReason, OpenStackClusterStatus, OpenStackMachineStatus, OpenStackServerGroupStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource};
use kube_runtime::controller::Action;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Finalizer guarding the OpenStack resources of every object kind
pub const FINALIZER: &str = "stackops.microscaler.io/openstack";

/// Status fields shared by every object kind
pub(crate) trait ObjectStatus: Serialize + Default + Clone + PartialEq {
    fn failure_reason(&self) -> Option<FailureReason>;
    fn record_failure(&mut self, reason: FailureReason, message: String);
    fn set_last_reconciled(&mut self, at: Option<DateTime<Utc>>);
}

impl ObjectStatus for OpenStackMachineStatus {
    fn failure_reason(&self) -> Option<FailureReason> {
        self.failure_reason
    }
    fn record_failure(&mut self, reason: FailureReason, message: String) {
        self.failure_reason = Some(reason);
        self.failure_message = Some(message);
    }
    fn set_last_reconciled(&mut self, at: Option<DateTime<Utc>>) {
        self.last_reconciled = at;
    }
}

impl ObjectStatus for OpenStackClusterStatus {
    fn failure_reason(&self) -> Option<FailureReason> {
        self.failure_reason
    }
    fn record_failure(&mut self, reason: FailureReason, message: String) {
        self.failure_reason = Some(reason);
        self.failure_message = Some(message);
    }
    fn set_last_reconciled(&mut self, at: Option<DateTime<Utc>>) {
        self.last_reconciled = at;
    }
}

impl ObjectStatus for OpenStackServerGroupStatus {
    fn failure_reason(&self) -> Option<FailureReason> {
        self.failure_reason
    }
    fn record_failure(&mut self, reason: FailureReason, message: String) {
        self.failure_reason = Some(reason);
        self.failure_message = Some(message);
    }
    fn set_last_reconciled(&mut self, at: Option<DateTime<Utc>>) {
        self.last_reconciled = at;
    }
}

/// Reconciles OpenStackMachine, OpenStackCluster and OpenStackServerGroup objects.
pub struct Reconciler {
    pub(crate) kube_client: Client,
    pub(crate) scopes: Arc<dyn ScopeFactory>,
    backoff: BackoffTracker,
}

impl Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").field("backoff", &self.backoff).finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(kube_client: Client, scopes: Arc<dyn ScopeFactory>, backoff: BackoffTracker) -> Self {
        Self {
            kube_client,
            scopes,
            backoff,
        }
    }

    /// Delay before retrying `key` after a transient error
    pub fn retry_after(&self, key: &str) -> std::time::Duration {
        self.backoff.next_for(key)
    }

    /// A pass finished without a transient error
    pub(crate) fn succeeded(&self, key: &str) {
        self.backoff.reset(key);
    }
}

/// `kind/namespace/name`, the key of per-object backoff state
pub fn object_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{kind}/{namespace}/{name}")
}

pub(crate) fn has_finalizer(meta: &ObjectMeta) -> bool {
    meta.finalizers.as_ref().is_some_and(|f| f.iter().any(|f| f == FINALIZER))
}

/// Finalizer list with ours appended, `None` when already present
fn finalizers_with(meta: &ObjectMeta) -> Option<Vec<String>> {
    if has_finalizer(meta) {
        return None;
    }
    let mut finalizers = meta.finalizers.clone().unwrap_or_default();
    finalizers.push(FINALIZER.to_string());
    Some(finalizers)
}

/// Finalizer list with ours removed, `None` when it was not there
fn finalizers_without(meta: &ObjectMeta) -> Option<Vec<String>> {
    if !has_finalizer(meta) {
        return None;
    }
    Some(
        meta.finalizers
            .iter()
            .flatten()
            .filter(|f| f.as_str() != FINALIZER)
            .cloned()
            .collect(),
    )
}

async fn patch_finalizers<K>(api: &Api<K>, name: &str, finalizers: Vec<String>) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let patch = serde_json::json!({
        "metadata": {
            "finalizers": finalizers
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

pub(crate) async fn add_finalizer<K>(api: &Api<K>, name: &str, meta: &ObjectMeta) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if let Some(finalizers) = finalizers_with(meta) {
        patch_finalizers(api, name, finalizers).await?;
        debug!("Added finalizer to {}", name);
    }
    Ok(())
}

pub(crate) async fn remove_finalizer<K>(api: &Api<K>, name: &str, meta: &ObjectMeta) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if let Some(finalizers) = finalizers_without(meta) {
        patch_finalizers(api, name, finalizers).await?;
        info!("Removed finalizer from {}", name);
    }
    Ok(())
}

/// JSON merge patch turning `before` into `after`
///
/// Fields that disappeared are sent as `null`; arrays are replaced whole.
/// Returns `None` when nothing changed.
pub(crate) fn merge_patch(before: &Value, after: &Value) -> Option<Value> {
    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patch = Map::new();
            for (key, value) in new {
                match old.get(key) {
                    Some(previous) => {
                        if let Some(changed) = merge_patch(previous, value) {
                            patch.insert(key.clone(), changed);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            for key in old.keys() {
                if !new.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        (old, new) if old == new => None,
        (_, new) => Some(new.clone()),
    }
}

/// Status patch for `after`, or `None` when only the timestamp would change
///
/// `lastReconciled` is stamped only alongside a real change so that writing
/// the status never triggers another reconcile on its own.
pub(crate) fn status_patch<S: ObjectStatus>(
    before: &S,
    after: &mut S,
    now: DateTime<Utc>,
) -> Result<Option<Value>, ControllerError> {
    let to_value = |status: &S| {
        serde_json::to_value(status).map_err(|e| ControllerError::Internal(format!("status serialization: {e}")))
    };

    let mut unstamped = after.clone();
    unstamped.set_last_reconciled(None);
    let mut previous = before.clone();
    previous.set_last_reconciled(None);
    if unstamped == previous {
        return Ok(None);
    }

    after.set_last_reconciled(Some(now));
    Ok(merge_patch(&to_value(before)?, &to_value(after)?).map(|status| serde_json::json!({ "status": status })))
}

/// Write `after` to the status subresource if it differs from `before`
pub(crate) async fn write_status<K, S>(api: &Api<K>, name: &str, before: &S, after: &mut S) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
    S: ObjectStatus,
{
    if let Some(patch) = status_patch(before, after, Utc::now())? {
        debug!("Patching status of {}: {}", name, patch);
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)).await?;
    }
    Ok(())
}

/// Turn the result of one engine pass into the next controller action
///
/// Terminal errors are recorded on the status. On the create path the
/// object then waits for a spec change; during deletion the error is still
/// retried, since nothing else can unblock the finalizer.
pub(crate) fn settle<S: ObjectStatus>(
    status: &mut S,
    result: Result<ReconcileOutcome, ControllerError>,
    deleting: bool,
) -> Result<Action, ControllerError> {
    match result {
        Ok(ReconcileOutcome::Ready) => Ok(Action::await_change()),
        Ok(ReconcileOutcome::Requeue(after)) => Ok(Action::requeue(after)),
        Err(e) if e.is_dependency_wait() => {
            debug!("Waiting: {}", e);
            Ok(Action::requeue(DEPENDENCY_POLL_INTERVAL))
        }
        Err(e) => match e.failure_reason() {
            Some(reason) => {
                warn!("Terminal failure ({:?}): {}", reason, e);
                status.record_failure(reason, e.to_string());
                if deleting { Err(e) } else { Ok(Action::await_change()) }
            }
            None => Err(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::InstanceState;
    use std::time::Duration;

    fn meta(finalizers: &[&str]) -> ObjectMeta {
        ObjectMeta {
            finalizers: Some(finalizers.iter().map(|f| f.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_finalizer_lists() {
        let none = ObjectMeta::default();
        assert!(!has_finalizer(&none));
        assert_eq!(finalizers_with(&none), Some(vec![FINALIZER.to_string()]));
        assert_eq!(finalizers_without(&none), None);

        let ours = meta(&["other.io/keep", FINALIZER]);
        assert!(has_finalizer(&ours));
        assert_eq!(finalizers_with(&ours), None);
        assert_eq!(finalizers_without(&ours), Some(vec!["other.io/keep".to_string()]));
    }

    #[test]
    fn test_merge_patch_nulls_removed_fields() {
        let before = serde_json::json!({ "ready": true, "instanceId": "abc", "addresses": [1, 2] });
        let after = serde_json::json!({ "ready": true, "addresses": [1] });
        assert_eq!(
            merge_patch(&before, &after),
            Some(serde_json::json!({ "instanceId": null, "addresses": [1] }))
        );
        assert_eq!(merge_patch(&after, &after), None);
    }

    #[test]
    fn test_status_patch_skips_timestamp_only_changes() {
        let now = Utc::now();
        let before = OpenStackMachineStatus::default();
        let mut after = before.clone();
        after.last_reconciled = Some(now);
        assert_eq!(status_patch(&before, &mut after, now).unwrap(), None);

        let mut after = before.clone();
        after.instance_state = InstanceState::Building;
        let patch = status_patch(&before, &mut after, now).unwrap().unwrap();
        assert_eq!(patch["status"]["instanceState"], "Building");
        assert!(patch["status"]["lastReconciled"].is_string());
        assert_eq!(after.last_reconciled, Some(now));
    }

    #[test]
    fn test_settle() {
        let mut status = OpenStackMachineStatus::default();
        assert_eq!(
            settle(&mut status, Ok(ReconcileOutcome::Requeue(Duration::from_secs(15))), false).unwrap(),
            Action::requeue(Duration::from_secs(15))
        );
        assert_eq!(
            settle(&mut status, Err(ControllerError::DependencyNotReady("cluster".into())), false).unwrap(),
            Action::requeue(DEPENDENCY_POLL_INTERVAL)
        );
        assert!(status.failure_reason.is_none());

        assert!(settle(&mut status, Err(ControllerError::Internal("x".into())), false).is_err());
        assert!(status.failure_reason.is_none());

        let action = settle(&mut status, Err(ControllerError::InvalidConfig("no image".into())), false).unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(status.failure_reason, Some(FailureReason::InvalidConfiguration));
        assert!(status.failure_message.as_deref().unwrap_or_default().contains("no image"));
    }

    #[test]
    fn test_settle_keeps_retrying_terminal_errors_during_delete() {
        let mut status = OpenStackMachineStatus::default();
        let result = settle(&mut status, Err(ControllerError::AmbiguousResource("2 ports".into())), true);
        assert!(result.is_err());
        assert_eq!(status.failure_reason, Some(FailureReason::AmbiguousResource));
    }
}
