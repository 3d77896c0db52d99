//! Kubernetes resource watchers.
//!
//! Every object kind runs its own `kube_runtime::Controller`, which
//! reconnects watches, serializes reconciles per object and applies the
//! requeue actions the reconcilers return. Transient errors are retried
//! with a Fibonacci backoff per object.

use crate::config::Config;
use crate::error::ControllerError;
use crate::reconciler::{cluster, machine, object_key, server_group, Reconciler};
use crds::{OpenStackCluster, OpenStackMachine, OpenStackServerGroup};
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::{
    controller::{Action, Config as ControllerConfig},
    watcher, Controller,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Run a controller for one object kind until its watch stream ends.
async fn watch_resource<K, F, Fut>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    kind: &'static str,
    config: &Config,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = Result<Action, ControllerError>> + Send + 'static,
{
    info!("Starting {} watcher", kind);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = object_key(kind, &obj.namespace().unwrap_or_default(), &obj.name_any());
        let delay = ctx.retry_after(&key);
        error!("Reconciliation of {} failed, retrying in {:?}: {}", key, delay, error);
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            debug!("Reconciling {} {}/{}", kind, obj.namespace().unwrap_or_default(), obj.name_any());
            reconcile_fn(ctx, obj).await
        }
    };

    let controller_config = ControllerConfig::default()
        .debounce(config.debounce)
        .concurrency(config.concurrency);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .shutdown_on_signal()
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("Controller error for {}: {}", kind, e);
            }
        })
        .await;

    info!("{} watcher stopped", kind);
    Ok(())
}

/// Watches Kubernetes resources for changes.
#[derive(Debug)]
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    config: Config,
    machine_api: Api<OpenStackMachine>,
    cluster_api: Api<OpenStackCluster>,
    server_group_api: Api<OpenStackServerGroup>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(
        reconciler: Arc<Reconciler>,
        config: Config,
        machine_api: Api<OpenStackMachine>,
        cluster_api: Api<OpenStackCluster>,
        server_group_api: Api<OpenStackServerGroup>,
    ) -> Self {
        Self {
            reconciler,
            config,
            machine_api,
            cluster_api,
            server_group_api,
        }
    }

    /// Starts watching OpenStackMachine resources.
    pub async fn watch_openstack_machines(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.machine_api.clone(),
            self.reconciler.clone(),
            |reconciler, machine| async move { reconciler.reconcile_openstack_machine(machine).await },
            machine::KIND,
            &self.config,
        )
        .await
    }

    /// Starts watching OpenStackCluster resources.
    pub async fn watch_openstack_clusters(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.cluster_api.clone(),
            self.reconciler.clone(),
            |reconciler, cluster| async move { reconciler.reconcile_openstack_cluster(cluster).await },
            cluster::KIND,
            &self.config,
        )
        .await
    }

    /// Starts watching OpenStackServerGroup resources.
    pub async fn watch_openstack_server_groups(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.server_group_api.clone(),
            self.reconciler.clone(),
            |reconciler, group| async move { reconciler.reconcile_openstack_server_group(group).await },
            server_group::KIND,
            &self.config,
        )
        .await
    }
}
