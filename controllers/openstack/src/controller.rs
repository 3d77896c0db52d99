//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the Kubernetes
//! client, the credential scopes and one watcher per object kind:
//! - OpenStackCluster: network lookup, managed security groups, API load balancer
//! - OpenStackMachine: ports, root volume, server, floating IP, pool membership
//! - OpenStackServerGroup: Nova server groups

use crate::backoff::BackoffTracker;
use crate::config::Config;
use crate::error::ControllerError;
use crate::probes::Readiness;
use crate::reconciler::Reconciler;
use crate::scope::SecretScopeFactory;
use crate::watcher::Watcher;
use crds::{OpenStackCluster, OpenStackMachine, OpenStackServerGroup};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

fn api_for<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = kube::core::NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Main controller for OpenStack resource management.
#[derive(Debug)]
pub struct Controller {
    cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    machine_watcher: JoinHandle<Result<(), ControllerError>>,
    server_group_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its watchers.
    pub async fn new(config: Config, readiness: Readiness) -> Result<Self, ControllerError> {
        info!("Initializing OpenStack Controller");

        let kube_client = Client::try_default().await?;
        let scopes = Arc::new(SecretScopeFactory::new(kube_client.clone(), config.request_timeout));
        let backoff = BackoffTracker::new(config.backoff_min_seconds, config.backoff_max_seconds);
        let reconciler = Arc::new(Reconciler::new(kube_client.clone(), scopes, backoff));

        let namespace = config.namespace.as_deref();
        let watcher = Arc::new(Watcher::new(
            reconciler,
            config.clone(),
            api_for::<OpenStackMachine>(&kube_client, namespace),
            api_for::<OpenStackCluster>(&kube_client, namespace),
            api_for::<OpenStackServerGroup>(&kube_client, namespace),
        ));

        let cluster_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_openstack_clusters().await })
        };
        let machine_watcher = {
            let watcher = watcher.clone();
            tokio::spawn(async move { watcher.watch_openstack_machines().await })
        };
        let server_group_watcher = tokio::spawn(async move { watcher.watch_openstack_server_groups().await });

        readiness.set_ready();
        Ok(Self {
            cluster_watcher,
            machine_watcher,
            server_group_watcher,
        })
    }

    /// Runs the controller until a watcher stops.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("OpenStack Controller running");

        tokio::select! {
            result = &mut self.cluster_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("OpenStackCluster watcher panicked: {}", e)))??;
            }
            result = &mut self.machine_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("OpenStackMachine watcher panicked: {}", e)))??;
            }
            result = &mut self.server_group_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("OpenStackServerGroup watcher panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
