//! OpenStack Controller
//!
//! Reconciles the StackOps OpenStack CRDs against an OpenStack cloud:
//! - OpenStackCluster: shared network, security groups and API load balancer
//! - OpenStackMachine: one server with its ports, trunks and root volume
//! - OpenStackServerGroup: a Nova server group
//!
//! Configuration comes from environment variables (see `config.rs`),
//! credentials from a `clouds.yaml` Secret referenced by each object.

mod backoff;
mod config;
mod controller;
mod error;
mod probes;
mod reconciler;
mod scope;
mod services;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use probes::Readiness;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube and reqwest both use rustls; pick the provider once for the process
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        error!("A rustls crypto provider was already installed");
    }

    info!("Starting OpenStack Controller");
    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Probe address: {}", config.probe_addr);
    info!("  Concurrency: {}", config.concurrency);
    info!(
        "  Backoff: {}s..{}s",
        config.backoff_min_seconds, config.backoff_max_seconds
    );

    let readiness = Readiness::default();
    let probe_server = tokio::spawn(probes::serve(config.probe_addr, readiness.clone()));

    let controller = Controller::new(config, readiness).await?;
    tokio::select! {
        result = controller.run() => result?,
        result = probe_server => {
            result.map_err(|e| ControllerError::Internal(format!("probe server panicked: {}", e)))??;
        }
    }

    info!("OpenStack Controller stopped");
    Ok(())
}
