//! StackOps CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the StackOps OpenStack controller.

pub mod openstack_cluster;
pub mod openstack_machine;
pub mod openstack_server_group;
pub mod references;

pub use openstack_cluster::*;
pub use openstack_machine::*;
pub use openstack_server_group::*;
pub use references::*;
