//! OpenStack API models
//!
//! Response models mirror the JSON representations of each service.
//! Request models (`Create*Opts`) are strongly typed per operation and list
//! filters are plain structs translated into query strings by `common::query`.

pub mod compute;
pub mod image;
pub mod loadbalancer;
pub mod network;
pub mod volume;

pub use compute::*;
pub use image::*;
pub use loadbalancer::*;
pub use network::*;
pub use volume::*;
