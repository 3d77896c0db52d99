//! Compute services: servers, root volumes, server groups and the
//! references a machine resolves before it boots

pub mod instance;
pub mod references;
pub mod root_volume;
pub mod server_group;
