//! Networking services: networks, ports, trunks, security groups, floating IPs

pub mod floating_ip;
pub mod network;
pub mod port;
pub mod security_group;
pub mod trunk;

#[cfg(test)]
mod port_test;
