//! Process-level constants and environment overrides.
//!
//! The stack's processes take no command line flags; anything deployment
//! specific is an environment variable with a compiled-in default.

use std::{env, net::SocketAddr, path::PathBuf};

/// Overlay port SON listens on for inbound neighbor links.
pub const CONNECTION_PORT: u16 = 3508;

/// Local port SON listens on for the SIP process.
pub const SON_PORT: u16 = 3558;

/// Local port SIP listens on for the STCP endpoint.
pub const SIP_PORT: u16 = 3608;

/// Default fraction of received segments lost or corrupted by the injector.
pub const PKT_LOSS_RATE: f64 = 0.1;

/// Path of the topology file, `SNET_TOPOLOGY` override included.
pub fn topology_path() -> PathBuf {
    env::var_os("SNET_TOPOLOGY")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("topology/topology.dat"))
}

/// Segment loss rate, `SNET_LOSS_RATE` override included.
pub fn loss_rate() -> f64 {
    env_parsed("SNET_LOSS_RATE", PKT_LOSS_RATE)
}

/// Local address of the SIP service for STCP endpoints.
pub fn sip_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], env_parsed("SNET_SIP_PORT", SIP_PORT)))
}

/// Local address of the SON service for the SIP process.
pub fn son_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], env_parsed("SNET_SON_PORT", SON_PORT)))
}

/// Overlay neighbor port, `SNET_CONNECTION_PORT` override included.
pub fn connection_port() -> u16 {
    env_parsed("SNET_CONNECTION_PORT", CONNECTION_PORT)
}

fn env_parsed<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
