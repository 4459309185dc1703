//! STCP, a TCP-like transport over the SIP overlay.
//!
//! Endpoints are (node, port) pairs. The client side ([`StcpClient`]) owns a
//! Go-Back-N send path, the server side ([`StcpServer`]) an in-order receive
//! path with cumulative acknowledgements. Both talk to the local SIP process
//! over a framed segment channel and run one segment-handler task that
//! drives the per-connection state machines.

use std::time::Duration;

mod client;
mod recvbuf;
mod sendbuf;
mod server;

pub use client::StcpClient;
pub use server::StcpServer;

/// Transport parameters. The defaults are the stack's compiled-in constants;
/// tests shrink the timers.
#[derive(Debug, Clone)]
pub struct StcpConfig {
    /// Capacity of the per-endpoint TCB table.
    pub max_connections: usize,
    /// Maximum number of sent-but-unacknowledged segments per connection.
    pub gbn_window: usize,
    /// Capacity of a server connection's receive buffer.
    pub recv_buf_size: usize,
    pub syn_timeout: Duration,
    pub syn_max_retry: usize,
    pub fin_timeout: Duration,
    pub fin_max_retry: usize,
    /// Age of the oldest outstanding segment that triggers retransmission.
    pub data_timeout: Duration,
    pub sendbuf_polling_interval: Duration,
    pub accept_polling_interval: Duration,
    pub recvbuf_polling_interval: Duration,
    pub closewait_timeout: Duration,
    /// Simulated loss rate applied on this endpoint's receive path.
    pub loss_rate: f64,
}

impl Default for StcpConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            gbn_window: 10,
            recv_buf_size: 1_000_000,
            syn_timeout: Duration::from_millis(500),
            syn_max_retry: 5,
            fin_timeout: Duration::from_millis(500),
            fin_max_retry: 5,
            data_timeout: Duration::from_millis(300),
            sendbuf_polling_interval: Duration::from_millis(100),
            accept_polling_interval: Duration::from_millis(100),
            recvbuf_polling_interval: Duration::from_millis(100),
            closewait_timeout: Duration::from_secs(1),
            loss_rate: crate::config::PKT_LOSS_RATE,
        }
    }
}

impl StcpConfig {
    /// A configuration with no simulated loss.
    pub fn lossless() -> Self {
        Self {
            loss_rate: 0.0,
            ..Self::default()
        }
    }
}
