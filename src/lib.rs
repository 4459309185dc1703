//! A three-layer user-space internetworking stack.
//!
//! [`stcp`] provides reliable in-order byte streams between (node, port)
//! endpoints, [`sip`] routes packets across the overlay with a
//! distance-vector protocol, and [`son`] maintains the TCP mesh between
//! topological neighbors. The layers run as separate processes wired
//! together by sentinel-framed local TCP streams ([`chan`]).

pub mod chan;
pub mod config;
pub mod framing;
pub mod sip;
pub mod son;
pub mod stcp;
pub mod topology;

pub use snet_types as types;
