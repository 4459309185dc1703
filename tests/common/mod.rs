#![allow(dead_code)]

//! Shared harness: a pair of STCP endpoints whose local SIP streams are
//! bridged by an in-process relay, standing in for a one-hop SIP/SON path.

use std::{io::Result, time::Duration};

use tokio::{
    io::BufReader,
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use snet::{
    chan::{SegSink, SegStream},
    stcp::StcpConfig,
    types::NodeId,
};

pub const CLIENT_NODE: NodeId = 1;
pub const SERVER_NODE: NodeId = 2;

/// A transport configuration with tight timers so tests run quickly.
pub fn fast_cfg(loss_rate: f64) -> StcpConfig {
    StcpConfig {
        syn_timeout: Duration::from_millis(100),
        fin_timeout: Duration::from_millis(100),
        data_timeout: Duration::from_millis(100),
        sendbuf_polling_interval: Duration::from_millis(20),
        accept_polling_interval: Duration::from_millis(20),
        recvbuf_polling_interval: Duration::from_millis(20),
        closewait_timeout: Duration::from_millis(300),
        loss_rate,
        ..StcpConfig::default()
    }
}

/// Connects a client endpoint (node 1) and a server endpoint (node 2)
/// through a faithful relay: every tuple one endpoint emits is delivered to
/// the other, tagged with the emitter's node id. Loss is injected by the
/// endpoints themselves per their configuration.
pub async fn attach_endpoints() -> Result<(TcpStream, TcpStream)> {
    let client_listener = TcpListener::bind("127.0.0.1:0").await?;
    let server_listener = TcpListener::bind("127.0.0.1:0").await?;

    let (client_ep, client_sip) = tokio::join!(
        TcpStream::connect(client_listener.local_addr()?),
        client_listener.accept(),
    );
    let (server_ep, server_sip) = tokio::join!(
        TcpStream::connect(server_listener.local_addr()?),
        server_listener.accept(),
    );

    let (client_r, client_w) = client_sip?.0.into_split();
    let (server_r, server_w) = server_sip?.0.into_split();
    tokio::spawn(pump(client_r, server_w, CLIENT_NODE));
    tokio::spawn(pump(server_r, client_w, SERVER_NODE));

    Ok((client_ep?, server_ep?))
}

/// Forwards `(dest, segment)` tuples from one endpoint into the other,
/// rewriting the node id to the sender's, as the SIP layers would.
async fn pump(r: OwnedReadHalf, w: OwnedWriteHalf, src_node: NodeId) {
    let mut stream = SegStream::new(BufReader::new(r), 0.0);
    let mut sink = SegSink::new(w);
    loop {
        match stream.recv().await {
            Err(_) => return,
            Ok(None) => continue,
            Ok(Some((_dest, seg))) => {
                if sink.send(src_node, &seg).await.is_err() {
                    return;
                }
            }
        }
    }
}
