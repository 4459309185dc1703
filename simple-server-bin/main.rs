//! Demo server: accepts the two demo connections and prints the strings.

use std::{io, time::Duration};

use tokio::{net::TcpStream, time::sleep};
use tracing_subscriber::EnvFilter;

use snet::{
    config,
    stcp::{StcpConfig, StcpServer},
    topology,
};

const SERVER_PORT1: u32 = 88;
const SERVER_PORT2: u32 = 90;

/// Settling time before the sockets are closed; long enough for the client
/// teardown plus the closewait timer.
const WAIT_TIME: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("simple-server failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> io::Result<()> {
    let my_node = topology::self_node_id()?;
    let sip = TcpStream::connect(config::sip_addr()).await?;
    let cfg = StcpConfig {
        loss_rate: config::loss_rate(),
        ..StcpConfig::default()
    };
    let server = StcpServer::new(sip, my_node, cfg);

    let sock1 = server.sock(SERVER_PORT1)?;
    let sock2 = server.sock(SERVER_PORT2)?;

    server.accept(sock1).await?;
    println!("connection 1 accepted on port {SERVER_PORT1}");
    server.accept(sock2).await?;
    println!("connection 2 accepted on port {SERVER_PORT2}");

    for _ in 0..5 {
        let mut buf = [0u8; 6];
        server.recv(sock1, &mut buf).await?;
        println!(
            "received on connection 1: {:?}",
            String::from_utf8_lossy(&buf)
        );
    }
    for _ in 0..5 {
        let mut buf = [0u8; 7];
        server.recv(sock2, &mut buf).await?;
        println!(
            "received on connection 2: {:?}",
            String::from_utf8_lossy(&buf)
        );
    }

    sleep(WAIT_TIME).await;

    server.close(sock1)?;
    server.close(sock2)?;
    Ok(())
}
