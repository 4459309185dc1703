//! Demo client: two connections to a server node, five short strings each.

use std::{
    io::{self, Write},
    time::Duration,
};

use tokio::{net::TcpStream, time::sleep};
use tracing_subscriber::EnvFilter;

use snet::{
    config,
    stcp::{StcpClient, StcpConfig},
    topology,
};

const CLIENT_PORT1: u32 = 87;
const SERVER_PORT1: u32 = 88;
const CLIENT_PORT2: u32 = 89;
const SERVER_PORT2: u32 = 90;

/// Grace period for the server application to come up.
const START_DELAY: Duration = Duration::from_secs(1);
/// Settling time before teardown.
const WAIT_TIME: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("simple-client failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> io::Result<()> {
    let my_node = topology::self_node_id()?;

    print!("Enter server name to connect: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    let server_node = topology::node_id_from_name(line.trim())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unknown host name"))?;
    println!("connecting to node {server_node}");

    let sip = TcpStream::connect(config::sip_addr()).await?;
    let cfg = StcpConfig {
        loss_rate: config::loss_rate(),
        ..StcpConfig::default()
    };
    let client = StcpClient::new(sip, my_node, cfg);
    sleep(START_DELAY).await;

    let sock1 = client.sock(CLIENT_PORT1)?;
    client.connect(sock1, server_node, SERVER_PORT1).await?;
    println!("connection 1 established ({CLIENT_PORT1} -> {SERVER_PORT1})");

    let sock2 = client.sock(CLIENT_PORT2)?;
    client.connect(sock2, server_node, SERVER_PORT2).await?;
    println!("connection 2 established ({CLIENT_PORT2} -> {SERVER_PORT2})");

    for _ in 0..5 {
        client.send(sock1, b"hello\0")?;
        println!("sent \"hello\" on connection 1");
    }
    for _ in 0..5 {
        client.send(sock2, b"byebye\0")?;
        println!("sent \"byebye\" on connection 2");
    }

    sleep(WAIT_TIME).await;

    client.disconnect(sock1).await?;
    client.close(sock1)?;
    client.disconnect(sock2).await?;
    client.close(sock2)?;
    Ok(())
}
