//! Demo client: streams `sendthis.txt`, length-prefixed, over one
//! connection.

use std::{
    fs,
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

const CLIENT_PORT: u32 = 87;
const SERVER_PORT: u32 = 88;
const WAIT_TIME: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("stress-client failed: {e}");
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

    let data = fs::read("sendthis.txt")?;
    println!("sending {} bytes to node {server_node}", data.len());

    let sip = TcpStream::connect(config::sip_addr()).await?;
    let cfg = StcpConfig {
        loss_rate: config::loss_rate(),
        ..StcpConfig::default()
    };
    let client = StcpClient::new(sip, my_node, cfg);

    let sock = client.sock(CLIENT_PORT)?;
    client.connect(sock, server_node, SERVER_PORT).await?;

    // Length first, then the file itself.
    client.send(sock, &(data.len() as u32).to_le_bytes())?;
    client.send(sock, &data)?;

    sleep(WAIT_TIME).await;

    client.disconnect(sock).await?;
    client.close(sock)?;
    Ok(())
}
