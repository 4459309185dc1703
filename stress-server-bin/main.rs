//! Demo server: receives the length-prefixed file and stores it as
//! `recvthis.txt`.

use std::{fs, io, time::Duration};

use tokio::{net::TcpStream, time::sleep};
use tracing_subscriber::EnvFilter;

use snet::{
    config,
    stcp::{StcpConfig, StcpServer},
    topology,
};

const SERVER_PORT: u32 = 88;
const WAIT_TIME: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        eprintln!("stress-server failed: {e}");
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

    let sock = server.sock(SERVER_PORT)?;
    server.accept(sock).await?;
    println!("connection accepted on port {SERVER_PORT}");

    let mut len_buf = [0u8; 4];
    server.recv(sock, &mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    println!("receiving {len} bytes");

    // Drain in slices so files larger than the receive buffer keep flowing.
    let mut data = vec![0u8; len];
    for chunk in data.chunks_mut(100_000) {
        server.recv(sock, chunk).await?;
    }
    fs::write("recvthis.txt", &data)?;
    println!("stored {len} bytes in recvthis.txt");

    sleep(WAIT_TIME).await;
    server.close(sock)?;
    Ok(())
}
