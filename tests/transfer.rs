//! End-to-end transfers between a client and a server endpoint.

mod common;

use std::{io::Result, sync::Arc, time::Duration};

use tokio::time::{sleep, timeout};

use common::{attach_endpoints, fast_cfg, CLIENT_NODE, SERVER_NODE};
use snet::stcp::{StcpClient, StcpServer};
use snet::types::MAX_SEG_LEN;

#[tokio::test]
async fn short_strings_arrive_in_order() -> Result<()> {
    timeout(Duration::from_secs(60), async {
        let (client_ep, server_ep) = attach_endpoints().await?;
        let client = StcpClient::new(client_ep, CLIENT_NODE, fast_cfg(0.0));
        let server = StcpServer::new(server_ep, SERVER_NODE, fast_cfg(0.0));

        let cs1 = client.sock(87)?;
        let ss1 = server.sock(88)?;
        let (connected, accepted) =
            tokio::join!(client.connect(cs1, SERVER_NODE, 88), server.accept(ss1));
        connected?;
        accepted?;

        let cs2 = client.sock(89)?;
        let ss2 = server.sock(90)?;
        let (connected, accepted) =
            tokio::join!(client.connect(cs2, SERVER_NODE, 90), server.accept(ss2));
        connected?;
        accepted?;

        for _ in 0..5 {
            client.send(cs1, b"hello\0")?;
        }
        for _ in 0..5 {
            client.send(cs2, b"byebye\0")?;
        }

        for _ in 0..5 {
            let mut buf = [0u8; 6];
            server.recv(ss1, &mut buf).await?;
            assert_eq!(&buf, b"hello\0");
        }
        for _ in 0..5 {
            let mut buf = [0u8; 7];
            server.recv(ss2, &mut buf).await?;
            assert_eq!(&buf, b"byebye\0");
        }

        client.disconnect(cs1).await?;
        client.close(cs1)?;
        client.disconnect(cs2).await?;
        client.close(cs2)?;
        Ok(())
    })
    .await
    .expect("test deadlocked")
}

#[tokio::test]
async fn boundary_file_lengths_transfer_exactly() -> Result<()> {
    timeout(Duration::from_secs(120), async {
        let (client_ep, server_ep) = attach_endpoints().await?;
        let client = StcpClient::new(client_ep, CLIENT_NODE, fast_cfg(0.0));
        let server = StcpServer::new(server_ep, SERVER_NODE, fast_cfg(0.0));

        for (round, len) in [1, MAX_SEG_LEN, MAX_SEG_LEN + 1, 100 * MAX_SEG_LEN]
            .into_iter()
            .enumerate()
        {
            let client_port = 100 + round as u32;
            let server_port = 200 + round as u32;
            let cs = client.sock(client_port)?;
            let ss = server.sock(server_port)?;
            let (connected, accepted) = tokio::join!(
                client.connect(cs, SERVER_NODE, server_port),
                server.accept(ss)
            );
            connected?;
            accepted?;

            let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            client.send(cs, &data)?;

            let mut received = vec![0u8; len];
            server.recv(ss, &mut received).await?;
            assert_eq!(received, data, "length {len} transferred incorrectly");

            client.disconnect(cs).await?;
            client.close(cs)?;
        }
        Ok(())
    })
    .await
    .expect("test deadlocked")
}

#[tokio::test]
async fn lossy_path_still_delivers_intact() -> Result<()> {
    timeout(Duration::from_secs(120), async {
        // Both endpoints drop or bit-flip 10% of received records; the
        // checksum plus Go-Back-N recovery must keep the stream intact.
        let (client_ep, server_ep) = attach_endpoints().await?;
        let client = StcpClient::new(client_ep, CLIENT_NODE, fast_cfg(0.1));
        let server = StcpServer::new(server_ep, SERVER_NODE, fast_cfg(0.1));

        let cs = client.sock(87)?;
        let ss = server.sock(88)?;
        let (connected, accepted) =
            tokio::join!(client.connect(cs, SERVER_NODE, 88), server.accept(ss));
        connected?;
        accepted?;

        let data: Vec<u8> = (0..100_000).map(|i| (i * 31 % 256) as u8).collect();
        client.send(cs, &data)?;

        let mut received = vec![0u8; data.len()];
        for chunk in received.chunks_mut(10_000) {
            server.recv(ss, chunk).await?;
        }
        assert_eq!(received, data);

        client.disconnect(cs).await?;
        client.close(cs)?;
        Ok(())
    })
    .await
    .expect("test deadlocked")
}

#[tokio::test]
async fn concurrent_connections_are_independent() -> Result<()> {
    timeout(Duration::from_secs(60), async {
        let (client_ep, server_ep) = attach_endpoints().await?;
        let client = Arc::new(StcpClient::new(client_ep, CLIENT_NODE, fast_cfg(0.0)));
        let server = Arc::new(StcpServer::new(server_ep, SERVER_NODE, fast_cfg(0.0)));

        let mut socks = Vec::new();
        for i in 0..4u32 {
            let cs = client.sock(300 + i)?;
            let ss = server.sock(400 + i)?;
            let (connected, accepted) =
                tokio::join!(client.connect(cs, SERVER_NODE, 400 + i), server.accept(ss));
            connected?;
            accepted?;
            socks.push((cs, ss));
        }

        // Interleave sends across all four connections.
        for round in 0..8u8 {
            for (i, &(cs, _)) in socks.iter().enumerate() {
                client.send(cs, &[round, i as u8, round ^ 0x5a])?;
            }
        }

        for (i, &(_, ss)) in socks.iter().enumerate() {
            for round in 0..8u8 {
                let mut buf = [0u8; 3];
                server.recv(ss, &mut buf).await?;
                assert_eq!(buf, [round, i as u8, round ^ 0x5a]);
            }
        }

        // Give the slot-freeing a full pass: disconnect all, then close all.
        for &(cs, _) in &socks {
            client.disconnect(cs).await?;
            client.close(cs)?;
        }
        sleep(Duration::from_millis(500)).await;
        for &(_, ss) in &socks {
            server.close(ss)?;
        }
        Ok(())
    })
    .await
    .expect("test deadlocked")
}
