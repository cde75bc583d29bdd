//! Peer transport: HTTP chain fetches and UDP block propagation.

use crate::blockchain::{verify_block, Block};
use crate::error::{ChainError, Result};
use crate::sync::{PeerChain, PeerClient};
use reqwest::Client;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{info, warn};

/// Largest datagram the listener accepts.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Fetches chains over `GET http://<peer>/chain?pk=<pk>`.
#[derive(Debug, Clone)]
pub struct HttpPeerClient {
    client: Client,
}

impl HttpPeerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(HttpPeerClient { client })
    }
}

impl PeerClient for HttpPeerClient {
    fn fetch_chain(
        &self,
        peer: &str,
        pk: &[u8],
    ) -> impl Future<Output = Result<PeerChain>> + Send {
        let url = format!("http://{}/chain", peer);
        let pk = String::from_utf8_lossy(pk).into_owned();
        let peer = peer.to_string();
        let request = self.client.get(url).query(&[("pk", pk)]);

        async move {
            let unreachable = |reason: String| ChainError::PeerUnreachable {
                peer: peer.clone(),
                reason,
            };
            let response = request.send().await.map_err(|e| unreachable(e.to_string()))?;
            if !response.status().is_success() {
                return Err(unreachable(format!("status {}", response.status())));
            }
            response
                .json::<PeerChain>()
                .await
                .map_err(|e| ChainError::PeerDataInvalid {
                    peer: peer.clone(),
                    reason: e.to_string(),
                })
        }
    }
}

/// Sends the encoded block to every address once. Per-peer failures are
/// logged and not retried; the count of successful sends is returned.
pub async fn broadcast_block(block: &Block, peers: &[String]) -> Result<usize> {
    if peers.is_empty() {
        return Ok(0);
    }
    let bytes = block.encode()?;
    let socket = UdpSocket::bind("0.0.0.0:0").await?;

    let mut sent = 0;
    for peer in peers {
        match socket.send_to(&bytes, peer.as_str()).await {
            Ok(_) => sent += 1,
            Err(e) => warn!(peer = %peer, error = %e, "block broadcast failed"),
        }
    }
    Ok(sent)
}

/// Waits for one datagram and decodes it as a block. The flag reports
/// whether the block verified against `pow_prefix`.
pub async fn receive_block(socket: &UdpSocket, pow_prefix: &[u8]) -> Result<(Block, SocketAddr, bool)> {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    let (len, from) = socket.recv_from(&mut buf).await?;
    let block = Block::decode(&buf[..len])?;
    let valid = verify_block(&block, pow_prefix);
    Ok((block, from, valid))
}

/// Receives blocks on `port` forever, logging each one. Blocks are not
/// applied to any chain.
pub async fn listen_blocks(port: u16, pow_prefix: Vec<u8>) -> Result<()> {
    let socket = UdpSocket::bind(("0.0.0.0", port)).await?;
    info!(port, "listening for blocks over UDP");
    loop {
        match receive_block(&socket, &pow_prefix).await {
            Ok((block, from, valid)) => info!(
                from = %from,
                origin = %String::from_utf8_lossy(&block.header.origin),
                transactions = block.transactions.len(),
                valid,
                "block received"
            ),
            Err(e) => warn!(error = %e, "discarding datagram"),
        }
    }
}
