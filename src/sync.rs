//! Peer reconciliation for ledgerline
//!
//! This module provides:
//! - The registered peer set, kept in a deterministic order
//! - The `PeerClient` seam used to fetch an account's chain from a peer
//! - Longest-valid-chain resolution across all registered peers

use crate::blockchain::{verify_chain, Block, Chain};
use crate::error::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(5);

/// What `GET /chain` returns for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerChain {
    pub length: usize,
    pub chain: Vec<Block>,
    pub balance: i64,
}

impl From<&Chain> for PeerChain {
    fn from(chain: &Chain) -> Self {
        PeerChain {
            length: chain.len(),
            chain: chain.blocks.clone(),
            balance: chain.balance,
        }
    }
}

/// Reduces `host:port` or a URL to `host:port`.
pub fn normalize_peer(address: &str) -> Result<String> {
    let invalid = |reason: String| ChainError::PeerDataInvalid {
        peer: address.to_string(),
        reason,
    };
    let candidate = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{}", address)
    };
    let url = reqwest::Url::parse(&candidate).map_err(|e| invalid(e.to_string()))?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| invalid("missing host".to_string()))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| invalid("missing port".to_string()))?;
    Ok(format!("{}:{}", host, port))
}

/// Registered peers, iterated in lexical address order.
#[derive(Debug, Clone, Default)]
pub struct PeerSet {
    peers: Arc<RwLock<BTreeSet<String>>>,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a peer; returns whether it was not already registered.
    pub async fn register_peer(&self, address: &str) -> Result<bool> {
        let peer = normalize_peer(address)?;
        let added = self.peers.write().await.insert(peer.clone());
        if added {
            info!(peer = %peer, "peer registered");
        }
        Ok(added)
    }

    pub async fn list(&self) -> Vec<String> {
        self.peers.read().await.iter().cloned().collect()
    }
}

/// Fetches an account's chain from one peer.
pub trait PeerClient: Send + Sync {
    fn fetch_chain(
        &self,
        peer: &str,
        pk: &[u8],
    ) -> impl Future<Output = Result<PeerChain>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub replaced: bool,
    pub chain: Chain,
}

/// Applies the longest-valid-chain rule against every registered peer.
pub struct ChainResolver<C> {
    client: C,
    timeout: Duration,
}

impl<C: PeerClient> ChainResolver<C> {
    pub fn new(client: C, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn fetch(&self, peer: &str, pk: &[u8]) -> Result<PeerChain> {
        let fetched = tokio::time::timeout(self.timeout, self.client.fetch_chain(peer, pk))
            .await
            .map_err(|_| ChainError::PeerUnreachable {
                peer: peer.to_string(),
                reason: format!("no response within {:?}", self.timeout),
            })??;

        if fetched.length != fetched.chain.len() {
            return Err(ChainError::PeerDataInvalid {
                peer: peer.to_string(),
                reason: format!(
                    "reported length {} but sent {} blocks",
                    fetched.length,
                    fetched.chain.len()
                ),
            });
        }
        Ok(fetched)
    }

    /// Visits `peers` in order and keeps the longest valid chain that is
    /// longer than `local`. Among chains of equal length the one visited last
    /// wins. Unreachable or malformed peers are skipped.
    pub async fn resolve_conflicts(
        &self,
        local: Chain,
        peers: &[String],
        pow_prefix: &[u8],
    ) -> Resolution {
        let local_len = local.len();
        let mut best = local;
        let mut replaced = false;

        for peer in peers {
            let fetched = match self.fetch(peer, &best.owner).await {
                Ok(fetched) => fetched,
                Err(e) => {
                    warn!(peer = %peer, error = %e, "skipping peer");
                    continue;
                }
            };

            if fetched.length <= local_len || fetched.length < best.len() {
                continue;
            }
            if !verify_chain(&fetched.chain, pow_prefix) {
                warn!(peer = %peer, length = fetched.length, "peer chain failed verification");
                continue;
            }
            match Chain::from_blocks(best.owner.clone(), fetched.chain) {
                Ok(chain) => {
                    info!(peer = %peer, length = chain.len(), "adopting longer peer chain");
                    best = chain;
                    replaced = true;
                }
                Err(e) => warn!(peer = %peer, error = %e, "peer chain does not rebuild"),
            }
        }

        Resolution {
            replaced,
            chain: best,
        }
    }
}
