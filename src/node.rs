use crate::blockchain::{Block, Chain};
use crate::config::Config;
use crate::error::{ChainError, Result};
use crate::ledger::{Ledger, TransferReceipt};
use crate::miner::MessageKind;
use crate::network::{broadcast_block, HttpPeerClient};
use crate::persistence::{ChainStore, Database, KvStore};
use crate::sync::{ChainResolver, PeerSet, Resolution};
use crate::transaction::Transaction;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NodeState {
    Ready,
    ShuttingDown,
}

/// Async front of the ledger: runs ledger work on the blocking pool, owns the
/// peer set and pushes new blocks to UDP peers.
pub struct Node {
    config: Config,
    ledger: Arc<Ledger>,
    peers: PeerSet,
    resolver: ChainResolver<HttpPeerClient>,
    state: RwLock<NodeState>,
}

impl Node {
    pub fn new(config: Config, store: Arc<dyn KvStore>) -> Result<Self> {
        config.validate()?;
        let identity = config.miner.identity()?;
        let chains = ChainStore::new(store, config.database.namespace.clone());
        let ledger = Ledger::new(chains, identity, config.pow, config.miner.reward);
        let timeout = config.network.peer_timeout();

        Ok(Self {
            ledger: Arc::new(ledger),
            peers: PeerSet::new(),
            resolver: ChainResolver::new(HttpPeerClient::new(timeout)?, timeout),
            state: RwLock::new(NodeState::Ready),
            config,
        })
    }

    /// Opens the SQLite database named in the config, creating its directory.
    pub fn open(config: Config) -> Result<Self> {
        let db_path = Path::new(&config.database.path);
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    ChainError::StorageFailure(format!(
                        "Failed to create data dir {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let database = Database::open(db_path)?;
        info!(path = %config.database.path, "database opened");
        Self::new(config, Arc::new(database))
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    pub fn public_key(&self) -> &[u8] {
        &self.ledger.identity().public
    }

    pub async fn state(&self) -> NodeState {
        *self.state.read().await
    }

    /// Registers the configured bootstrap peers; bad entries are logged.
    pub async fn bootstrap(&self) {
        for peer in &self.config.network.bootstrap_peers {
            if let Err(e) = self.peers.register_peer(peer).await {
                warn!(peer = %peer, error = %e, "ignoring bootstrap peer");
            }
        }
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Ledger) -> Result<T> + Send + 'static,
    {
        let ledger = self.ledger.clone();
        tokio::task::spawn_blocking(move || work(&ledger))
            .await
            .map_err(|e| ChainError::Io(format!("ledger task failed: {}", e)))?
    }

    pub async fn submit_transaction(&self, tx: Transaction) -> Result<TransferReceipt> {
        let receipt = self.blocking(move |ledger| ledger.submit_transaction(tx)).await?;
        self.broadcast(&receipt.debit).await;
        self.broadcast(&receipt.credit).await;
        Ok(receipt)
    }

    pub async fn mine(&self) -> Result<Block> {
        let block = self.blocking(|ledger| ledger.mine_reward()).await?;
        self.broadcast(&block).await;
        Ok(block)
    }

    /// Chain of `pk`, or of the node itself when `pk` is `None`.
    pub async fn chain(&self, pk: Option<Vec<u8>>) -> Result<Chain> {
        let pk = pk.unwrap_or_else(|| self.public_key().to_vec());
        self.blocking(move |ledger| ledger.load_chain(&pk)).await
    }

    /// Registers every address and returns the full peer list.
    pub async fn register_peers(&self, nodes: &[String]) -> Result<Vec<String>> {
        for node in nodes {
            self.peers.register_peer(node).await?;
        }
        Ok(self.peers.list().await)
    }

    /// Runs the longest-valid-chain rule for `pk` and persists a winning
    /// peer chain. Blocks committed locally while peers were being fetched
    /// are kept unless the winner is still longer.
    pub async fn resolve(&self, pk: Option<Vec<u8>>) -> Result<Resolution> {
        let pk = pk.unwrap_or_else(|| self.public_key().to_vec());
        let local = self.chain(Some(pk.clone())).await?;
        let peers = self.peers.list().await;
        let prefix = self.ledger.prefix(MessageKind::Block);
        info!(peers = peers.len(), "resolving chain against peers");

        let resolution = self.resolver.resolve_conflicts(local, &peers, &prefix).await;
        if !resolution.replaced {
            return Ok(resolution);
        }
        let chain = resolution.chain.clone();
        if self.blocking(move |ledger| ledger.replace_chain(&chain)).await? {
            return Ok(resolution);
        }
        Ok(Resolution {
            replaced: false,
            chain: self.chain(Some(pk)).await?,
        })
    }

    async fn broadcast(&self, block: &Block) {
        match broadcast_block(block, &self.config.network.peer_udp_addrs).await {
            Ok(sent) if sent > 0 => info!(peers = sent, "block broadcast"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "block broadcast failed"),
        }
    }

    pub async fn shutdown(&self) {
        *self.state.write().await = NodeState::ShuttingDown;
        self.ledger.shutdown();
        info!("node shutting down");
    }

    /// Starts the UDP listener and serves the HTTP API until the listener
    /// fails.
    #[cfg(feature = "api")]
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let udp_port = self.config.network.udp_port;
        let prefix = self.ledger.prefix(MessageKind::Block);
        tokio::spawn(async move {
            if let Err(e) = crate::network::listen_blocks(udp_port, prefix).await {
                tracing::error!(error = %e, "UDP listener failed");
            }
        });

        let api_port = self.config.network.api_port;
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", api_port)).await?;
        info!(
            port = api_port,
            node = %String::from_utf8_lossy(self.public_key()),
            "API server listening"
        );
        axum::serve(listener, crate::api::build_api_router(self)).await?;
        Ok(())
    }
}
