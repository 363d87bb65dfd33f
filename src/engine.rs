//! Wires the services together from a `Config` and owns their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use crate::blocks::{BlockIssuer, IssuerSettings};
use crate::config::Config;
use crate::difficulty::{self, DifficultyModel};
use crate::dpow::DpowClient;
use crate::error::{Result, WalletError};
use crate::lock::{LocalLockManager, LockService};
use crate::miner::Miner;
use crate::pool::BlockingPool;
use crate::rpc::{LedgerRpc, NodeRpcClient};
use crate::secrets::{SeedCipher, SeedStorage};
use crate::storage::Store;
use crate::wallet::WalletService;
use crate::work::{HttpWorkPeer, PooledWork, WorkEngine, WorkPeer};

pub struct Engine {
    pub wallets: Arc<WalletService>,
    pub blocks: Arc<BlockIssuer>,
    pub work: Arc<WorkEngine>,
    pub rpc: Arc<dyn LedgerRpc>,
    pub store: Arc<Store>,
    pub seeds: Arc<SeedStorage>,
    dpow: Option<Arc<DpowClient>>,
}

/// The pieces an `Engine` is assembled from. Tests substitute fakes for the
/// RPC client and work sources here.
pub struct Parts {
    pub store: Arc<Store>,
    pub rpc: Arc<dyn LedgerRpc>,
    pub work: Arc<WorkEngine>,
    pub locks: Arc<dyn LockService>,
}

impl Engine {
    /// Open the store, connect to the node and work sources, and build the
    /// services. An unreachable node is logged, not fatal.
    pub async fn init(cfg: &Config) -> Result<Self> {
        let network = cfg.network();
        let model = DifficultyModel::for_network(network);
        let rpc_timeout = Duration::from_secs(cfg.node.rpc_timeout_secs);

        let store = Arc::new(Store::open(&cfg.storage.path)?);
        let rpc: Arc<dyn LedgerRpc> = Arc::new(NodeRpcClient::new(cfg.rpc_url(), rpc_timeout, network)?);

        let mut peers: Vec<Arc<dyn WorkPeer>> = Vec::new();
        for url in cfg.work_peer_urls() {
            peers.push(Arc::new(HttpWorkPeer::new(url, rpc_timeout)?));
        }
        let dpow = match &cfg.work.dpow {
            Some(d) => Some(DpowClient::start(d.clone(), model.base_receive)?),
            None => None,
        };
        let pooled = dpow.clone().map(|d| d as Arc<dyn PooledWork>);
        let work = Arc::new(WorkEngine::new(
            peers,
            pooled,
            Miner::new(cfg.work.max_work_processes),
            model,
            Duration::from_secs(cfg.work.failure_ttl_secs),
            Duration::from_secs(cfg.work.wave_timeout_secs),
        ));

        if !rpc.is_alive().await {
            tracing::warn!(url = %cfg.rpc_url(), "⚠️  node did not answer; operations will fail until it does");
        }

        let parts = Parts { store, rpc, work, locks: Arc::new(LocalLockManager::new()) };
        let mut engine = Engine::assemble(cfg, parts);
        engine.dpow = dpow;
        tracing::info!(network = ?network, "🚀 wallet engine ready");
        Ok(engine)
    }

    /// Build the services over already constructed collaborators.
    pub fn assemble(cfg: &Config, parts: Parts) -> Self {
        let seeds = Arc::new(SeedStorage::new());
        let lock_lease = Duration::from_secs(cfg.wallet.lock_timeout_secs);
        let lock_wait = Duration::from_secs(cfg.wallet.lock_wait_secs);
        let wallets = Arc::new(WalletService::new(
            parts.store.clone(),
            seeds.clone(),
            SeedCipher::new(&cfg.kdf),
            parts.locks.clone(),
            parts.rpc.clone(),
            cfg.network(),
            lock_lease,
            lock_wait,
        ));
        let settings = IssuerSettings {
            representatives: cfg.representatives(),
            receive_minimum: cfg.receive_minimum(),
            auto_receive_on_send: cfg.wallet.auto_receive_on_send,
            lock_lease,
            lock_wait,
        };
        let blocks = Arc::new(BlockIssuer::new(
            wallets.clone(),
            parts.store.clone(),
            parts.rpc.clone(),
            parts.work.clone(),
            parts.locks,
            BlockingPool::new("sign", cfg.work.max_sign_threads.max(1)),
            settings,
        ));
        Engine { wallets, blocks, work: parts.work, rpc: parts.rpc, store: parts.store, seeds, dpow: None }
    }

    /// Work for an arbitrary hash, for callers outside block issuance.
    /// A requested difficulty is clamped to 8x the receive base.
    pub async fn work_generate(&self, hash: &str, difficulty: Option<&str>) -> Result<String> {
        let root = crate::crypto::parse_hash(hash)?;
        let model = *self.work.model();
        let target = match difficulty {
            Some(d) => {
                let d = u64::from_str_radix(d, 16)
                    .map_err(|_| WalletError::invalid(format!("invalid difficulty: {d}")))?;
                difficulty::adjust(d, model.base_receive)
            }
            None => model.base_send,
        };
        self.work.generate(root, target).await
    }

    /// Stop the pooled work client and flush the store.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(dpow) = &self.dpow {
            dpow.close().await;
        }
        self.store.close()?;
        tracing::info!("🛑 wallet engine stopped");
        Ok(())
    }
}
