// Shared fixtures: an in-memory ledger that enforces frontier ordering, work
// peers with scripted behaviour, and an engine wired over both.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::RngCore;
use tempfile::TempDir;

use pippin::{
    block::{BlockSubtype, StateBlock},
    config::{Config, Kdf},
    crypto::{self, Network},
    difficulty::{self, DifficultyModel},
    engine::{Engine, Parts},
    error::{Result, WalletError},
    lock::LocalLockManager,
    miner::Miner,
    rpc::{AccountBalance, AccountInfo, BlockInfo, LedgerRpc},
    storage::Store,
    work::{PooledWork, WorkEngine, WorkPeer},
};

/// Cheap enough to solve in a few hundred hashes.
pub const TEST_DIFFICULTY: u64 = 0xff00_0000_0000_0000;

pub const ONE_NANO: u128 = 1_000_000_000_000_000_000_000_000_000_000;

pub const SEED_A: &str = "3566373239333430653037656565363961626163303439633266646434613363";
pub const SEED_B: &str = "3966373239333430653037656565363961626163303439633266646434613363";

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<String, AccountInfo>,
    blocks: HashMap<String, BlockInfo>,
    pending: HashMap<String, Vec<String>>,
    processed: Vec<(BlockSubtype, StateBlock)>,
}

/// Ledger node stand-in. `process` rejects forks and replays the way a node
/// would, after an optional delay that widens race windows.
pub struct FakeLedger {
    state: Mutex<LedgerState>,
    process_delay: Duration,
}

fn random_hash() -> String {
    let mut h = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut h);
    hex::encode_upper(h)
}

impl FakeLedger {
    pub fn new(process_delay: Duration) -> Self {
        FakeLedger { state: Mutex::new(LedgerState::default()), process_delay }
    }

    /// Make `amount` raw receivable by `address` from an outside account.
    pub fn fund(&self, address: &str, amount: u128) -> String {
        let hash = random_hash();
        let dest = crypto::public_from_address(address).expect("valid address");
        let mut st = self.state.lock().unwrap();
        st.blocks.insert(
            hash.clone(),
            BlockInfo {
                hash: hash.clone(),
                block_account: "nano_1111111111111111111111111111111111111111111111111111hifc8npp".into(),
                amount,
                destination: Some(dest),
                subtype: Some("send".into()),
            },
        );
        st.pending.entry(address.to_string()).or_default().push(hash.clone());
        hash
    }

    pub fn processed(&self) -> Vec<(BlockSubtype, StateBlock)> {
        self.state.lock().unwrap().processed.clone()
    }

    pub fn head(&self, address: &str) -> Option<AccountInfo> {
        self.state.lock().unwrap().accounts.get(address).cloned()
    }

    fn pending_total(st: &LedgerState, address: &str) -> u128 {
        st.pending
            .get(address)
            .map(|hs| hs.iter().filter_map(|h| st.blocks.get(h)).map(|b| b.amount).sum())
            .unwrap_or(0)
    }
}

#[async_trait]
impl LedgerRpc for FakeLedger {
    async fn account_info(&self, account: &str) -> Result<Option<AccountInfo>> {
        let st = self.state.lock().unwrap();
        match st.accounts.get(account) {
            Some(info) => Ok(Some(AccountInfo { pending: Self::pending_total(&st, account), ..info.clone() })),
            None => Err(WalletError::AccountNotFound(account.to_string())),
        }
    }

    async fn block_info(&self, hash: &str) -> Result<BlockInfo> {
        self.state
            .lock()
            .unwrap()
            .blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| WalletError::BlockNotFound(hash.to_string()))
    }

    async fn process(&self, block: &StateBlock, subtype: BlockSubtype) -> Result<String> {
        tokio::time::sleep(self.process_delay).await;
        if !block.verify_signature() {
            return Err(WalletError::ProcessFailed("Bad signature".into()));
        }
        let root = block.root()?;
        let work = crypto::parse_work(&block.work)?;
        if !crypto::work_valid(&root, work, TEST_DIFFICULTY) {
            return Err(WalletError::ProcessFailed("Block work is insufficient".into()));
        }
        let hash = block.hash_hex()?;
        let balance = block.balance_raw()?;

        let mut st = self.state.lock().unwrap();
        if st.processed.iter().any(|(_, b)| b.hash_hex().ok().as_deref() == Some(hash.as_str())) {
            return Err(WalletError::ProcessFailed("Old block".into()));
        }
        let previous_balance = match st.accounts.get(&block.account) {
            Some(head) if head.frontier == block.previous => head.balance,
            Some(_) => return Err(WalletError::ProcessFailed("Fork".into())),
            None if block.previous_hash()? == crypto::ZERO_HASH => 0,
            None => return Err(WalletError::ProcessFailed("Gap previous block".into())),
        };

        match subtype {
            BlockSubtype::Open | BlockSubtype::Receive => {
                let list = st.pending.entry(block.account.clone()).or_default();
                let before = list.len();
                list.retain(|h| *h != block.link);
                if list.len() == before {
                    return Err(WalletError::ProcessFailed("Unreceivable".into()));
                }
            }
            BlockSubtype::Send => {
                let amount = previous_balance
                    .checked_sub(balance)
                    .ok_or_else(|| WalletError::ProcessFailed("Balance mismatch".into()))?;
                let dest = crypto::address_from_public(&block.link_bytes()?, Network::Nano);
                st.blocks.insert(
                    hash.clone(),
                    BlockInfo {
                        hash: hash.clone(),
                        block_account: block.account.clone(),
                        amount,
                        destination: Some(block.link_bytes()?),
                        subtype: Some("send".into()),
                    },
                );
                st.pending.entry(dest).or_default().push(hash.clone());
            }
            BlockSubtype::Change => {}
        }

        st.accounts.insert(
            block.account.clone(),
            AccountInfo {
                frontier: hash.clone(),
                representative: block.representative.clone(),
                balance,
                pending: 0,
            },
        );
        st.processed.push((subtype, block.clone()));
        Ok(hash)
    }

    async fn pending(&self, account: &str, threshold: u128) -> Result<Vec<String>> {
        let st = self.state.lock().unwrap();
        Ok(st
            .pending
            .get(account)
            .map(|hs| {
                hs.iter()
                    .filter(|h| st.blocks.get(*h).map_or(false, |b| b.amount >= threshold))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn account_balance(&self, account: &str) -> Result<Option<AccountBalance>> {
        let st = self.state.lock().unwrap();
        let balance = st.accounts.get(account).map_or(0, |a| a.balance);
        Ok(Some(AccountBalance { balance, pending: Self::pending_total(&st, account) }))
    }

    async fn accounts_balances(&self, accounts: &[String]) -> Result<HashMap<String, AccountBalance>> {
        let mut out = HashMap::new();
        for a in accounts {
            if let Some(b) = self.account_balance(a).await? {
                out.insert(a.clone(), b);
            }
        }
        Ok(out)
    }

    async fn accounts_frontiers(&self, accounts: &[String]) -> Result<HashMap<String, String>> {
        let st = self.state.lock().unwrap();
        Ok(accounts
            .iter()
            .filter_map(|a| st.accounts.get(a).map(|i| (a.clone(), i.frontier.clone())))
            .collect())
    }

    async fn accounts_pending(&self, accounts: &[String], threshold: u128) -> Result<HashMap<String, Vec<String>>> {
        let mut out = HashMap::new();
        for a in accounts {
            out.insert(a.clone(), self.pending(a, threshold).await?);
        }
        Ok(out)
    }

    async fn is_alive(&self) -> bool {
        true
    }
}

/// Brute-force work for `hash` at `difficulty`, off the async runtime.
pub async fn solve(hash: &str, difficulty: u64) -> String {
    let root = crypto::parse_hash(hash).expect("valid root");
    tokio::task::spawn_blocking(move || {
        let mut w: u64 = rand::random();
        while !crypto::work_valid(&root, w, difficulty) {
            w = w.wrapping_add(1);
        }
        crypto::format_work(w)
    })
    .await
    .expect("solver panicked")
}

pub enum PeerBehaviour {
    /// Solve after the delay.
    Solve(Duration),
    Fail,
    /// Never answers.
    Hang,
    /// Refuses the first request, then never answers.
    FailThenHang,
    /// Answers with work that does not meet the threshold.
    Invalid,
}

pub struct FakePeer {
    pub url: String,
    behaviour: PeerBehaviour,
    pub requests: AtomicUsize,
    pub cancels: Mutex<Vec<String>>,
}

impl FakePeer {
    pub fn new(url: &str, behaviour: PeerBehaviour) -> Arc<Self> {
        Arc::new(FakePeer {
            url: url.to_string(),
            behaviour,
            requests: AtomicUsize::new(0),
            cancels: Mutex::new(Vec::new()),
        })
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkPeer for FakePeer {
    fn url(&self) -> &str {
        &self.url
    }

    async fn work_generate(&self, hash: &str, difficulty: u64) -> Result<String> {
        let seen = self.requests.fetch_add(1, Ordering::SeqCst);
        match &self.behaviour {
            PeerBehaviour::Solve(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(solve(hash, difficulty).await)
            }
            PeerBehaviour::Fail => Err(WalletError::Rpc(format!("{} refused", self.url))),
            PeerBehaviour::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            PeerBehaviour::FailThenHang if seen == 0 => Err(WalletError::Rpc(format!("{} refused", self.url))),
            PeerBehaviour::FailThenHang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            PeerBehaviour::Invalid => {
                let root = crypto::parse_hash(hash)?;
                let mut w = 0u64;
                while crypto::work_valid(&root, w, difficulty) {
                    w += 1;
                }
                Ok(crypto::format_work(w))
            }
        }
    }

    async fn work_cancel(&self, hash: &str) -> Result<()> {
        self.cancels.lock().unwrap().push(hash.to_string());
        Ok(())
    }
}

/// Pooled source that solves at whatever difficulty the multiplier implies.
pub struct FakePool {
    pub base: u64,
    pub multipliers: Mutex<Vec<f64>>,
}

#[async_trait]
impl PooledWork for FakePool {
    async fn request_work(&self, hash: &str, multiplier: f64) -> Result<String> {
        self.multipliers.lock().unwrap().push(multiplier);
        Ok(solve(hash, difficulty::from_multiplier(multiplier, self.base)).await)
    }
}

pub fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.kdf = Kdf { mem_kib: 64, time_cost: 1 };
    cfg.wallet.lock_timeout_secs = 30;
    cfg.wallet.lock_wait_secs = 30;
    cfg
}

pub fn work_engine(peers: Vec<Arc<dyn WorkPeer>>, pooled: Option<Arc<dyn PooledWork>>, max_work_processes: usize) -> WorkEngine {
    WorkEngine::new(
        peers,
        pooled,
        Miner::new(max_work_processes),
        DifficultyModel::uniform(TEST_DIFFICULTY),
        Duration::from_secs(300),
        Duration::from_secs(5),
    )
}

pub struct Harness {
    pub engine: Engine,
    pub ledger: Arc<FakeLedger>,
    _dir: TempDir,
}

/// Engine over a fresh store, the fake ledger and local work only.
pub fn harness(process_delay: Duration) -> Harness {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = dir.path().join("pippin_db");
    let store = Arc::new(Store::open(db_path.to_str().unwrap()).expect("Failed to open store"));
    let ledger = Arc::new(FakeLedger::new(process_delay));
    let parts = Parts {
        store,
        rpc: ledger.clone(),
        work: Arc::new(work_engine(Vec::new(), None, 1)),
        locks: Arc::new(LocalLockManager::new()),
    };
    let engine = Engine::assemble(&test_config(), parts);
    Harness { engine, ledger, _dir: dir }
}

pub fn derive_address(seed_hex: &str, index: u32) -> String {
    let seed = crypto::parse_seed(seed_hex).expect("valid seed");
    crypto::address_from_public(&crypto::keypair_from_seed(&seed, index).public, Network::Nano)
}
