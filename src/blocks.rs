//! Block issuance: receive, send and representative changes.
//!
//! Every operation that builds on an account's frontier holds that
//! account's lock from the `account_info` read until `process` returns, so
//! two blocks are never built on the same `previous`.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::block::{BlockSubtype, StateBlock};
use crate::crypto::{self, ZERO_HASH};
use crate::error::{Result, WalletError};
use crate::lock::{account_lock_key, LockGuard, LockService};
use crate::model::{CachedBlock, WalletRecord};
use crate::pool::BlockingPool;
use crate::rpc::{AccountInfo, LedgerRpc};
use crate::storage::Store;
use crate::wallet::{AccountKey, WalletService};
use crate::work::WorkEngine;

/// Settings for `BlockIssuer` that come from configuration.
#[derive(Debug, Clone)]
pub struct IssuerSettings {
    pub representatives: Vec<String>,
    pub receive_minimum: u128,
    pub auto_receive_on_send: bool,
    pub lock_lease: Duration,
    pub lock_wait: Duration,
}

pub struct BlockIssuer {
    wallets: Arc<WalletService>,
    store: Arc<Store>,
    rpc: Arc<dyn LedgerRpc>,
    work: Arc<WorkEngine>,
    locks: Arc<dyn LockService>,
    sign_pool: BlockingPool,
    settings: IssuerSettings,
}

impl BlockIssuer {
    pub fn new(
        wallets: Arc<WalletService>,
        store: Arc<Store>,
        rpc: Arc<dyn LedgerRpc>,
        work: Arc<WorkEngine>,
        locks: Arc<dyn LockService>,
        sign_pool: BlockingPool,
        settings: IssuerSettings,
    ) -> Self {
        BlockIssuer { wallets, store, rpc, work, locks, sign_pool, settings }
    }

    async fn lock_account(&self, address: &str) -> Result<LockGuard> {
        self.locks
            .acquire(&account_lock_key(address), self.settings.lock_lease, self.settings.lock_wait)
            .await
    }

    fn context(&self, wallet_id: &str, account: &str) -> Result<(WalletRecord, AccountKey)> {
        let wallet = self.wallets.wallet(wallet_id)?;
        let key = self.wallets.account_key(&wallet, account)?;
        Ok((wallet, key))
    }

    /// `Ok(None)` for an account the node has never seen.
    async fn chain_head(&self, address: &str) -> Result<Option<AccountInfo>> {
        match self.rpc.account_info(address).await {
            Ok(Some(info)) => Ok(Some(info)),
            Ok(None) => Err(WalletError::Rpc(format!("account_info failed for {address}"))),
            Err(WalletError::AccountNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn open_head(&self, address: &str) -> Result<AccountInfo> {
        self.chain_head(address)
            .await?
            .ok_or_else(|| WalletError::AccountNotFound(address.to_string()))
    }

    fn default_representative(&self, wallet: &WalletRecord) -> Result<String> {
        if let Some(rep) = &wallet.representative {
            return Ok(rep.clone());
        }
        self.settings
            .representatives
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| WalletError::invalid("no representative configured"))
    }

    /// Attach work, sign on the signing pool, publish.
    async fn finish(
        &self,
        mut block: StateBlock,
        key: &AccountKey,
        subtype: BlockSubtype,
        work: Option<String>,
    ) -> Result<(String, StateBlock)> {
        let root = block.root()?;
        let work = match work {
            Some(w) => w,
            None => {
                let is_receive = matches!(subtype, BlockSubtype::Open | BlockSubtype::Receive);
                match self.work.work_for(root, is_receive, None).await {
                    Ok(w) => w,
                    Err(WalletError::WorkDisabled) => return Err(WalletError::WorkDisabled),
                    Err(e) => {
                        tracing::error!(root = %hex::encode_upper(root), error = %e, "work failed");
                        return Err(WalletError::WorkFailed(hex::encode_upper(root)));
                    }
                }
            }
        };
        block.set_work(&work);

        let private = key.private.clone();
        let block = self
            .sign_pool
            .run(move || -> Result<StateBlock> {
                block.sign(&private)?;
                Ok(block)
            })
            .await??;

        let hash = self.publish(&block, subtype).await?;
        Ok((hash, block))
    }

    async fn publish(&self, block: &StateBlock, subtype: BlockSubtype) -> Result<String> {
        match self.rpc.process(block, subtype).await {
            Ok(hash) => {
                crate::metrics::BLOCKS_PUBLISHED.with_label_values(&[subtype.as_str()]).inc();
                tracing::info!(account = %block.account, hash = %hash, subtype = subtype.as_str(), "📤 block published");
                Ok(hash)
            }
            Err(e) => {
                crate::metrics::PROCESS_FAILURES.inc();
                tracing::error!(account = %block.account, subtype = subtype.as_str(), error = %e, "process failed");
                match e {
                    WalletError::ProcessFailed(msg) => Err(WalletError::ProcessFailed(msg)),
                    other => Err(WalletError::ProcessFailed(other.to_string())),
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Receive
    // ---------------------------------------------------------------------

    pub async fn receive(&self, wallet_id: &str, account: &str, block_hash: &str, work: Option<String>) -> Result<String> {
        let (wallet, key) = self.context(wallet_id, account)?;
        let _guard = self.lock_account(&key.address).await?;
        self.receive_locked(&wallet, &key, block_hash, work).await
    }

    /// Caller holds the account lock.
    async fn receive_locked(
        &self,
        wallet: &WalletRecord,
        key: &AccountKey,
        block_hash: &str,
        work: Option<String>,
    ) -> Result<String> {
        let link = crypto::parse_hash(block_hash)?;
        let incoming = self.rpc.block_info(block_hash).await?;
        let own = crypto::public_from_address(&key.address)?;
        if incoming.destination != Some(own) {
            return Err(WalletError::BlockNotFound(block_hash.to_string()));
        }

        let (previous, representative, balance, subtype) = match self.chain_head(&key.address).await? {
            None => (ZERO_HASH, self.default_representative(wallet)?, incoming.amount, BlockSubtype::Open),
            Some(head) => {
                let balance = head
                    .balance
                    .checked_add(incoming.amount)
                    .ok_or_else(|| WalletError::invalid("balance overflow"))?;
                (crypto::parse_hash(&head.frontier)?, head.representative, balance, BlockSubtype::Receive)
            }
        };
        let block = StateBlock::new(&key.address, &previous, &representative, balance, &link);
        let (hash, _) = self.finish(block, key, subtype, work).await?;
        Ok(hash)
    }

    /// Receive every pending block above the receive minimum under one lock.
    pub async fn receive_all(&self, wallet_id: &str, account: &str) -> Result<usize> {
        let (wallet, key) = self.context(wallet_id, account)?;
        let _guard = self.lock_account(&key.address).await?;
        self.receive_all_locked(&wallet, &key).await
    }

    async fn receive_all_locked(&self, wallet: &WalletRecord, key: &AccountKey) -> Result<usize> {
        let pending = self.rpc.pending(&key.address, self.settings.receive_minimum).await?;
        let mut received = 0;
        for hash in pending {
            self.receive_locked(wallet, key, &hash, None).await?;
            received += 1;
        }
        if received > 0 {
            tracing::info!(account = %key.address, received, "📥 pending blocks received");
        }
        Ok(received)
    }

    // ---------------------------------------------------------------------
    // Send
    // ---------------------------------------------------------------------

    /// Send `amount` raw to `destination`. With an `id`, a repeated call
    /// replays the first published block instead of sending again.
    pub async fn send(
        &self,
        wallet_id: &str,
        source: &str,
        destination: &str,
        amount: u128,
        id: Option<&str>,
        work: Option<String>,
    ) -> Result<String> {
        let destination_key = crypto::public_from_address(destination)?;
        let (wallet, key) = self.context(wallet_id, source)?;

        if let Some(id) = id {
            if let Some(hash) = self.replay(&wallet, &key, id).await? {
                return Ok(hash);
            }
        }

        let _guard = self.lock_account(&key.address).await?;
        // A concurrent call with the same id may have finished while we waited.
        if let Some(id) = id {
            if let Some(hash) = self.replay(&wallet, &key, id).await? {
                return Ok(hash);
            }
        }

        let mut head = self.open_head(&key.address).await?;
        if amount > head.balance {
            if self.settings.auto_receive_on_send && head.balance.saturating_add(head.pending) >= amount {
                self.receive_all_locked(&wallet, &key).await?;
                head = self.open_head(&key.address).await?;
            }
            if amount > head.balance {
                return Err(WalletError::InsufficientBalance(head.balance));
            }
        }

        let previous = crypto::parse_hash(&head.frontier)?;
        let block = StateBlock::new(&key.address, &previous, &head.representative, head.balance - amount, &destination_key);
        let (hash, block) = self.finish(block, &key, BlockSubtype::Send, work).await?;

        if let Some(id) = id {
            let entry = CachedBlock {
                wallet_id: wallet.id.clone(),
                address: key.address.clone(),
                adhoc: key.adhoc,
                block_hash: hash.clone(),
                block_json: serde_json::to_string(&block)?,
                send_id: id.to_string(),
                subtype: BlockSubtype::Send,
            };
            // The block is already on the network; a cache miss only costs idempotency.
            if let Err(e) = self.store.put_cached_block(&entry) {
                tracing::error!(account = %key.address, send_id = id, error = %e, "could not cache sent block");
            }
        }
        Ok(hash)
    }

    /// Republish a cached send and return its hash.
    async fn replay(&self, wallet: &WalletRecord, key: &AccountKey, id: &str) -> Result<Option<String>> {
        let Some(cached) = self.store.cached_block(&wallet.id, &key.address, id)? else {
            return Ok(None);
        };
        let block: StateBlock = serde_json::from_str(&cached.block_json)?;
        // The node answers "Old block" once it has it; the cached hash is the answer either way.
        if let Err(e) = self.rpc.process(&block, cached.subtype).await {
            tracing::debug!(account = %key.address, send_id = id, error = %e, "replayed block not accepted again");
        }
        tracing::info!(account = %key.address, send_id = id, hash = %cached.block_hash, "♻️  send replayed from cache");
        Ok(Some(cached.block_hash))
    }

    // ---------------------------------------------------------------------
    // Representatives
    // ---------------------------------------------------------------------

    /// Change the account's representative. `Ok(None)` when
    /// `only_if_different` is set and it already matches.
    pub async fn representative_set(
        &self,
        wallet_id: &str,
        account: &str,
        representative: &str,
        work: Option<String>,
        only_if_different: bool,
    ) -> Result<Option<String>> {
        let representative = self.wallets.normalize(representative)?;
        let (_, key) = self.context(wallet_id, account)?;
        let _guard = self.lock_account(&key.address).await?;

        let head = self.open_head(&key.address).await?;
        if only_if_different && crypto::same_account(&head.representative, &representative) {
            return Ok(None);
        }
        let previous = crypto::parse_hash(&head.frontier)?;
        let block = StateBlock::new(&key.address, &previous, &representative, head.balance, &ZERO_HASH);
        let (hash, _) = self.finish(block, &key, BlockSubtype::Change, work).await?;
        Ok(Some(hash))
    }

    /// Set the wallet's default representative and, with `update_existing`,
    /// move every opened account to it. Returns how many blocks were published.
    pub async fn wallet_representative_set(&self, wallet_id: &str, representative: &str, update_existing: bool) -> Result<usize> {
        let wallet = self.wallets.set_default_representative(wallet_id, representative)?;
        if !update_existing {
            return Ok(0);
        }
        let rep = wallet.representative.unwrap_or_default();
        let mut changed = 0;
        for account in self.wallets.account_list(wallet_id, None)? {
            match self.representative_set(wallet_id, &account, &rep, None, true).await {
                Ok(Some(_)) => changed += 1,
                Ok(None) | Err(WalletError::AccountNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(changed)
    }
}
