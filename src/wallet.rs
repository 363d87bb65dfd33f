//! Wallet and account management: creation, deterministic and ad-hoc
//! accounts, seed encryption and unlock, and read-only balance queries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use zeroize::Zeroizing;

use crate::crypto::{self, Network};
use crate::error::{Result, WalletError};
use crate::lock::{account_create_lock_key, LockService};
use crate::model::{AccountRecord, AccountRef, AdHocAccountRecord, WalletRecord};
use crate::rpc::{AccountBalance, LedgerRpc};
use crate::secrets::{SeedCipher, SeedStorage};
use crate::storage::Store;

/// Summary returned by `wallet_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletInfo {
    pub balance: u128,
    pub pending: u128,
    pub accounts_count: usize,
    pub adhoc_count: usize,
    /// Highest deterministic index in use.
    pub deterministic_index: Option<u32>,
}

/// Signing material for one account.
pub struct AccountKey {
    pub address: String,
    pub private: Zeroizing<[u8; 32]>,
    pub adhoc: bool,
}

pub struct WalletService {
    store: Arc<Store>,
    seeds: Arc<SeedStorage>,
    cipher: SeedCipher,
    locks: Arc<dyn LockService>,
    rpc: Arc<dyn LedgerRpc>,
    network: Network,
    lock_lease: Duration,
    lock_wait: Duration,
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

impl WalletService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        seeds: Arc<SeedStorage>,
        cipher: SeedCipher,
        locks: Arc<dyn LockService>,
        rpc: Arc<dyn LedgerRpc>,
        network: Network,
        lock_lease: Duration,
        lock_wait: Duration,
    ) -> Self {
        WalletService { store, seeds, cipher, locks, rpc, network, lock_lease, lock_wait }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Canonical form of an address for this network (`xrb_` becomes `nano_`).
    pub fn normalize(&self, address: &str) -> Result<String> {
        Ok(crypto::address_from_public(&crypto::public_from_address(address)?, self.network))
    }

    fn derive_address(&self, seed: &[u8; 32], index: u32) -> String {
        crypto::address_from_public(&crypto::keypair_from_seed(seed, index).public, self.network)
    }

    // ---------------------------------------------------------------------
    // Wallet lifecycle
    // ---------------------------------------------------------------------

    /// New wallet with a random seed unless one is given. Account 0 is
    /// written in the same batch as the wallet.
    pub fn wallet_create(&self, seed: Option<&str>) -> Result<WalletRecord> {
        let seed_hex = match seed {
            Some(s) => Zeroizing::new(s.trim().to_uppercase()),
            None => crypto::generate_seed(),
        };
        let seed_bytes = crypto::parse_seed(&seed_hex)?;
        let wallet = WalletRecord {
            id: uuid::Uuid::new_v4().to_string(),
            seed: seed_hex.to_string(),
            representative: None,
            encrypted: false,
            created_at: now_secs(),
        };
        let first = AccountRecord {
            wallet_id: wallet.id.clone(),
            index: 0,
            address: self.derive_address(&seed_bytes, 0),
        };
        self.store.insert_wallet(&wallet, &first)?;
        tracing::info!(wallet = %wallet.id, "✨ wallet created");
        Ok(wallet)
    }

    pub fn wallet(&self, id: &str) -> Result<WalletRecord> {
        self.store.get_wallet(id)?.ok_or(WalletError::WalletNotFound)
    }

    pub fn list_wallets(&self) -> Result<Vec<WalletRecord>> {
        self.store.list_wallets()
    }

    pub fn wallet_destroy(&self, id: &str) -> Result<()> {
        self.wallet(id)?;
        self.store.delete_wallet(id)?;
        self.seeds.remove_wallet(id);
        tracing::info!(wallet = id, "🗑️  wallet destroyed");
        Ok(())
    }

    /// Plaintext seed of an unlocked (or never encrypted) wallet.
    pub fn seed_hex(&self, wallet: &WalletRecord) -> Result<Zeroizing<String>> {
        if !wallet.encrypted {
            return Ok(Zeroizing::new(wallet.seed.clone()));
        }
        self.seeds
            .get(&wallet.id)
            .ok_or_else(|| WalletError::WalletLocked(wallet.id.clone()))
    }

    fn seed(&self, wallet: &WalletRecord) -> Result<Zeroizing<[u8; 32]>> {
        crypto::parse_seed(&self.seed_hex(wallet)?)
    }

    /// Replace the seed and rederive every deterministic account at the same
    /// indexes. Encrypted wallets need their password to seal the new seed.
    pub async fn wallet_change_seed(&self, id: &str, new_seed: &str, password: Option<&str>) -> Result<Vec<String>> {
        let _guard = self
            .locks
            .acquire(&account_create_lock_key(id), self.lock_lease, self.lock_wait)
            .await?;
        let mut wallet = self.wallet(id)?;
        let new_seed = Zeroizing::new(new_seed.trim().to_uppercase());
        let seed_bytes = crypto::parse_seed(&new_seed)?;

        if wallet.encrypted {
            let password = password.ok_or_else(|| WalletError::WalletLocked(id.to_string()))?;
            // Proves the caller knows the current password.
            self.cipher.decrypt(&wallet.seed, password)?;
            wallet.seed = self.cipher.encrypt(&new_seed, password)?;
            if self.seeds.contains(id) {
                self.seeds.set(id, new_seed.clone());
            }
        } else {
            wallet.seed = new_seed.to_string();
        }

        let accounts: Vec<AccountRecord> = self
            .store
            .accounts(id)?
            .into_iter()
            .map(|a| AccountRecord { address: self.derive_address(&seed_bytes, a.index), ..a })
            .collect();
        self.store.replace_seed(&wallet, &accounts)?;
        tracing::info!(wallet = id, accounts = accounts.len(), "🔁 wallet seed changed");
        Ok(accounts.into_iter().map(|a| a.address).collect())
    }

    pub fn set_default_representative(&self, id: &str, representative: &str) -> Result<WalletRecord> {
        let mut wallet = self.wallet(id)?;
        wallet.representative = Some(self.normalize(representative)?);
        self.store.put_wallet(&wallet)?;
        Ok(wallet)
    }

    // ---------------------------------------------------------------------
    // Accounts
    // ---------------------------------------------------------------------

    /// Create the next deterministic account, or the one at `index`.
    pub async fn account_create(&self, id: &str, index: Option<u32>) -> Result<String> {
        let _guard = self
            .locks
            .acquire(&account_create_lock_key(id), self.lock_lease, self.lock_wait)
            .await?;
        let wallet = self.wallet(id)?;
        let seed = self.seed(&wallet)?;
        let index = match index {
            Some(i) => {
                if let Some(existing) = self.store.get_account(id, i)? {
                    return Err(WalletError::AccountAlreadyExists(existing.address));
                }
                i
            }
            None => self.next_index(id)?,
        };
        let account = AccountRecord { wallet_id: id.to_string(), index, address: self.derive_address(&seed, index) };
        if let Some(existing) = self.store.account_ref(id, &account.address)? {
            tracing::debug!(wallet = id, ?existing, "address already in wallet");
            return Err(WalletError::AccountAlreadyExists(account.address));
        }
        self.store.insert_accounts(std::slice::from_ref(&account))?;
        tracing::debug!(wallet = id, index, address = %account.address, "account created");
        Ok(account.address)
    }

    /// Create `count` (at least one) consecutive accounts after the highest index.
    pub async fn accounts_create(&self, id: &str, count: usize) -> Result<Vec<String>> {
        let _guard = self
            .locks
            .acquire(&account_create_lock_key(id), self.lock_lease, self.lock_wait)
            .await?;
        let wallet = self.wallet(id)?;
        let seed = self.seed(&wallet)?;
        let start = self.next_index(id)?;
        let count = u32::try_from(count.max(1)).map_err(|_| WalletError::invalid("count too large"))?;
        let end = start
            .checked_add(count)
            .ok_or_else(|| WalletError::invalid("account index space exhausted"))?;
        let accounts: Vec<AccountRecord> = (start..end)
            .map(|index| AccountRecord { wallet_id: id.to_string(), index, address: self.derive_address(&seed, index) })
            .collect();
        for account in &accounts {
            if let Some(existing) = self.store.account_ref(id, &account.address)? {
                tracing::debug!(wallet = id, ?existing, "address already in wallet");
                return Err(WalletError::AccountAlreadyExists(account.address.clone()));
            }
        }
        self.store.insert_accounts(&accounts)?;
        tracing::debug!(wallet = id, from = start, count, "accounts created");
        Ok(accounts.into_iter().map(|a| a.address).collect())
    }

    fn next_index(&self, id: &str) -> Result<u32> {
        match self.store.max_index(id)? {
            Some(max) => max.checked_add(1).ok_or_else(|| WalletError::invalid("account index space exhausted")),
            None => Ok(0),
        }
    }

    /// Add an account by raw private key. Encrypted wallets need their
    /// password so the key is stored sealed like the seed.
    pub async fn adhoc_account_create(&self, id: &str, private_key: &str, password: Option<&str>) -> Result<String> {
        let _guard = self
            .locks
            .acquire(&account_create_lock_key(id), self.lock_lease, self.lock_wait)
            .await?;
        let wallet = self.wallet(id)?;
        let key_hex = Zeroizing::new(private_key.trim().to_uppercase());
        let key = crypto::parse_seed(&key_hex)?;
        let address = crypto::address_from_public(&crypto::public_from_private(&key), self.network);
        if self.store.account_ref(id, &address)?.is_some() {
            return Err(WalletError::AccountAlreadyExists(address));
        }

        let stored = if wallet.encrypted {
            let password = password.ok_or_else(|| WalletError::WalletLocked(id.to_string()))?;
            self.cipher.decrypt(&wallet.seed, password)?;
            let sealed = self.cipher.encrypt(&key_hex, password)?;
            if self.seeds.contains(id) {
                self.seeds.set(SeedStorage::adhoc_key(id, &address), key_hex.clone());
            }
            sealed
        } else {
            key_hex.to_string()
        };
        self.store.insert_adhoc(&AdHocAccountRecord {
            wallet_id: id.to_string(),
            address: address.clone(),
            private_key: stored,
        })?;
        tracing::info!(wallet = id, address = %address, "➕ ad-hoc account added");
        Ok(address)
    }

    /// Deterministic accounts in index order, then ad-hoc accounts.
    pub fn account_list(&self, id: &str, limit: Option<usize>) -> Result<Vec<String>> {
        self.wallet(id)?;
        let mut out: Vec<String> = self.store.accounts(id)?.into_iter().map(|a| a.address).collect();
        out.extend(self.store.adhoc_accounts(id)?.into_iter().map(|a| a.address));
        if let Some(n) = limit {
            out.truncate(n);
        }
        Ok(out)
    }

    pub fn wallet_contains(&self, id: &str, address: &str) -> Result<bool> {
        self.wallet(id)?;
        let address = self.normalize(address)?;
        Ok(self.store.account_ref(id, &address)?.is_some())
    }

    /// Key for an account of this wallet. Fails with `WalletLocked` when the
    /// needed secret is not in the unlock cache.
    pub fn account_key(&self, wallet: &WalletRecord, address: &str) -> Result<AccountKey> {
        let address = self.normalize(address)?;
        match self.store.account_ref(&wallet.id, &address)? {
            Some(AccountRef::Deterministic(index)) => {
                let seed = self.seed(wallet)?;
                let kp = crypto::keypair_from_seed(&seed, index);
                Ok(AccountKey { address, private: kp.private, adhoc: false })
            }
            Some(AccountRef::AdHoc) => {
                let record = self
                    .store
                    .get_adhoc(&wallet.id, &address)?
                    .ok_or_else(|| WalletError::AccountNotFound(address.clone()))?;
                let key_hex = if wallet.encrypted {
                    self.seeds
                        .get(&SeedStorage::adhoc_key(&wallet.id, &address))
                        .ok_or_else(|| WalletError::WalletLocked(wallet.id.clone()))?
                } else {
                    Zeroizing::new(record.private_key)
                };
                Ok(AccountKey { address, private: crypto::parse_seed(&key_hex)?, adhoc: true })
            }
            None => Err(WalletError::AccountNotFound(address)),
        }
    }

    // ---------------------------------------------------------------------
    // Encryption
    // ---------------------------------------------------------------------

    /// Encrypt the seed and ad-hoc keys. On an already encrypted (and
    /// unlocked) wallet an empty password stores everything in plaintext
    /// again, and a non-empty one changes the password.
    pub fn encrypt(&self, id: &str, password: &str) -> Result<()> {
        let mut wallet = self.wallet(id)?;
        if wallet.encrypted && password.trim().is_empty() {
            return self.decrypt_at_rest(wallet);
        }
        if wallet.encrypted {
            return self.password_change(id, password);
        }
        if password.trim().is_empty() {
            return Err(WalletError::invalid("password must not be empty"));
        }
        let mut adhoc = self.store.adhoc_accounts(id)?;
        for a in adhoc.iter_mut() {
            a.private_key = self.cipher.encrypt(&a.private_key, password)?;
        }
        wallet.seed = self.cipher.encrypt(&wallet.seed, password)?;
        wallet.encrypted = true;
        self.store.update_wallet_secrets(&wallet, &adhoc)?;
        tracing::info!(wallet = id, "🔐 wallet encrypted");
        Ok(())
    }

    fn decrypt_at_rest(&self, mut wallet: WalletRecord) -> Result<()> {
        let seed = self.seed_hex(&wallet)?;
        let mut adhoc = self.store.adhoc_accounts(&wallet.id)?;
        for a in adhoc.iter_mut() {
            let key = self
                .seeds
                .get(&SeedStorage::adhoc_key(&wallet.id, &a.address))
                .ok_or_else(|| WalletError::WalletLocked(wallet.id.clone()))?;
            a.private_key = key.to_string();
        }
        wallet.seed = seed.to_string();
        wallet.encrypted = false;
        self.store.update_wallet_secrets(&wallet, &adhoc)?;
        self.seeds.remove_wallet(&wallet.id);
        tracing::info!(wallet = %wallet.id, "🔓 wallet stored unencrypted");
        Ok(())
    }

    /// Decrypt the seed and ad-hoc keys into the unlock cache.
    pub fn unlock(&self, id: &str, password: &str) -> Result<()> {
        let wallet = self.wallet(id)?;
        if !wallet.encrypted {
            return Ok(());
        }
        let seed = self.cipher.decrypt(&wallet.seed, password)?;
        let mut keys = Vec::new();
        for a in self.store.adhoc_accounts(id)? {
            keys.push((SeedStorage::adhoc_key(id, &a.address), self.cipher.decrypt(&a.private_key, password)?));
        }
        self.seeds.set(id, seed);
        for (k, v) in keys {
            self.seeds.set(k, v);
        }
        tracing::info!(wallet = id, "🔓 wallet unlocked");
        Ok(())
    }

    pub fn lock(&self, id: &str) -> Result<()> {
        self.wallet(id)?;
        self.seeds.remove_wallet(id);
        Ok(())
    }

    pub fn is_locked(&self, id: &str) -> Result<bool> {
        let wallet = self.wallet(id)?;
        Ok(wallet.encrypted && !self.seeds.contains(id))
    }

    pub fn is_encrypted(&self, id: &str) -> Result<bool> {
        Ok(self.wallet(id)?.encrypted)
    }

    /// Re-seal an unlocked encrypted wallet under `new_password`.
    pub fn password_change(&self, id: &str, new_password: &str) -> Result<()> {
        let mut wallet = self.wallet(id)?;
        if !wallet.encrypted {
            return Err(WalletError::invalid("wallet is not encrypted"));
        }
        if new_password.trim().is_empty() {
            return Err(WalletError::invalid("password must not be empty"));
        }
        let seed = self.seed_hex(&wallet)?;
        let mut adhoc = self.store.adhoc_accounts(id)?;
        for a in adhoc.iter_mut() {
            let key = self
                .seeds
                .get(&SeedStorage::adhoc_key(id, &a.address))
                .ok_or_else(|| WalletError::WalletLocked(id.to_string()))?;
            a.private_key = self.cipher.encrypt(&key, new_password)?;
        }
        wallet.seed = self.cipher.encrypt(&seed, new_password)?;
        self.store.update_wallet_secrets(&wallet, &adhoc)?;
        tracing::info!(wallet = id, "🔑 wallet password changed");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub async fn wallet_balances(&self, id: &str) -> Result<HashMap<String, AccountBalance>> {
        let accounts = self.account_list(id, None)?;
        if accounts.is_empty() {
            return Ok(HashMap::new());
        }
        self.rpc.accounts_balances(&accounts).await
    }

    pub async fn wallet_frontiers(&self, id: &str) -> Result<HashMap<String, String>> {
        let accounts = self.account_list(id, None)?;
        if accounts.is_empty() {
            return Ok(HashMap::new());
        }
        self.rpc.accounts_frontiers(&accounts).await
    }

    pub async fn wallet_pending(&self, id: &str, threshold: u128) -> Result<HashMap<String, Vec<String>>> {
        let accounts = self.account_list(id, None)?;
        if accounts.is_empty() {
            return Ok(HashMap::new());
        }
        let mut pending = self.rpc.accounts_pending(&accounts, threshold).await?;
        pending.retain(|_, blocks| !blocks.is_empty());
        Ok(pending)
    }

    pub async fn wallet_info(&self, id: &str) -> Result<WalletInfo> {
        let balances = self.wallet_balances(id).await?;
        let (balance, pending) = balances
            .values()
            .fold((0u128, 0u128), |(b, p), x| (b.saturating_add(x.balance), p.saturating_add(x.pending)));
        Ok(WalletInfo {
            balance,
            pending,
            accounts_count: self.store.accounts(id)?.len(),
            adhoc_count: self.store.adhoc_accounts(id)?.len(),
            deterministic_index: self.store.max_index(id)?,
        })
    }
}
