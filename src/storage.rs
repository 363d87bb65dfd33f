use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, WriteOptions, DB};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{Result, WalletError};
use crate::model::{AccountRecord, AccountRef, AdHocAccountRecord, CachedBlock, WalletRecord};

// Using bincode for compact binary records. Cached block JSON is the only
// bulky value, so it alone is zstd-compressed.

const CF_WALLET: &str = "wallet";
const CF_ACCOUNT: &str = "account";
const CF_ADHOC: &str = "adhoc_account";
const CF_ADDRESS: &str = "address";
const CF_BLOCK: &str = "block";

const ZSTD_LEVEL: i32 = 3;

pub struct Store {
    pub db: DB,
    path: String,
}

/// `wallet_id || '/' || rest`. Wallet ids never contain '/'.
fn scoped(wallet_id: &str, rest: &[u8]) -> Vec<u8> {
    let mut k = Vec::with_capacity(wallet_id.len() + 1 + rest.len());
    k.extend_from_slice(wallet_id.as_bytes());
    k.push(b'/');
    k.extend_from_slice(rest);
    k
}

fn account_key(wallet_id: &str, index: u32) -> Vec<u8> {
    // Big-endian so keys sort by index.
    scoped(wallet_id, &index.to_be_bytes())
}

fn block_key(wallet_id: &str, address: &str, send_id: &str) -> Vec<u8> {
    scoped(wallet_id, format!("{address}/{send_id}").as_bytes())
}

impl Store {
    pub fn open(base_path: &str) -> Result<Self> {
        let cf_names = ["default", CF_WALLET, CF_ACCOUNT, CF_ADHOC, CF_ADDRESS, CF_BLOCK];

        let mut cf_opts = Options::default();
        // Small records; modest memtables are plenty.
        cf_opts.set_write_buffer_size(8 * 1024 * 1024);
        cf_opts.set_max_write_buffer_number(2);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf_names
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, cf_opts.clone()))
            .collect();

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_use_fsync(false);
        db_opts.set_bytes_per_sync(1024 * 1024);
        db_opts.set_max_open_files(256);
        db_opts.set_keep_log_file_num(10);

        std::fs::create_dir_all(base_path)
            .map_err(|e| WalletError::Internal(format!("cannot create {base_path}: {e}")))?;
        let db = DB::open_cf_descriptors(&db_opts, base_path, cf_descriptors)?;
        tracing::info!(path = base_path, "✅ database opened");
        Ok(Store { db, path: base_path.to_string() })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| WalletError::Internal(format!("column family '{name}' not found")))
    }

    pub fn put<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.db.put_cf(self.cf(cf)?, key, bytes)?;
        Ok(())
    }

    pub fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Values of every key starting with `prefix`, in key order.
    fn scan<T: DeserializeOwned>(&self, cf: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, T)>> {
        let iter = self.db.iterator_cf(self.cf(cf)?, IteratorMode::From(prefix, Direction::Forward));
        let mut out = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_vec(), bincode::deserialize(&value)?));
        }
        Ok(out)
    }

    /// Atomically applies a set of writes.
    pub fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(true);
        self.db.write_opt(batch, &write_opts)?;
        Ok(())
    }

    fn batch_put<T: Serialize>(&self, batch: &mut WriteBatch, cf: &str, key: &[u8], value: &T) -> Result<()> {
        batch.put_cf(self.cf(cf)?, key, bincode::serialize(value)?);
        Ok(())
    }

    fn batch_accounts(&self, batch: &mut WriteBatch, accounts: &[AccountRecord]) -> Result<()> {
        for a in accounts {
            self.batch_put(batch, CF_ACCOUNT, &account_key(&a.wallet_id, a.index), a)?;
            self.batch_put(
                batch,
                CF_ADDRESS,
                &scoped(&a.wallet_id, a.address.as_bytes()),
                &AccountRef::Deterministic(a.index),
            )?;
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Wallets
    // ---------------------------------------------------------------------

    /// Wallet and its first account in one write.
    pub fn insert_wallet(&self, wallet: &WalletRecord, first: &AccountRecord) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.batch_put(&mut batch, CF_WALLET, wallet.id.as_bytes(), wallet)?;
        self.batch_accounts(&mut batch, std::slice::from_ref(first))?;
        self.write_batch(batch)
    }

    pub fn get_wallet(&self, id: &str) -> Result<Option<WalletRecord>> {
        self.get(CF_WALLET, id.as_bytes())
    }

    pub fn put_wallet(&self, wallet: &WalletRecord) -> Result<()> {
        self.put(CF_WALLET, wallet.id.as_bytes(), wallet)
    }

    pub fn list_wallets(&self) -> Result<Vec<WalletRecord>> {
        Ok(self.scan::<WalletRecord>(CF_WALLET, b"")?.into_iter().map(|(_, w)| w).collect())
    }

    /// Wallet plus re-encrypted ad-hoc keys, atomically.
    pub fn update_wallet_secrets(&self, wallet: &WalletRecord, adhoc: &[AdHocAccountRecord]) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.batch_put(&mut batch, CF_WALLET, wallet.id.as_bytes(), wallet)?;
        for a in adhoc {
            self.batch_put(&mut batch, CF_ADHOC, &scoped(&a.wallet_id, a.address.as_bytes()), a)?;
        }
        self.write_batch(batch)
    }

    /// New seed: drop every deterministic account and write the rederived ones.
    pub fn replace_seed(&self, wallet: &WalletRecord, accounts: &[AccountRecord]) -> Result<()> {
        let mut batch = WriteBatch::default();
        for old in self.accounts(&wallet.id)? {
            batch.delete_cf(self.cf(CF_ACCOUNT)?, account_key(&old.wallet_id, old.index));
            batch.delete_cf(self.cf(CF_ADDRESS)?, scoped(&old.wallet_id, old.address.as_bytes()));
        }
        self.batch_put(&mut batch, CF_WALLET, wallet.id.as_bytes(), wallet)?;
        self.batch_accounts(&mut batch, accounts)?;
        self.write_batch(batch)
    }

    /// Remove a wallet with its accounts, ad-hoc accounts and cached blocks.
    pub fn delete_wallet(&self, id: &str) -> Result<()> {
        let prefix = scoped(id, b"");
        let mut batch = WriteBatch::default();
        batch.delete_cf(self.cf(CF_WALLET)?, id.as_bytes());
        for cf in [CF_ACCOUNT, CF_ADHOC, CF_ADDRESS, CF_BLOCK] {
            let handle = self.cf(cf)?;
            let iter = self.db.iterator_cf(handle, IteratorMode::From(&prefix, Direction::Forward));
            for item in iter {
                let (key, _) = item?;
                if !key.starts_with(&prefix) {
                    break;
                }
                batch.delete_cf(handle, key);
            }
        }
        self.write_batch(batch)
    }

    // ---------------------------------------------------------------------
    // Accounts
    // ---------------------------------------------------------------------

    pub fn insert_accounts(&self, accounts: &[AccountRecord]) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.batch_accounts(&mut batch, accounts)?;
        self.write_batch(batch)
    }

    pub fn accounts(&self, wallet_id: &str) -> Result<Vec<AccountRecord>> {
        Ok(self
            .scan::<AccountRecord>(CF_ACCOUNT, &scoped(wallet_id, b""))?
            .into_iter()
            .map(|(_, a)| a)
            .collect())
    }

    pub fn get_account(&self, wallet_id: &str, index: u32) -> Result<Option<AccountRecord>> {
        self.get(CF_ACCOUNT, &account_key(wallet_id, index))
    }

    /// Highest deterministic index in use, read from the last key of the wallet's range.
    pub fn max_index(&self, wallet_id: &str) -> Result<Option<u32>> {
        let prefix = scoped(wallet_id, b"");
        let mut upper = prefix.clone();
        upper.extend_from_slice(&[0xff; 5]);
        let mut iter = self.db.iterator_cf(self.cf(CF_ACCOUNT)?, IteratorMode::From(&upper, Direction::Reverse));
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                if !key.starts_with(&prefix) || key.len() != prefix.len() + 4 {
                    return Ok(None);
                }
                let mut idx = [0u8; 4];
                idx.copy_from_slice(&key[prefix.len()..]);
                Ok(Some(u32::from_be_bytes(idx)))
            }
            None => Ok(None),
        }
    }

    pub fn account_ref(&self, wallet_id: &str, address: &str) -> Result<Option<AccountRef>> {
        self.get(CF_ADDRESS, &scoped(wallet_id, address.as_bytes()))
    }

    pub fn insert_adhoc(&self, account: &AdHocAccountRecord) -> Result<()> {
        let key = scoped(&account.wallet_id, account.address.as_bytes());
        let mut batch = WriteBatch::default();
        self.batch_put(&mut batch, CF_ADHOC, &key, account)?;
        self.batch_put(&mut batch, CF_ADDRESS, &key, &AccountRef::AdHoc)?;
        self.write_batch(batch)
    }

    pub fn get_adhoc(&self, wallet_id: &str, address: &str) -> Result<Option<AdHocAccountRecord>> {
        self.get(CF_ADHOC, &scoped(wallet_id, address.as_bytes()))
    }

    pub fn adhoc_accounts(&self, wallet_id: &str) -> Result<Vec<AdHocAccountRecord>> {
        Ok(self
            .scan::<AdHocAccountRecord>(CF_ADHOC, &scoped(wallet_id, b""))?
            .into_iter()
            .map(|(_, a)| a)
            .collect())
    }

    // ---------------------------------------------------------------------
    // Send cache
    // ---------------------------------------------------------------------

    pub fn cached_block(&self, wallet_id: &str, address: &str, send_id: &str) -> Result<Option<CachedBlock>> {
        let key = block_key(wallet_id, address, send_id);
        match self.db.get_cf(self.cf(CF_BLOCK)?, key)? {
            Some(value) => {
                let raw = zstd::decode_all(&value[..])
                    .map_err(|e| WalletError::Internal(format!("corrupt cached block: {e}")))?;
                Ok(Some(bincode::deserialize(&raw)?))
            }
            None => Ok(None),
        }
    }

    /// Keeps the first entry for an (account, send id) pair.
    pub fn put_cached_block(&self, block: &CachedBlock) -> Result<bool> {
        if self.cached_block(&block.wallet_id, &block.address, &block.send_id)?.is_some() {
            return Ok(false);
        }
        let raw = bincode::serialize(block)?;
        let packed = zstd::encode_all(&raw[..], ZSTD_LEVEL)
            .map_err(|e| WalletError::Internal(format!("compress cached block: {e}")))?;
        self.db.put_cf(self.cf(CF_BLOCK)?, block_key(&block.wallet_id, &block.address, &block.send_id), packed)?;
        Ok(true)
    }

    /// Force flush all memtables to disk.
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        if let Err(e) = self.db.flush_wal(true) {
            tracing::warn!(error = %e, "WAL flush failed (non-critical)");
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        self.flush()?;
        self.db.cancel_all_background_work(true);
        Ok(())
    }
}
