//! Records persisted in the store.

use serde::{Deserialize, Serialize};

use crate::block::BlockSubtype;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletRecord {
    pub id: String,
    /// Hex seed, or the seed cipher's output when `encrypted`.
    pub seed: String,
    pub representative: Option<String>,
    pub encrypted: bool,
    /// Unix seconds.
    pub created_at: u64,
}

/// Deterministic account: the key is re-derived from the wallet seed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountRecord {
    pub wallet_id: String,
    pub index: u32,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AdHocAccountRecord {
    pub wallet_id: String,
    pub address: String,
    /// Hex key, encrypted like the seed when the wallet is.
    pub private_key: String,
}

/// How an address belongs to its wallet.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccountRef {
    Deterministic(u32),
    AdHoc,
}

/// A published send, kept so a retry with the same id replays it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedBlock {
    pub wallet_id: String,
    pub address: String,
    pub adhoc: bool,
    pub block_hash: String,
    pub block_json: String,
    pub send_id: String,
    pub subtype: BlockSubtype,
}
