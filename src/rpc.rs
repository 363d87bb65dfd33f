//! Typed client for the ledger node's JSON RPC.
//!
//! Every call is one POST with an `action` body. Nothing is retried here:
//! transport errors surface as `WalletError::Rpc` and callers decide.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::block::{parse_raw, BlockSubtype, StateBlock};
use crate::crypto;
use crate::error::{Result, WalletError};

/// Chain head of an opened account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub frontier: String,
    pub representative: String,
    pub balance: u128,
    pub pending: u128,
}

/// What a receive needs to know about the block being received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub hash: String,
    pub block_account: String,
    pub amount: u128,
    /// Public key the block sends to, when it is a send.
    pub destination: Option<[u8; 32]>,
    pub subtype: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccountBalance {
    pub balance: u128,
    pub pending: u128,
}

#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// `Ok(None)` when the node answered with an error other than "Account not found".
    async fn account_info(&self, account: &str) -> Result<Option<AccountInfo>>;
    async fn block_info(&self, hash: &str) -> Result<BlockInfo>;
    /// Submit a signed block; returns its hash as the node reports it.
    async fn process(&self, block: &StateBlock, subtype: BlockSubtype) -> Result<String>;
    /// Receivable block hashes at or above `threshold` raw.
    async fn pending(&self, account: &str, threshold: u128) -> Result<Vec<String>>;
    async fn account_balance(&self, account: &str) -> Result<Option<AccountBalance>>;
    async fn accounts_balances(&self, accounts: &[String]) -> Result<HashMap<String, AccountBalance>>;
    async fn accounts_frontiers(&self, accounts: &[String]) -> Result<HashMap<String, String>>;
    async fn accounts_pending(&self, accounts: &[String], threshold: u128) -> Result<HashMap<String, Vec<String>>>;
    async fn is_alive(&self) -> bool;
}

#[derive(Deserialize)]
struct RawAccountInfo {
    frontier: String,
    representative: Option<String>,
    balance: String,
    #[serde(default)]
    pending: Option<String>,
    #[serde(default)]
    receivable: Option<String>,
}

#[derive(Deserialize)]
struct RawBalance {
    balance: String,
    #[serde(default)]
    pending: Option<String>,
    #[serde(default)]
    receivable: Option<String>,
}

impl RawBalance {
    fn parse(&self) -> Result<AccountBalance> {
        Ok(AccountBalance {
            balance: parse_raw(&self.balance)?,
            pending: parse_raw(self.pending.as_deref().or(self.receivable.as_deref()).unwrap_or("0"))?,
        })
    }
}

fn node_error(resp: &Value) -> Option<&str> {
    resp.get("error").and_then(Value::as_str)
}

/// Pending block lists come back as an array (no threshold), a map of
/// hash to amount (threshold), or an empty string when there are none.
fn pending_hashes(blocks: &Value) -> Vec<String> {
    match blocks {
        Value::Array(items) => items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        Value::Object(map) => map.keys().cloned().collect(),
        _ => Vec::new(),
    }
}

/// `contents` may be an object (`json_block: true`) or a JSON string.
fn block_contents(resp: &Value) -> Result<Value> {
    match resp.get("contents") {
        Some(Value::String(s)) => Ok(serde_json::from_str(s)?),
        Some(v @ Value::Object(_)) => Ok(v.clone()),
        _ => Err(WalletError::Rpc("block_info response has no contents".into())),
    }
}

fn destination_of(contents: &Value) -> Option<[u8; 32]> {
    let field = |k: &str| contents.get(k).and_then(Value::as_str);
    if let Some(addr) = field("link_as_account").or_else(|| field("destination")) {
        if let Ok(pk) = crypto::public_from_address(addr) {
            return Some(pk);
        }
    }
    field("link").and_then(|l| crypto::parse_hash(l).ok())
}

fn parse_block_info(hash: &str, resp: &Value) -> Result<BlockInfo> {
    let contents = block_contents(resp)?;
    let str_field = |k: &str| resp.get(k).and_then(Value::as_str);
    Ok(BlockInfo {
        hash: hash.to_uppercase(),
        block_account: str_field("block_account").unwrap_or_default().to_string(),
        amount: parse_raw(str_field("amount").unwrap_or("0"))?,
        destination: destination_of(&contents),
        subtype: str_field("subtype").map(str::to_string),
    })
}

/// HTTP client for one node.
pub struct NodeRpcClient {
    url: String,
    http: reqwest::Client,
    liveness_account: String,
}

impl NodeRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration, network: crypto::Network) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::Internal(format!("http client: {e}")))?;
        let liveness_account = match network {
            crypto::Network::Nano => "nano_3o7uzba8b9e1wqu5ziwpruteyrs3scyqr761x7ke6w1xctohxfh5du75qgaj",
            crypto::Network::Banano => "ban_1tipbotgges3ss8pso6xf76gsyqnb69uwcxcyhouym67z7ofefy1jz7kepoy",
        };
        Ok(NodeRpcClient { url: url.into(), http, liveness_account: liveness_account.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, body: Value) -> Result<Value> {
        let action = body.get("action").and_then(Value::as_str).unwrap_or("?").to_string();
        let resp = self.http.post(&self.url).json(&body).send().await?;
        let value: Value = resp.json().await?;
        tracing::trace!(action = %action, "rpc call answered");
        Ok(value)
    }
}

#[async_trait]
impl LedgerRpc for NodeRpcClient {
    async fn account_info(&self, account: &str) -> Result<Option<AccountInfo>> {
        let resp = self
            .call(json!({
                "action": "account_info",
                "account": account,
                "representative": true,
                "pending": true,
            }))
            .await?;
        if let Some(err) = node_error(&resp) {
            if err.eq_ignore_ascii_case("account not found") {
                return Err(WalletError::AccountNotFound(account.to_string()));
            }
            tracing::warn!(account, error = err, "account_info refused");
            return Ok(None);
        }
        let raw: RawAccountInfo = serde_json::from_value(resp)?;
        Ok(Some(AccountInfo {
            frontier: raw.frontier.to_uppercase(),
            representative: raw.representative.unwrap_or_default(),
            balance: parse_raw(&raw.balance)?,
            pending: parse_raw(raw.pending.as_deref().or(raw.receivable.as_deref()).unwrap_or("0"))?,
        }))
    }

    async fn block_info(&self, hash: &str) -> Result<BlockInfo> {
        let resp = self
            .call(json!({ "action": "block_info", "hash": hash, "json_block": true }))
            .await?;
        match node_error(&resp) {
            Some(err) if err.eq_ignore_ascii_case("block not found") => {
                Err(WalletError::BlockNotFound(hash.to_string()))
            }
            Some(err) => Err(WalletError::Rpc(err.to_string())),
            None => parse_block_info(hash, &resp),
        }
    }

    async fn process(&self, block: &StateBlock, subtype: BlockSubtype) -> Result<String> {
        let resp = self
            .call(json!({
                "action": "process",
                "json_block": true,
                "subtype": subtype.as_str(),
                "block": block,
            }))
            .await?;
        if let Some(err) = node_error(&resp) {
            return Err(WalletError::ProcessFailed(err.to_string()));
        }
        resp.get("hash")
            .and_then(Value::as_str)
            .map(str::to_uppercase)
            .ok_or_else(|| WalletError::ProcessFailed("node returned no hash".into()))
    }

    async fn pending(&self, account: &str, threshold: u128) -> Result<Vec<String>> {
        let resp = self
            .call(json!({
                "action": "pending",
                "account": account,
                "threshold": threshold.to_string(),
            }))
            .await?;
        if let Some(err) = node_error(&resp) {
            return Err(WalletError::Rpc(err.to_string()));
        }
        Ok(resp.get("blocks").map(pending_hashes).unwrap_or_default())
    }

    async fn account_balance(&self, account: &str) -> Result<Option<AccountBalance>> {
        let resp = self.call(json!({ "action": "account_balance", "account": account })).await?;
        if resp.get("balance").is_none() {
            return Ok(None);
        }
        let raw: RawBalance = serde_json::from_value(resp)?;
        Ok(Some(raw.parse()?))
    }

    async fn accounts_balances(&self, accounts: &[String]) -> Result<HashMap<String, AccountBalance>> {
        let resp = self.call(json!({ "action": "accounts_balances", "accounts": accounts })).await?;
        if let Some(err) = node_error(&resp) {
            return Err(WalletError::Rpc(err.to_string()));
        }
        let mut out = HashMap::new();
        if let Some(Value::Object(map)) = resp.get("balances") {
            for (account, entry) in map {
                // Per-account errors (unopened accounts on newer nodes) read as zero.
                let balance = match serde_json::from_value::<RawBalance>(entry.clone()) {
                    Ok(raw) => raw.parse()?,
                    Err(_) => AccountBalance::default(),
                };
                out.insert(account.clone(), balance);
            }
        }
        Ok(out)
    }

    async fn accounts_frontiers(&self, accounts: &[String]) -> Result<HashMap<String, String>> {
        let resp = self.call(json!({ "action": "accounts_frontiers", "accounts": accounts })).await?;
        if let Some(err) = node_error(&resp) {
            return Err(WalletError::Rpc(err.to_string()));
        }
        let mut out = HashMap::new();
        if let Some(Value::Object(map)) = resp.get("frontiers") {
            for (account, hash) in map {
                if let Some(h) = hash.as_str() {
                    out.insert(account.clone(), h.to_uppercase());
                }
            }
        }
        Ok(out)
    }

    async fn accounts_pending(&self, accounts: &[String], threshold: u128) -> Result<HashMap<String, Vec<String>>> {
        let resp = self
            .call(json!({
                "action": "accounts_pending",
                "accounts": accounts,
                "threshold": threshold.to_string(),
            }))
            .await?;
        if let Some(err) = node_error(&resp) {
            return Err(WalletError::Rpc(err.to_string()));
        }
        let mut out = HashMap::new();
        if let Some(Value::Object(map)) = resp.get("blocks") {
            for (account, blocks) in map {
                out.insert(account.clone(), pending_hashes(blocks));
            }
        }
        Ok(out)
    }

    /// Uses `account_balance` rather than `block_count`, which some nodes don't expose.
    async fn is_alive(&self) -> bool {
        match self.call(json!({ "action": "account_balance", "account": self.liveness_account })).await {
            Ok(resp) => resp.get("error").is_some() || resp.get("balance").is_some(),
            Err(_) => false,
        }
    }
}
