//! State blocks in the node's JSON form, plus hashing and signing.

use serde::{Deserialize, Serialize};

use crate::crypto::{self, BlockHash, PublicKey};
use crate::error::{Result, WalletError};

// 31 zero bytes followed by the state block type (6).
const STATE_PREAMBLE: [u8; 32] = {
    let mut p = [0u8; 32];
    p[31] = 6;
    p
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockSubtype {
    Open,
    Receive,
    Send,
    Change,
}

impl BlockSubtype {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockSubtype::Open => "open",
            BlockSubtype::Receive => "receive",
            BlockSubtype::Send => "send",
            BlockSubtype::Change => "change",
        }
    }
}

/// A state block as the node serialises it with `json_block: true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub account: String,
    pub previous: String,
    pub representative: String,
    /// Raw amount as a decimal string.
    pub balance: String,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_as_account: Option<String>,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub work: String,
}

impl StateBlock {
    /// Unsigned block without work.
    pub fn new(
        account: &str,
        previous: &BlockHash,
        representative: &str,
        balance: u128,
        link: &[u8; 32],
    ) -> Self {
        StateBlock {
            kind: "state".into(),
            account: account.to_string(),
            previous: hex::encode_upper(previous),
            representative: representative.to_string(),
            balance: balance.to_string(),
            link: hex::encode_upper(link),
            link_as_account: None,
            signature: String::new(),
            work: String::new(),
        }
    }

    pub fn balance_raw(&self) -> Result<u128> {
        parse_raw(&self.balance)
    }

    pub fn previous_hash(&self) -> Result<BlockHash> {
        crypto::parse_hash(&self.previous)
    }

    pub fn link_bytes(&self) -> Result<[u8; 32]> {
        crypto::parse_hash(&self.link)
    }

    pub fn account_key(&self) -> Result<PublicKey> {
        crypto::public_from_address(&self.account)
    }

    /// The hash proof of work is computed against: the previous block, or the
    /// account's public key for the first block of a chain.
    pub fn root(&self) -> Result<[u8; 32]> {
        let previous = self.previous_hash()?;
        if previous == crypto::ZERO_HASH {
            self.account_key()
        } else {
            Ok(previous)
        }
    }

    pub fn hash(&self) -> Result<BlockHash> {
        let mut data = Vec::with_capacity(32 * 6 + 16);
        data.extend_from_slice(&STATE_PREAMBLE);
        data.extend_from_slice(&self.account_key()?);
        data.extend_from_slice(&self.previous_hash()?);
        data.extend_from_slice(&crypto::public_from_address(&self.representative)?);
        data.extend_from_slice(&self.balance_raw()?.to_be_bytes());
        data.extend_from_slice(&self.link_bytes()?);
        Ok(crypto::blake2b_256(&data))
    }

    pub fn hash_hex(&self) -> Result<String> {
        Ok(hex::encode_upper(self.hash()?))
    }

    pub fn sign(&mut self, private: &[u8; 32]) -> Result<()> {
        let hash = self.hash()?;
        self.signature = hex::encode_upper(crypto::sign(private, &hash));
        Ok(())
    }

    pub fn verify_signature(&self) -> bool {
        let (Ok(hash), Ok(key), Ok(sig)) = (self.hash(), self.account_key(), hex::decode(&self.signature)) else {
            return false;
        };
        match <[u8; 64]>::try_from(sig.as_slice()) {
            Ok(sig) => crypto::verify(&key, &hash, &sig),
            Err(_) => false,
        }
    }

    pub fn set_work(&mut self, work: &str) {
        self.work = work.to_lowercase();
    }
}

/// Parse a raw amount (decimal string, up to 2^128 - 1).
pub fn parse_raw(text: &str) -> Result<u128> {
    text.trim()
        .parse::<u128>()
        .map_err(|_| WalletError::invalid(format!("invalid raw amount: {text}")))
}
