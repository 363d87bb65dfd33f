//! Error taxonomy for every operation the engine exposes.
//!
//! Expected conditions (locked wallet, missing account, short balance) are
//! ordinary variants that callers match on. `code()` gives the gateway a
//! stable string for each of them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet not found")]
    WalletNotFound,

    /// The wallet is encrypted and its seed is not in the unlock cache.
    #[error("wallet {0} is locked")]
    WalletLocked(String),

    #[error("account already exists: {0}")]
    AccountAlreadyExists(String),

    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("failed to generate work for {0}")]
    WorkFailed(String),

    #[error("failed to process block: {0}")]
    ProcessFailed(String),

    /// Carries the balance (raw) the node reported at the time of the check.
    #[error("insufficient balance (balance: {0})")]
    InsufficientBalance(u128),

    #[error("unable to decrypt with the given password")]
    DecryptionError,

    #[error("local work generation is disabled")]
    WorkDisabled,

    #[error("could not acquire lock {0} in time")]
    LockUnavailable(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WalletError>;

impl WalletError {
    /// Stable identifier for the wire layer.
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::WalletNotFound => "wallet_not_found",
            WalletError::WalletLocked(_) => "wallet_locked",
            WalletError::AccountAlreadyExists(_) => "account_already_exists",
            WalletError::AccountNotFound(_) => "account_not_found",
            WalletError::BlockNotFound(_) => "block_not_found",
            WalletError::WorkFailed(_) => "work_failed",
            WalletError::ProcessFailed(_) => "process_failed",
            WalletError::InsufficientBalance(_) => "insufficient_balance",
            WalletError::DecryptionError => "invalid_password",
            WalletError::WorkDisabled => "work_disabled",
            WalletError::LockUnavailable(_) => "lock_unavailable",
            WalletError::InvalidInput(_) => "invalid_input",
            WalletError::Rpc(_) => "rpc_error",
            WalletError::Storage(_) | WalletError::Serialization(_) => "storage_error",
            WalletError::Internal(_) => "internal_error",
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        WalletError::InvalidInput(msg.into())
    }
}

impl From<reqwest::Error> for WalletError {
    fn from(e: reqwest::Error) -> Self {
        WalletError::Rpc(e.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(e: serde_json::Error) -> Self {
        WalletError::Rpc(format!("malformed response: {e}"))
    }
}

impl From<tokio::task::JoinError> for WalletError {
    fn from(e: tokio::task::JoinError) -> Self {
        WalletError::Internal(format!("join error: {e}"))
    }
}
