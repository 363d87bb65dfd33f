// Library interface for the pippin wallet engine
// The CLI in main.rs and the integration tests both build on these modules

pub mod config;
pub mod error;
pub mod crypto;
pub mod block;
pub mod difficulty;
pub mod secrets;
pub mod pool;
pub mod miner;
pub mod rpc;
pub mod work;
pub mod dpow;
pub mod lock;
pub mod model;
pub mod storage;
pub mod wallet;
pub mod blocks;
pub mod engine;
pub mod metrics;

pub use block::{BlockSubtype, StateBlock};
pub use config::Config;
pub use crypto::{address_from_public, public_from_address, Network};
pub use engine::{Engine, Parts};
pub use error::{Result, WalletError};
pub use storage::Store;
pub use wallet::WalletService;
