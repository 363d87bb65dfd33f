use serde::Deserialize;
use std::{fs, path::Path};
use anyhow::{Context, Result};

use crate::crypto::Network;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub node: Node,
    #[serde(default)]
    pub wallet: Wallet,
    #[serde(default)]
    pub work: Work,
    #[serde(default)]
    pub storage: Storage,
    #[serde(default)]
    pub kdf: Kdf,
    #[serde(default)]
    pub metrics: Metrics,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Node {
    /// Unset means the network default (`[::1]:7076` Nano, `[::1]:7072` Banano).
    pub rpc_url: Option<String>,
    #[serde(default = "default_rpc_timeout")]
    pub rpc_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Wallet {
    #[serde(default)]
    pub banano: bool,
    #[serde(default)]
    pub work_peers: Vec<String>,
    /// Also ask the node itself for work.
    #[serde(default)]
    pub node_work_generate: bool,
    /// Raw amount; unset means 10^24 on Nano and 10^27 on Banano.
    pub receive_minimum: Option<String>,
    #[serde(default = "default_true")]
    pub auto_receive_on_send: bool,
    #[serde(default)]
    pub preconfigured_representatives: Vec<String>,
    #[serde(default = "default_lock_secs")]
    pub lock_timeout_secs: u64,
    #[serde(default = "default_lock_secs")]
    pub lock_wait_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Work {
    /// 0 disables local proof of work.
    #[serde(default = "default_one")]
    pub max_work_processes: usize,
    #[serde(default = "default_one")]
    pub max_sign_threads: usize,
    #[serde(default = "default_wave_timeout")]
    pub wave_timeout_secs: u64,
    #[serde(default = "default_failure_ttl")]
    pub failure_ttl_secs: u64,
    pub dpow: Option<Dpow>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Dpow {
    pub user: String,
    pub key: String,
    pub ws_url: String,
    pub http_url: String,
    #[serde(default = "default_reconnect")]
    pub reconnect_secs: u64,
    #[serde(default = "default_dpow_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Storage {
    #[serde(default = "default_path")]
    pub path: String,
}

/// Argon2id cost for the seed cipher.
#[derive(Debug, Deserialize, Clone)]
pub struct Kdf {
    #[serde(default = "default_mem")]
    pub mem_kib: u32,
    #[serde(default = "default_time_cost")]
    pub time_cost: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Metrics {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default)]
    pub enabled: bool,
}

fn default_rpc_timeout() -> u64 { 300 }
fn default_true() -> bool { true }
fn default_lock_secs() -> u64 { 300 }
fn default_one() -> usize { 1 }
fn default_wave_timeout() -> u64 { 100 }
fn default_failure_ttl() -> u64 { 300 }
fn default_reconnect() -> u64 { 30 }
fn default_dpow_timeout() -> u64 { 15 }
fn default_path() -> String { "pippin_data".into() }
fn default_mem() -> u32 { 19_456 }            // 19 MiB
fn default_time_cost() -> u32 { 2 }
fn default_bind() -> String { "127.0.0.1:9100".into() }

const NANO_REPS: &[&str] = &[
    "nano_1x7biz69cem95oo7gxkrw6kzhfywq4x5dupw4z1bdzkb74dk9kpxwzjbdhhs",
    "nano_1thingspmippfngcrtk1ofd3uwftffnu4qu9xkauo9zkiuep6iknzci3jxa6",
    "nano_1natrium1o3z5519ifou7xii8crpxpk8y65qmkih8e8bpsjri651oza8imdd",
    "nano_3o7uzba8b9e1wqu5ziwpruteyrs3scyqr761x7ke6w1xctohxfh5du75qgaj",
];
const BANANO_REPS: &[&str] = &[
    "ban_1ka1ium4pfue3uxtntqsrib8mumxgazsjf58gidh1xeo5te3whsq8z476goo",
    "ban_1cake36ua5aqcq1c5i3dg7k8xtosw7r9r7qbbf5j15sk75csp9okesz87nfn",
    "ban_1fomoz167m7o38gw4rzt7hz67oq6itejpt4yocrfywujbpatd711cjew8gjj",
];

impl Default for Node {
    fn default() -> Self { Node { rpc_url: None, rpc_timeout_secs: default_rpc_timeout() } }
}

impl Default for Wallet {
    fn default() -> Self {
        Wallet {
            banano: false,
            work_peers: Vec::new(),
            node_work_generate: false,
            receive_minimum: None,
            auto_receive_on_send: true,
            preconfigured_representatives: Vec::new(),
            lock_timeout_secs: default_lock_secs(),
            lock_wait_secs: default_lock_secs(),
        }
    }
}

impl Default for Work {
    fn default() -> Self {
        Work {
            max_work_processes: 1,
            max_sign_threads: 1,
            wave_timeout_secs: default_wave_timeout(),
            failure_ttl_secs: default_failure_ttl(),
            dpow: None,
        }
    }
}

impl Default for Storage {
    fn default() -> Self { Storage { path: default_path() } }
}

impl Default for Kdf {
    fn default() -> Self { Kdf { mem_kib: default_mem(), time_cost: default_time_cost() } }
}

impl Default for Metrics {
    fn default() -> Self { Metrics { bind: default_bind(), enabled: false } }
}

impl Config {
    pub fn network(&self) -> Network {
        if self.wallet.banano { Network::Banano } else { Network::Nano }
    }

    pub fn rpc_url(&self) -> String {
        match &self.node.rpc_url {
            Some(url) => url.clone(),
            None if self.wallet.banano => "http://[::1]:7072".into(),
            None => "http://[::1]:7076".into(),
        }
    }

    /// Raw receive threshold. `load` rejects values that do not parse.
    pub fn receive_minimum(&self) -> u128 {
        let default = if self.wallet.banano { 10u128.pow(27) } else { 10u128.pow(24) };
        self.wallet
            .receive_minimum
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn representatives(&self) -> Vec<String> {
        if !self.wallet.preconfigured_representatives.is_empty() {
            return self.wallet.preconfigured_representatives.clone();
        }
        let reps = if self.wallet.banano { BANANO_REPS } else { NANO_REPS };
        reps.iter().map(|s| s.to_string()).collect()
    }

    /// Peer URLs to race, including the node when `node_work_generate` is set.
    pub fn work_peer_urls(&self) -> Vec<String> {
        let mut peers = self.wallet.work_peers.clone();
        if self.wallet.node_work_generate {
            let node = self.rpc_url();
            if !peers.contains(&node) {
                peers.push(node);
            }
        }
        peers
    }
}

/// Read the TOML file at `p` and deserialize into `Config`.
/// *Adds context* so user errors print a friendlier message.
///
/// # Errors
/// * Returns an anyhow::Error if the file cannot be read or parsed.
pub fn load<P: AsRef<Path>>(p: P) -> Result<Config> {
    let text = fs::read_to_string(&p)
        .with_context(|| format!("🗂️  couldn’t read config file {}", p.as_ref().display()))?;
    let cfg: Config = toml::from_str(&text)
        .with_context(|| "📝  invalid TOML in config file".to_string())?;
    if let Some(raw) = &cfg.wallet.receive_minimum {
        raw.trim()
            .parse::<u128>()
            .with_context(|| format!("💰  wallet.receive_minimum must be a raw amount, got {raw:?}"))?;
    }
    Ok(cfg)
}
