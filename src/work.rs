//! Proof-of-work acquisition: race every configured source and keep the
//! first valid answer.
//!
//! Sources are HTTP work peers, an optional pooled service and the local
//! miner. The local miner joins the race when nothing else is configured or
//! when a recent race came back empty (the failure flag). If every remote
//! source fails, the flag is set and the miner computes the work.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde_json::{json, Value};

use crate::crypto;
use crate::difficulty::{self, DifficultyModel};
use crate::error::{Result, WalletError};
use crate::miner::Miner;

/// A remote `work_generate` endpoint (work server or node).
#[async_trait]
pub trait WorkPeer: Send + Sync {
    fn url(&self) -> &str;
    /// Returns the work as hex.
    async fn work_generate(&self, hash: &str, difficulty: u64) -> Result<String>;
    async fn work_cancel(&self, hash: &str) -> Result<()>;
}

/// A pooled work service. Difficulty is given as a multiplier over the
/// network's base threshold.
#[async_trait]
pub trait PooledWork: Send + Sync {
    async fn request_work(&self, hash: &str, multiplier: f64) -> Result<String>;
}

pub struct HttpWorkPeer {
    url: String,
    http: reqwest::Client,
}

impl HttpWorkPeer {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WalletError::Internal(format!("http client: {e}")))?;
        Ok(HttpWorkPeer { url: url.into(), http })
    }
}

#[async_trait]
impl WorkPeer for HttpWorkPeer {
    fn url(&self) -> &str {
        &self.url
    }

    async fn work_generate(&self, hash: &str, difficulty: u64) -> Result<String> {
        let body = json!({
            "action": "work_generate",
            "hash": hash,
            "difficulty": format!("{difficulty:016x}"),
        });
        let resp: Value = self.http.post(&self.url).json(&body).send().await?.json().await?;
        if let Some(work) = resp.get("work").and_then(Value::as_str) {
            return Ok(work.to_string());
        }
        let err = resp.get("error").and_then(Value::as_str).unwrap_or("no work in response");
        Err(WalletError::Rpc(err.to_string()))
    }

    async fn work_cancel(&self, hash: &str) -> Result<()> {
        let body = json!({ "action": "work_cancel", "hash": hash });
        self.http.post(&self.url).json(&body).send().await?;
        Ok(())
    }
}

/// "Remote work recently failed" marker with a fixed lifetime.
#[derive(Debug)]
pub struct FailureFlag {
    ttl: Duration,
    set_at: Mutex<Option<Instant>>,
}

impl FailureFlag {
    pub fn new(ttl: Duration) -> Self {
        FailureFlag { ttl, set_at: Mutex::new(None) }
    }

    pub fn set(&self) {
        if let Ok(mut g) = self.set_at.lock() {
            *g = Some(Instant::now());
        }
    }

    pub fn is_set(&self) -> bool {
        match self.set_at.lock() {
            Ok(g) => g.map_or(false, |t| t.elapsed() < self.ttl),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Peer(usize),
    Pooled,
    Local,
}

impl Source {
    fn label(self) -> &'static str {
        match self {
            Source::Peer(_) => "peer",
            Source::Pooled => "dpow",
            Source::Local => "local",
        }
    }
}

pub struct WorkEngine {
    peers: Vec<Arc<dyn WorkPeer>>,
    pooled: Option<Arc<dyn PooledWork>>,
    miner: Miner,
    model: DifficultyModel,
    failure: FailureFlag,
    wave_timeout: Duration,
}

impl WorkEngine {
    pub fn new(
        peers: Vec<Arc<dyn WorkPeer>>,
        pooled: Option<Arc<dyn PooledWork>>,
        miner: Miner,
        model: DifficultyModel,
        failure_ttl: Duration,
        wave_timeout: Duration,
    ) -> Self {
        WorkEngine {
            peers,
            pooled,
            miner,
            model,
            failure: FailureFlag::new(failure_ttl),
            wave_timeout,
        }
    }

    pub fn model(&self) -> &DifficultyModel {
        &self.model
    }

    pub fn failure_flag_set(&self) -> bool {
        self.failure.is_set()
    }

    /// Work for a block with `root`, at the base threshold for its kind unless
    /// the caller asked for a (clamped) harder one.
    pub async fn work_for(&self, root: [u8; 32], is_receive: bool, requested: Option<u64>) -> Result<String> {
        let difficulty = self.model.effective(is_receive, requested);
        self.generate(root, difficulty).await
    }

    /// Race all eligible sources for work on `root` at or above `difficulty`.
    pub async fn generate(&self, root: [u8; 32], difficulty: u64) -> Result<String> {
        let hash = hex::encode_upper(root);
        let include_local =
            (self.peers.is_empty() && self.pooled.is_none()) || self.failure.is_set();

        let mut racing: FuturesUnordered<BoxFuture<'_, (Source, Result<String>)>> = FuturesUnordered::new();
        for (i, peer) in self.peers.iter().enumerate() {
            let hash = hash.clone();
            racing.push(
                async move { (Source::Peer(i), peer.work_generate(&hash, difficulty).await) }.boxed(),
            );
        }
        if let Some(pooled) = &self.pooled {
            let base = self.model.base_receive;
            let multiplier = difficulty::multiplier(difficulty, base).max(1.0);
            let hash = hash.clone();
            racing.push(async move { (Source::Pooled, pooled.request_work(&hash, multiplier).await) }.boxed());
        }
        if include_local {
            racing.push(
                async move {
                    let res = self.miner.generate(root, difficulty).await.map(crypto::format_work);
                    (Source::Local, res)
                }
                .boxed(),
            );
        }

        let mut winner = None;
        loop {
            match tokio::time::timeout(self.wave_timeout, racing.next()).await {
                Err(_) => {
                    tracing::warn!(hash = %hash, pending = racing.len(), "⏳ work wave timed out");
                    break;
                }
                Ok(None) => break,
                Ok(Some((source, Ok(work)))) => match crypto::parse_work(&work) {
                    Ok(w) if crypto::work_valid(&root, w, difficulty) => {
                        winner = Some((source, crypto::format_work(w)));
                        break;
                    }
                    _ => tracing::warn!(hash = %hash, source = source.label(), work = %work, "invalid work ignored"),
                },
                Ok(Some((source, Err(e)))) => {
                    tracing::info!(hash = %hash, source = source.label(), error = %e, "work source failed");
                }
            }
        }
        // Dropping the set cancels every source still running.
        drop(racing);

        if let Some((source, work)) = winner {
            crate::metrics::WORK_RESULTS.with_label_values(&[source.label()]).inc();
            self.cancel_peers(&hash, source);
            return Ok(work);
        }

        crate::metrics::WORK_RACE_EXHAUSTED.inc();
        self.failure.set();
        tracing::warn!(hash = %hash, "🔥 all work sources failed, computing locally");
        match self.miner.generate(root, difficulty).await {
            Ok(w) => {
                crate::metrics::WORK_RESULTS.with_label_values(&["local"]).inc();
                Ok(crypto::format_work(w))
            }
            Err(WalletError::WorkDisabled) => Err(WalletError::WorkDisabled),
            Err(_) => Err(WalletError::WorkFailed(hash)),
        }
    }

    /// Fire-and-forget `work_cancel` to every peer except the winner.
    /// Failures are only logged; a peer that missed it just finishes its job.
    fn cancel_peers(&self, hash: &str, winner: Source) {
        for (i, peer) in self.peers.iter().enumerate() {
            if winner == Source::Peer(i) {
                continue;
            }
            let peer = peer.clone();
            let hash = hash.to_string();
            tokio::spawn(async move {
                if let Err(e) = peer.work_cancel(&hash).await {
                    tracing::debug!(peer = peer.url(), error = %e, "work_cancel failed");
                }
            });
        }
    }
}
