//! Local CPU proof-of-work. Always available unless the work pool is sized
//! to zero; used as the fallback of the work race.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::Rng;

use crate::crypto;
use crate::error::{Result, WalletError};
use crate::pool::BlockingPool;

// Attempts between checks of the cancel flag.
const CHECK_INTERVAL: u64 = 1 << 14;

/// Sets the shared flag when dropped, so a solver whose caller went away stops.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[derive(Clone, Debug)]
pub struct Miner {
    pool: BlockingPool,
}

impl Miner {
    pub fn new(max_work_processes: usize) -> Self {
        Miner { pool: BlockingPool::new("pow", max_work_processes) }
    }

    pub fn is_enabled(&self) -> bool {
        self.pool.is_enabled()
    }

    /// Search for work on `root` meeting `difficulty`. Dropping the returned
    /// future stops the search at the next check interval.
    pub async fn generate(&self, root: [u8; 32], difficulty: u64) -> Result<u64> {
        if !self.pool.is_enabled() {
            return Err(WalletError::WorkDisabled);
        }
        let cancel = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(cancel.clone());
        let started = std::time::Instant::now();
        let found = self
            .pool
            .run(move || solve(&root, difficulty, &cancel))
            .await?;
        match found {
            Some((work, attempts)) => {
                crate::metrics::LOCAL_WORK_SOLVED.inc();
                tracing::debug!(
                    root = %hex::encode_upper(root),
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "⛏️  local work found"
                );
                Ok(work)
            }
            None => Err(WalletError::WorkFailed(hex::encode_upper(root))),
        }
    }
}

/// Returns the work value and attempt count, or `None` when cancelled.
fn solve(root: &[u8; 32], difficulty: u64, cancel: &AtomicBool) -> Option<(u64, u64)> {
    let mut nonce: u64 = rand::thread_rng().gen();
    let mut attempts = 0u64;
    loop {
        attempts += 1;
        if crypto::work_valid(root, nonce, difficulty) {
            return Some((nonce, attempts));
        }
        nonce = nonce.wrapping_add(1);
        if attempts % CHECK_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
            return None;
        }
    }
}
