//! Leased mutual exclusion keyed by string (account address, wallet id).
//!
//! A lease expires after its timeout even if never released, so a crashed
//! holder cannot wedge an account forever. Acquisition waits at most
//! `wait` and then fails with `LockUnavailable`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{Result, WalletError};

// Re-check interval while waiting, in case a lease lapses without a release.
const POLL: Duration = Duration::from_millis(50);

pub fn account_lock_key(address: &str) -> String {
    format!("lock:{address}")
}

pub fn account_create_lock_key(wallet_id: &str) -> String {
    format!("lock:account_create:{wallet_id}")
}

#[async_trait]
pub trait LockService: Send + Sync {
    /// Hold `key` for at most `lease`, waiting up to `wait` for it.
    async fn acquire(&self, key: &str, lease: Duration, wait: Duration) -> Result<LockGuard>;
}

struct Lease {
    token: u64,
    expires: Instant,
}

#[derive(Default)]
struct Shared {
    leases: Mutex<HashMap<String, Lease>>,
    released: Notify,
}

impl Shared {
    fn release(&self, key: &str, token: u64) {
        if let Ok(mut leases) = self.leases.lock() {
            if leases.get(key).map_or(false, |l| l.token == token) {
                leases.remove(key);
            }
        }
        self.released.notify_waiters();
    }
}

/// Releases the lock when dropped, on every exit path.
pub struct LockGuard {
    key: String,
    token: u64,
    shared: Arc<Shared>,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.shared.release(&self.key, self.token);
    }
}

/// In-process lock table.
#[derive(Default)]
pub struct LocalLockManager {
    shared: Arc<Shared>,
    next_token: AtomicU64,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_take(&self, key: &str, lease: Duration) -> Option<u64> {
        let mut leases = self.shared.leases.lock().ok()?;
        let now = Instant::now();
        if let Some(l) = leases.get(key) {
            if l.expires > now {
                return None;
            }
            tracing::warn!(key, "lock lease expired without release, taking over");
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        leases.insert(key.to_string(), Lease { token, expires: now + lease });
        Some(token)
    }
}

#[async_trait]
impl LockService for LocalLockManager {
    async fn acquire(&self, key: &str, lease: Duration, wait: Duration) -> Result<LockGuard> {
        let deadline = Instant::now() + wait;
        loop {
            // Register interest before checking so a release in between isn't missed.
            let released = self.shared.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if let Some(token) = self.try_take(key, lease) {
                return Ok(LockGuard { key: key.to_string(), token, shared: self.shared.clone() });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WalletError::LockUnavailable(key.to_string()));
            }
            let nap = POLL.min(deadline - now);
            let _ = tokio::time::timeout(nap, released).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_holder_waits_for_release() {
        let locks = Arc::new(LocalLockManager::new());
        let first = locks.acquire("lock:a", Duration::from_secs(60), Duration::from_secs(1)).await.unwrap();
        let err = locks
            .acquire("lock:a", Duration::from_secs(60), Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, WalletError::LockUnavailable(_)));

        let other = locks.acquire("lock:b", Duration::from_secs(60), Duration::from_millis(10)).await;
        assert!(other.is_ok());

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                locks.acquire("lock:a", Duration::from_secs(60), Duration::from_secs(5)).await.map(|g| g.key().to_string())
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);
        assert_eq!(waiter.await.unwrap().unwrap(), "lock:a");
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken() {
        let locks = LocalLockManager::new();
        let stale = locks.acquire("k", Duration::from_millis(1), Duration::from_secs(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let fresh = locks.acquire("k", Duration::from_secs(60), Duration::from_millis(10)).await.unwrap();
        // The stale guard must not release the new holder's lease.
        drop(stale);
        assert!(locks.acquire("k", Duration::from_secs(60), Duration::from_millis(10)).await.is_err());
        drop(fresh);
    }
}
