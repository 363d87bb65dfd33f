//! Bounded pools for CPU-bound work (proof of work, signing) so it never runs
//! on the async executor threads.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::error::{Result, WalletError};

#[derive(Clone, Debug)]
pub struct BlockingPool {
    name: &'static str,
    permits: Option<Arc<Semaphore>>,
}

impl BlockingPool {
    /// A pool running at most `size` jobs at once; `size == 0` disables it.
    pub fn new(name: &'static str, size: usize) -> Self {
        let permits = (size > 0).then(|| Arc::new(Semaphore::new(size)));
        BlockingPool { name, permits }
    }

    pub fn is_enabled(&self) -> bool {
        self.permits.is_some()
    }

    /// Queue `job` behind the pool's permits and run it on a blocking thread.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.as_ref().ok_or(WalletError::WorkDisabled)?;
        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WalletError::Internal(format!("{} pool closed", self.name)))?;
        let out = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await?;
        Ok(out)
    }
}
