//! Process-wide model lock and detached background tasks.

use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info_span};

/// Name of the lock guarding input-model edits.
pub const MODEL_LOCK_NAME: &str = "hlm-model";

static GLOBAL_MODEL_LOCK: LazyLock<ModelLock> = LazyLock::new(|| ModelLock::new(MODEL_LOCK_NAME));

/// A named mutex serialising every input-model mutation sub-sequence.
///
/// Clones share the same underlying mutex. Guards are held across `.await`
/// points while facade calls run, which is why this is an async mutex.
#[derive(Clone, Debug)]
pub struct ModelLock {
    name: &'static str,
    inner: Arc<AsyncMutex<()>>,
}

/// Proof that the holder owns the [`ModelLock`]; released on drop.
#[derive(Debug)]
pub struct ModelLockGuard<'a> {
    name: &'static str,
    holder: String,
    _guard: AsyncMutexGuard<'a, ()>,
}

impl ModelLock {
    /// Creates an independent lock, mainly for tests.
    #[must_use]
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Returns the process-wide model lock.
    #[must_use]
    pub fn global() -> Self {
        GLOBAL_MODEL_LOCK.clone()
    }

    /// Returns the lock name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Waits for and takes the lock on behalf of `holder`.
    pub async fn acquire(&self, holder: &str) -> ModelLockGuard<'_> {
        debug!(lock = self.name, holder, "waiting for lock");
        let guard = self.inner.lock().await;
        debug!(lock = self.name, holder, "lock acquired");
        ModelLockGuard {
            name: self.name,
            holder: holder.to_owned(),
            _guard: guard,
        }
    }
}

impl Drop for ModelLockGuard<'_> {
    fn drop(&mut self) {
        debug!(lock = self.name, holder = %self.holder, "lock released");
    }
}

/// Spawns detached tasks and lets callers wait for all of them.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    set: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    /// Creates an empty task set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` on the current runtime inside a span named after
    /// `label`.
    pub fn spawn<F>(&self, label: String, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = info_span!("background", task = %label);
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        while set.try_join_next().is_some() {}
        set.spawn(task.instrument(span));
    }

    /// Number of tasks not yet reaped.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
        while set.try_join_next().is_some() {}
        set.len()
    }

    /// Waits until every spawned task, including ones spawned while
    /// draining, has finished.
    pub async fn drain(&self) {
        loop {
            let mut pending = {
                let mut set = self.set.lock().unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *set)
            };
            if pending.is_empty() {
                return;
            }
            while let Some(joined) = pending.join_next().await {
                if let Err(err) = joined {
                    error!(error = %err, "background task aborted");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests;
