//! Per-account mutual exclusion.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async locks keyed by account id, created on first use.
///
/// Holders keep a lock only for local state transitions, never across a
/// network submission.
#[derive(Debug, Clone, Default)]
pub struct AccountLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        self.entry(key).lock_owned().await
    }

    /// Exclusive claim on `key`, removed from the map once released and
    /// nobody else waits for it.
    pub async fn claim(&self, key: &str) -> Claim {
        let mutex = self.entry(key);
        let guard = mutex.lock_owned().await;
        Claim::new(self.inner.clone(), key, guard)
    }

    /// Non-blocking `claim`; `None` while another holder owns `key`.
    pub fn try_claim(&self, key: &str) -> Option<Claim> {
        let mutex = self.entry(key);
        let guard = mutex.try_lock_owned().ok()?;
        Some(Claim::new(self.inner.clone(), key, guard))
    }

    fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        self.inner
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Held while one task owns a key.
pub struct Claim {
    map: Arc<DashMap<String, Arc<Mutex<()>>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Claim {
    fn new(map: Arc<DashMap<String, Arc<Mutex<()>>>>, key: &str, guard: OwnedMutexGuard<()>) -> Self {
        Self {
            map,
            key: key.to_string(),
            guard: Some(guard),
        }
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or awaits the key.
        self.map.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl std::fmt::Debug for Claim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Claim").field("key", &self.key).finish()
    }
}
