//! Pluggable cache backend capability set.
//!
//! The gateway's caching concerns reduce to four capabilities: get, set,
//! remove (single key and by prefix), and a distributed acquire-or-skip
//! lock. Backends implement this trait; everything above it is policy.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::CacheResult;

/// Pluggable cache backend.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Fetch a value if present and unexpired.
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>>;

    /// Store a value with a time-to-live.
    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()>;

    /// Remove a single key.
    async fn remove(&self, key: &str) -> CacheResult<()>;

    /// Remove every key sharing a prefix.
    async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<()>;

    /// Acquire a named lock, retrying until `wait` elapses.
    ///
    /// Acquire-or-skip semantics: `None` means another holder kept the lock
    /// for the whole window and the caller should proceed without it.
    async fn acquire_lock(
        &self,
        key: &str,
        expiry: Duration,
        wait: Duration,
        retry: Duration,
    ) -> CacheResult<Option<LockHandle>>;

    /// Stable backend name for logs and health reporting.
    fn name(&self) -> &'static str;
}

/// Held distributed lock. Releases on drop; the matching backend task
/// removes the key only while the fencing token still matches.
pub struct LockHandle {
    key: String,
    release: Option<oneshot::Sender<()>>,
}

impl LockHandle {
    /// Wrap a release channel for a held lock.
    #[must_use]
    pub fn new(key: String, release: oneshot::Sender<()>) -> Self {
        Self {
            key,
            release: Some(release),
        }
    }

    /// The locked key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Release the lock explicitly.
    pub fn release(mut self) {
        self.signal();
    }

    fn signal(&mut self) {
        if let Some(release) = self.release.take() {
            if release.send(()).is_err() {
                debug!(key = %self.key, "lock release receiver already gone");
            }
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        self.signal();
    }
}
