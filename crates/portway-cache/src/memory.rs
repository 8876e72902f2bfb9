//! Bounded in-memory cache provider.
//!
//! Entries carry their own expiry and are lazily evicted on access; when the
//! entry bound is hit, the least recently used entries make room. Locks are
//! plain in-process leases with the same acquire-or-skip contract as the
//! distributed provider.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::time::sleep;

use crate::error::CacheResult;
use crate::provider::{CacheProvider, LockHandle};

struct Entry {
    value: Bytes,
    expires_at: Instant,
    last_access: Instant,
}

struct Lease {
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    leases: HashMap<String, Lease>,
}

/// In-memory provider with a bounded entry count and LRU eviction.
pub struct MemoryCacheProvider {
    state: Arc<Mutex<State>>,
    max_entries: usize,
}

impl MemoryCacheProvider {
    /// Create a provider bounded to `max_entries` values.
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            max_entries: max_entries.max(1),
        }
    }

    /// Number of live entries, for diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        Self::lock(&self.state).entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(state: &Arc<Mutex<State>>) -> MutexGuard<'_, State> {
        state.lock().unwrap_or_else(|err| {
            panic!("failed to lock memory cache state: {err}");
        })
    }

    fn evict_for_capacity(state: &mut State, max_entries: usize) {
        let now = Instant::now();
        state.entries.retain(|_, entry| entry.expires_at > now);
        while state.entries.len() >= max_entries {
            let Some(oldest) = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_access)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            state.entries.remove(&oldest);
        }
    }

    fn try_lease(state: &Arc<Mutex<State>>, key: &str, expiry: Duration) -> bool {
        let mut guard = Self::lock(state);
        let now = Instant::now();
        guard.leases.retain(|_, lease| lease.expires_at > now);
        if guard.leases.contains_key(key) {
            return false;
        }
        guard.leases.insert(
            key.to_string(),
            Lease {
                expires_at: now + expiry,
            },
        );
        true
    }
}

#[async_trait]
impl CacheProvider for MemoryCacheProvider {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let mut guard = Self::lock(&self.state);
        let now = Instant::now();
        if let Some(entry) = guard.entries.get_mut(key) {
            if entry.expires_at > now {
                entry.last_access = now;
                return Ok(Some(entry.value.clone()));
            }
            guard.entries.remove(key);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()> {
        let mut guard = Self::lock(&self.state);
        Self::evict_for_capacity(&mut guard, self.max_entries);
        let now = Instant::now();
        guard.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
                last_access: now,
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        Self::lock(&self.state).entries.remove(key);
        Ok(())
    }

    async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<()> {
        Self::lock(&self.state)
            .entries
            .retain(|key, _| !key.starts_with(prefix));
        Ok(())
    }

    async fn acquire_lock(
        &self,
        key: &str,
        expiry: Duration,
        wait: Duration,
        retry: Duration,
    ) -> CacheResult<Option<LockHandle>> {
        let deadline = Instant::now() + wait;
        loop {
            if Self::try_lease(&self.state, key, expiry) {
                let (tx, rx) = oneshot::channel();
                let state = self.state.clone();
                let lease_key = key.to_string();
                tokio::spawn(async move {
                    let _ = rx.await;
                    Self::lock(&state).leases.remove(&lease_key);
                });
                return Ok(Some(LockHandle::new(key.to_string(), tx)));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(retry.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
