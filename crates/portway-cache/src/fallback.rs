//! Failover composite: distributed primary, memory fallback.
//!
//! Every operation tries the primary first. A failure routes the call to the
//! in-process fallback and flags the provider degraded; the next successful
//! primary call clears the flag. Cache failures are absorbed here — callers
//! above never see a backend outage as a request failure.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::warn;

use crate::error::CacheResult;
use crate::provider::{CacheProvider, LockHandle};

/// Primary-plus-fallback composite provider.
pub struct FailoverCacheProvider {
    primary: Arc<dyn CacheProvider>,
    fallback: Arc<dyn CacheProvider>,
    degraded: AtomicBool,
}

impl FailoverCacheProvider {
    /// Compose a primary backend with an always-available fallback.
    #[must_use]
    pub const fn new(primary: Arc<dyn CacheProvider>, fallback: Arc<dyn CacheProvider>) -> Self {
        Self {
            primary,
            fallback,
            degraded: AtomicBool::new(false),
        }
    }

    /// Whether the primary backend is currently failing over.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    fn note_primary_result<T>(&self, operation: &'static str, result: &CacheResult<T>) {
        match result {
            Ok(_) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    warn!(
                        backend = self.primary.name(),
                        "primary cache backend recovered"
                    );
                }
            }
            Err(err) => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    warn!(
                        backend = self.primary.name(),
                        operation,
                        error = %err,
                        "primary cache backend failed; using fallback"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl CacheProvider for FailoverCacheProvider {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let result = self.primary.get(key).await;
        self.note_primary_result("get", &result);
        match result {
            Ok(value) => Ok(value),
            Err(_err) => self.fallback.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()> {
        let result = self.primary.set(key, value.clone(), ttl).await;
        self.note_primary_result("set", &result);
        match result {
            Ok(()) => Ok(()),
            Err(_err) => self.fallback.set(key, value, ttl).await,
        }
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        let result = self.primary.remove(key).await;
        self.note_primary_result("remove", &result);
        // Remove from both so a recovered primary cannot resurrect the key
        // while the fallback still held it.
        let _ = self.fallback.remove(key).await;
        match result {
            Ok(()) => Ok(()),
            Err(_err) => Ok(()),
        }
    }

    async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<()> {
        let result = self.primary.remove_by_prefix(prefix).await;
        self.note_primary_result("remove_by_prefix", &result);
        let _ = self.fallback.remove_by_prefix(prefix).await;
        match result {
            Ok(()) => Ok(()),
            Err(_err) => Ok(()),
        }
    }

    async fn acquire_lock(
        &self,
        key: &str,
        expiry: Duration,
        wait: Duration,
        retry: Duration,
    ) -> CacheResult<Option<LockHandle>> {
        let result = self.primary.acquire_lock(key, expiry, wait, retry).await;
        self.note_primary_result("acquire_lock", &result);
        match result {
            Ok(handle) => Ok(handle),
            Err(_err) => self.fallback.acquire_lock(key, expiry, wait, retry).await,
        }
    }

    fn name(&self) -> &'static str {
        "failover"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::memory::MemoryCacheProvider;
    use std::sync::atomic::AtomicUsize;

    /// Primary that fails its first `failures` calls, then heals.
    struct FlakyProvider {
        inner: MemoryCacheProvider,
        failures: AtomicUsize,
    }

    impl FlakyProvider {
        fn new(failures: usize) -> Self {
            Self {
                inner: MemoryCacheProvider::new(16),
                failures: AtomicUsize::new(failures),
            }
        }

        fn check(&self, operation: &'static str) -> CacheResult<()> {
            let remaining = self.failures.load(Ordering::Relaxed);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::Relaxed);
                return Err(CacheError::Unavailable {
                    operation,
                    detail: "connection refused".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CacheProvider for FlakyProvider {
        async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
            self.check("get")?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()> {
            self.check("set")?;
            self.inner.set(key, value, ttl).await
        }

        async fn remove(&self, key: &str) -> CacheResult<()> {
            self.check("remove")?;
            self.inner.remove(key).await
        }

        async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<()> {
            self.check("remove_by_prefix")?;
            self.inner.remove_by_prefix(prefix).await
        }

        async fn acquire_lock(
            &self,
            key: &str,
            expiry: Duration,
            wait: Duration,
            retry: Duration,
        ) -> CacheResult<Option<LockHandle>> {
            self.check("acquire_lock")?;
            self.inner.acquire_lock(key, expiry, wait, retry).await
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn outage_routes_to_fallback_without_error() {
        let primary = Arc::new(FlakyProvider::new(2));
        let fallback = Arc::new(MemoryCacheProvider::new(16));
        let composite = FailoverCacheProvider::new(primary, fallback.clone());

        composite
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .expect("set during outage");
        assert!(composite.is_degraded());
        assert_eq!(
            composite.get("k").await.expect("get during outage"),
            Some(Bytes::from_static(b"v"))
        );
    }

    #[tokio::test]
    async fn recovery_clears_the_degraded_flag() {
        let primary = Arc::new(FlakyProvider::new(1));
        let fallback = Arc::new(MemoryCacheProvider::new(16));
        let composite = FailoverCacheProvider::new(primary, fallback);

        composite
            .set("k", Bytes::from_static(b"v"), Duration::from_secs(60))
            .await
            .expect("failover set");
        assert!(composite.is_degraded());

        composite
            .set("k", Bytes::from_static(b"v2"), Duration::from_secs(60))
            .await
            .expect("healed set");
        assert!(!composite.is_degraded());
        assert_eq!(
            composite.get("k").await.expect("healed get"),
            Some(Bytes::from_static(b"v2"))
        );
    }
}
