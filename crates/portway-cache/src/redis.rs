//! Redis-backed distributed cache provider.
//!
//! A single connection manager multiplexes every command and reconnects with
//! exponential backoff when the server drops. Locks use `SET NX PX` with a
//! fencing token; release deletes the key only while the token still matches.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Script};
use tokio::sync::oneshot;
use tokio::time::{Instant, sleep, timeout};
use tracing::warn;
use uuid::Uuid;

use crate::error::{CacheError, CacheResult};
use crate::provider::{CacheProvider, LockHandle};

const RELEASE_SCRIPT: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end";

/// Distributed provider over a Redis connection manager.
pub struct RedisCacheProvider {
    connection: ConnectionManager,
    op_timeout: Duration,
}

impl RedisCacheProvider {
    /// Connect to Redis and build the shared connection manager.
    ///
    /// # Errors
    ///
    /// Returns an error when the URL is invalid or the initial connection
    /// cannot be established.
    pub async fn connect(url: &str, op_timeout: Duration) -> CacheResult<Self> {
        let client = redis::Client::open(url).map_err(|err| CacheError::Unavailable {
            operation: "redis.open",
            detail: err.to_string(),
        })?;
        let config = ConnectionManagerConfig::new().set_number_of_retries(6);
        let connection = ConnectionManager::new_with_config(client, config)
            .await
            .map_err(|err| CacheError::Unavailable {
                operation: "redis.connect",
                detail: err.to_string(),
            })?;
        Ok(Self {
            connection,
            op_timeout,
        })
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = redis::RedisResult<T>> + Send,
    ) -> CacheResult<T> {
        match timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(CacheError::Unavailable {
                operation,
                detail: err.to_string(),
            }),
            Err(_elapsed) => Err(CacheError::Timeout { operation }),
        }
    }
}

#[async_trait]
impl CacheProvider for RedisCacheProvider {
    async fn get(&self, key: &str) -> CacheResult<Option<Bytes>> {
        let mut conn = self.connection.clone();
        let key = key.to_string();
        let value: Option<Vec<u8>> = self
            .bounded("redis.get", async move { conn.get(&key).await })
            .await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let key = key.to_string();
        let seconds = ttl.as_secs().max(1);
        self.bounded("redis.set", async move {
            conn.set_ex(&key, value.as_ref(), seconds).await
        })
        .await
    }

    async fn remove(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let key = key.to_string();
        self.bounded("redis.remove", async move { conn.del(&key).await })
            .await
    }

    async fn remove_by_prefix(&self, prefix: &str) -> CacheResult<()> {
        let mut scan_conn = self.connection.clone();
        let pattern = format!("{prefix}*");
        let keys: Vec<String> = self
            .bounded("redis.scan", async move {
                let mut keys = Vec::new();
                let mut iter = scan_conn.scan_match::<_, String>(&pattern).await?;
                while let Some(key) = iter.next_item().await {
                    keys.push(key);
                }
                Ok(keys)
            })
            .await?;

        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        self.bounded("redis.remove_by_prefix", async move {
            conn.del(&keys).await
        })
        .await
    }

    async fn acquire_lock(
        &self,
        key: &str,
        expiry: Duration,
        wait: Duration,
        retry: Duration,
    ) -> CacheResult<Option<LockHandle>> {
        let token = Uuid::new_v4().to_string();
        let expiry_ms = u64::try_from(expiry.as_millis()).unwrap_or(u64::MAX).max(1);
        let deadline = Instant::now() + wait;

        loop {
            let mut conn = self.connection.clone();
            let lock_key = key.to_string();
            let lock_token = token.clone();
            let acquired: Option<String> = self
                .bounded("redis.lock", async move {
                    redis::cmd("SET")
                        .arg(&lock_key)
                        .arg(&lock_token)
                        .arg("NX")
                        .arg("PX")
                        .arg(expiry_ms)
                        .query_async(&mut conn)
                        .await
                })
                .await?;

            if acquired.is_some() {
                let (tx, rx) = oneshot::channel();
                let mut release_conn = self.connection.clone();
                let release_key = key.to_string();
                let release_token = token;
                tokio::spawn(async move {
                    let _ = rx.await;
                    let script = Script::new(RELEASE_SCRIPT);
                    let result: redis::RedisResult<i32> = script
                        .key(&release_key)
                        .arg(&release_token)
                        .invoke_async(&mut release_conn)
                        .await;
                    if let Err(err) = result {
                        warn!(key = %release_key, error = %err, "failed to release distributed lock");
                    }
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
        "redis"
    }
}
