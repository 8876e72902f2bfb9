//! Append-only authentication audit log.
//!
//! Rows are written by a background task fed through an unbounded channel so
//! audit persistence can never block or fail a response; a write failure is
//! logged and dropped.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use sqlx::sqlite::SqlitePool;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{AuthError, AuthResult};

/// Operations recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOperation {
    /// Token created.
    Created,
    /// Token revoked.
    Revoked,
    /// Token rotated.
    Rotated,
    /// Scope grants updated.
    ScopesUpdated,
    /// Environment grants updated.
    EnvironmentsUpdated,
    /// Expiry updated.
    ExpirationUpdated,
    /// Bearer token missing or unmatched.
    FailedAuth,
    /// Token valid but scope or environment denied.
    AuthorizationFailed,
}

impl AuditOperation {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Revoked => "Revoked",
            Self::Rotated => "Rotated",
            Self::ScopesUpdated => "ScopesUpdated",
            Self::EnvironmentsUpdated => "EnvironmentsUpdated",
            Self::ExpirationUpdated => "ExpirationUpdated",
            Self::FailedAuth => "FailedAuth",
            Self::AuthorizationFailed => "AuthorizationFailed",
        }
    }
}

/// One audit record queued for persistence.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    /// Token the record concerns, when resolved.
    pub token_id: Option<i64>,
    /// Username, or a placeholder for unmatched tokens.
    pub username: String,
    /// Recorded operation.
    pub operation: AuditOperation,
    /// Previous hash, for rotation records.
    pub old_hash: Option<String>,
    /// New hash, for rotation records.
    pub new_hash: Option<String>,
    /// Capture instant.
    pub timestamp: DateTime<Utc>,
    /// Structured payload (denied resource, available grants, …).
    pub details: Value,
    /// Subsystem that produced the record.
    pub source: String,
    /// Client address, when known.
    pub ip_address: Option<String>,
    /// Client user agent, when known.
    pub user_agent: Option<String>,
}

impl AuditRecord {
    /// Record stamped now from the gateway's auth filter.
    #[must_use]
    pub fn now(username: impl Into<String>, operation: AuditOperation, details: Value) -> Self {
        Self {
            token_id: None,
            username: username.into(),
            operation,
            old_hash: None,
            new_hash: None,
            timestamp: Utc::now(),
            details,
            source: "gateway".to_string(),
            ip_address: None,
            user_agent: None,
        }
    }

    /// Attach the resolved token id.
    #[must_use]
    pub const fn with_token_id(mut self, token_id: i64) -> Self {
        self.token_id = Some(token_id);
        self
    }

    /// Attach client metadata.
    #[must_use]
    pub fn with_client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip;
        self.user_agent = user_agent;
        self
    }
}

/// Raw projection of the `TokenAudits` table.
#[derive(Debug, Clone, FromRow)]
pub struct AuditRow {
    /// Row identifier.
    #[sqlx(rename = "Id")]
    pub id: i64,
    /// Token the row concerns.
    #[sqlx(rename = "TokenId")]
    pub token_id: Option<i64>,
    /// Username.
    #[sqlx(rename = "Username")]
    pub username: String,
    /// Operation name.
    #[sqlx(rename = "Operation")]
    pub operation: String,
    /// Capture instant.
    #[sqlx(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    /// Structured payload as stored.
    #[sqlx(rename = "DetailsJson")]
    pub details_json: String,
    /// Producing subsystem.
    #[sqlx(rename = "Source")]
    pub source: String,
    /// Client address.
    #[sqlx(rename = "IpAddress")]
    pub ip_address: Option<String>,
}

/// Handle for queueing audit records.
#[derive(Clone)]
pub struct AuditWriter {
    tx: mpsc::UnboundedSender<AuditRecord>,
}

impl AuditWriter {
    /// Spawn the background persistence task over the shared pool.
    #[must_use]
    pub fn spawn(pool: SqlitePool) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<AuditRecord>();
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(err) = insert(&pool, &record).await {
                    warn!(
                        error = %err,
                        operation = record.operation.as_str(),
                        "failed to persist audit record; dropping"
                    );
                }
            }
        });
        Self { tx }
    }

    /// Queue a record. Never blocks; a closed channel logs and drops.
    pub fn record(&self, record: AuditRecord) {
        if self.tx.send(record).is_err() {
            warn!("audit channel closed; record dropped");
        }
    }
}

async fn insert(pool: &SqlitePool, record: &AuditRecord) -> AuthResult<()> {
    sqlx::query(
        "INSERT INTO TokenAudits (TokenId, Username, Operation, OldTokenHash, NewTokenHash, \
         Timestamp, DetailsJson, Source, IpAddress, UserAgent) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.token_id)
    .bind(&record.username)
    .bind(record.operation.as_str())
    .bind(&record.old_hash)
    .bind(&record.new_hash)
    .bind(record.timestamp)
    .bind(record.details.to_string())
    .bind(&record.source)
    .bind(&record.ip_address)
    .bind(&record.user_agent)
    .execute(pool)
    .await
    .map_err(|source| AuthError::Database {
        operation: "audit.insert",
        source,
    })?;
    Ok(())
}

/// Most recent audit rows, newest first.
///
/// # Errors
///
/// Returns an error when the database read fails.
pub async fn recent(pool: &SqlitePool, limit: i64) -> AuthResult<Vec<AuditRow>> {
    sqlx::query_as::<_, AuditRow>(
        "SELECT Id, TokenId, Username, Operation, Timestamp, DetailsJson, Source, IpAddress \
         FROM TokenAudits ORDER BY Id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|source| AuthError::Database {
        operation: "audit.recent",
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TokenStore;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn records_persist_in_order() {
        let dir = TempDir::new().expect("tempdir");
        let store = TokenStore::connect(&dir.path().join("auth.db"))
            .await
            .expect("store");
        let writer = AuditWriter::spawn(store.pool().clone());

        writer.record(AuditRecord::now(
            "alice",
            AuditOperation::FailedAuth,
            json!({"Reason": "unmatched token"}),
        ));
        writer.record(
            AuditRecord::now(
                "alice",
                AuditOperation::AuthorizationFailed,
                json!({"ResourceType": "Endpoint", "ResourceName": "Orders"}),
            )
            .with_token_id(7),
        );

        // The writer drains asynchronously.
        let mut rows = Vec::new();
        for _ in 0..50 {
            rows = recent(store.pool(), 10).await.expect("rows");
            if rows.len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].operation, "AuthorizationFailed");
        assert_eq!(rows[0].token_id, Some(7));
        assert!(rows[0].details_json.contains("Orders"));
        assert_eq!(rows[1].operation, "FailedAuth");
        assert!(rows[0].timestamp >= rows[1].timestamp);
    }
}
