//! Token store over the embedded `auth.db` database.
//!
//! The gateway is a reader: tokens are created and rotated by the external
//! administration tool. Creation helpers here exist for operator seeding and
//! tests. Verification walks the active rows, deriving PBKDF2 material on a
//! blocking worker so the async executor never stalls; a dropped request
//! future stops the walk between candidates.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, Row};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::{AuthError, AuthResult};
use crate::hashing;
use crate::scopes::ScopeSet;

/// Raw projection of the `Tokens` table.
#[derive(Debug, Clone, FromRow)]
pub struct TokenRow {
    /// Monotonic token identifier.
    #[sqlx(rename = "Id")]
    pub id: i64,
    /// Owning username.
    #[sqlx(rename = "Username")]
    pub username: String,
    /// Base64 PBKDF2 hash.
    #[sqlx(rename = "TokenHash")]
    pub token_hash: String,
    /// Base64 salt.
    #[sqlx(rename = "TokenSalt")]
    pub token_salt: String,
    /// Creation timestamp.
    #[sqlx(rename = "CreatedAt")]
    pub created_at: DateTime<Utc>,
    /// Revocation timestamp, when revoked.
    #[sqlx(rename = "RevokedAt")]
    pub revoked_at: Option<DateTime<Utc>>,
    /// Expiry timestamp, when bounded.
    #[sqlx(rename = "ExpiresAt")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Comma-separated endpoint scope patterns.
    #[sqlx(rename = "AllowedScopes")]
    pub allowed_scopes: String,
    /// Comma-separated environment patterns.
    #[sqlx(rename = "AllowedEnvironments")]
    pub allowed_environments: String,
}

impl TokenRow {
    /// Whether the token is active at the given instant.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.is_none_or(|expires| expires > now)
    }
}

/// Resolved identity attached to an authenticated request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Token row identifier.
    pub token_id: i64,
    /// Owning username.
    pub username: String,
    /// Endpoint scope grants.
    pub scopes: ScopeSet,
    /// Environment grants.
    pub environments: ScopeSet,
}

/// Reader-side token store backed by SQLite.
#[derive(Clone)]
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    /// Open (creating if needed) the token database and ensure the schema.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be opened or the schema
    /// statements fail.
    pub async fn connect(path: &Path) -> AuthResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(map_err("auth.connect"))?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Access the underlying pool (audit writer shares it).
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Verify a presented bearer token against the active rows.
    ///
    /// Each candidate comparison runs a full PBKDF2 derivation on a blocking
    /// worker; the loop suspends between candidates so a cancelled request
    /// stops burning CPU.
    ///
    /// # Errors
    ///
    /// Returns an error when the database read or a hashing task fails.
    pub async fn authenticate(&self, presented: &str) -> AuthResult<Option<AuthContext>> {
        let now = Utc::now();
        let rows = self.active_tokens(now).await?;

        for row in rows {
            let Some(salt) = hashing::decode(&row.token_salt) else {
                warn!(token_id = row.id, "stored salt is not valid base64");
                continue;
            };
            let Some(expected) = hashing::decode(&row.token_hash) else {
                warn!(token_id = row.id, "stored hash is not valid base64");
                continue;
            };

            let candidate = presented.to_string();
            let matched =
                tokio::task::spawn_blocking(move || hashing::verify(&candidate, &salt, &expected))
                    .await
                    .map_err(|_err| AuthError::HashTaskFailed)?;

            if matched {
                return Ok(Some(AuthContext {
                    token_id: row.id,
                    username: row.username.clone(),
                    scopes: ScopeSet::parse(&row.allowed_scopes),
                    environments: ScopeSet::parse(&row.allowed_environments),
                }));
            }
        }
        Ok(None)
    }

    /// Active token rows at the given instant.
    ///
    /// # Errors
    ///
    /// Returns an error when the database read fails.
    pub async fn active_tokens(&self, now: DateTime<Utc>) -> AuthResult<Vec<TokenRow>> {
        let rows = sqlx::query_as::<_, TokenRow>(
            "SELECT Id, Username, TokenHash, TokenSalt, CreatedAt, RevokedAt, ExpiresAt, \
             AllowedScopes, AllowedEnvironments FROM Tokens WHERE RevokedAt IS NULL",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_err("auth.active_tokens"))?;
        Ok(rows.into_iter().filter(|row| row.is_active(now)).collect())
    }

    /// Create a token row and return `(id, plaintext)`.
    ///
    /// Used by operator seeding and tests; the administration tool writes the
    /// same shape.
    ///
    /// # Errors
    ///
    /// Returns an error when the insert fails.
    pub async fn create_token(
        &self,
        username: &str,
        scopes: &str,
        environments: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> AuthResult<(i64, String)> {
        let plaintext = generate_token();
        let salt = hashing::generate_salt();
        let hash = hashing::derive(&plaintext, &salt);

        let result = sqlx::query(
            "INSERT INTO Tokens (Username, TokenHash, TokenSalt, CreatedAt, ExpiresAt, \
             AllowedScopes, AllowedEnvironments) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(username)
        .bind(hashing::encode(&hash))
        .bind(hashing::encode(&salt))
        .bind(Utc::now())
        .bind(expires_at)
        .bind(scopes)
        .bind(environments)
        .execute(&self.pool)
        .await
        .map_err(map_err("auth.create_token"))?;

        Ok((result.last_insert_rowid(), plaintext))
    }

    /// Mark a token revoked.
    ///
    /// # Errors
    ///
    /// Returns an error when the update fails.
    pub async fn revoke_token(&self, token_id: i64) -> AuthResult<()> {
        sqlx::query("UPDATE Tokens SET RevokedAt = ? WHERE Id = ? AND RevokedAt IS NULL")
            .bind(Utc::now())
            .bind(token_id)
            .execute(&self.pool)
            .await
            .map_err(map_err("auth.revoke_token"))?;
        Ok(())
    }

    /// Number of token rows, for readiness reporting.
    ///
    /// # Errors
    ///
    /// Returns an error when the database read fails.
    pub async fn token_count(&self) -> AuthResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS Count FROM Tokens")
            .fetch_one(&self.pool)
            .await
            .map_err(map_err("auth.token_count"))?;
        row.try_get("Count").map_err(map_err("auth.token_count"))
    }

    async fn ensure_schema(&self) -> AuthResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(map_err("auth.ensure_schema"))?;
        }
        Ok(())
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS Tokens (\
        Id INTEGER PRIMARY KEY AUTOINCREMENT,\
        Username TEXT NOT NULL,\
        TokenHash TEXT NOT NULL,\
        TokenSalt TEXT NOT NULL,\
        CreatedAt TEXT NOT NULL,\
        RevokedAt TEXT NULL,\
        ExpiresAt TEXT NULL,\
        AllowedScopes TEXT NOT NULL DEFAULT '*',\
        AllowedEnvironments TEXT NOT NULL DEFAULT '*')",
    "CREATE INDEX IF NOT EXISTS IX_Tokens_Username ON Tokens(Username)",
    "CREATE INDEX IF NOT EXISTS IX_Tokens_CreatedAt ON Tokens(CreatedAt)",
    "CREATE TABLE IF NOT EXISTS TokenAudits (\
        Id INTEGER PRIMARY KEY AUTOINCREMENT,\
        TokenId INTEGER NULL,\
        Username TEXT NOT NULL,\
        Operation TEXT NOT NULL,\
        OldTokenHash TEXT NULL,\
        NewTokenHash TEXT NULL,\
        Timestamp TEXT NOT NULL,\
        DetailsJson TEXT NOT NULL DEFAULT '{}',\
        Source TEXT NOT NULL,\
        IpAddress TEXT NULL,\
        UserAgent TEXT NULL)",
    "CREATE INDEX IF NOT EXISTS IX_TokenAudits_Operation_Timestamp_TokenId \
     ON TokenAudits(Operation, Timestamp, TokenId)",
];

fn generate_token() -> String {
    use base64::Engine;
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn map_err(operation: &'static str) -> impl FnOnce(sqlx::Error) -> AuthError {
    move |source| AuthError::Database { operation, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(dir: &TempDir) -> TokenStore {
        TokenStore::connect(&dir.path().join("auth.db"))
            .await
            .expect("token store")
    }

    #[tokio::test]
    async fn created_token_authenticates() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir).await;
        let (id, plaintext) = store
            .create_token("alice", "Products,Order*", "prod", None)
            .await
            .expect("create");

        let context = store
            .authenticate(&plaintext)
            .await
            .expect("authenticate")
            .expect("match");
        assert_eq!(context.token_id, id);
        assert_eq!(context.username, "alice");
        assert!(context.scopes.matches("Products"));
        assert!(context.scopes.matches("OrderLines"));
        assert!(!context.scopes.matches("Invoices"));
        assert!(context.environments.matches("PROD"));
    }

    #[tokio::test]
    async fn wrong_token_does_not_authenticate() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir).await;
        store
            .create_token("alice", "*", "*", None)
            .await
            .expect("create");

        let context = store
            .authenticate("not-the-token")
            .await
            .expect("authenticate");
        assert!(context.is_none());
    }

    #[tokio::test]
    async fn revoked_and_expired_tokens_are_inactive() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir).await;
        let (revoked_id, revoked_token) = store
            .create_token("alice", "*", "*", None)
            .await
            .expect("create");
        store.revoke_token(revoked_id).await.expect("revoke");

        let (_, expired_token) = store
            .create_token(
                "bob",
                "*",
                "*",
                Some(Utc::now() - chrono::Duration::hours(1)),
            )
            .await
            .expect("create expired");

        assert!(store.authenticate(&revoked_token).await.expect("auth").is_none());
        assert!(store.authenticate(&expired_token).await.expect("auth").is_none());
    }

    #[tokio::test]
    async fn future_expiry_still_authenticates() {
        let dir = TempDir::new().expect("tempdir");
        let store = store(&dir).await;
        let (_, token) = store
            .create_token(
                "carol",
                "*",
                "*",
                Some(Utc::now() + chrono::Duration::hours(1)),
            )
            .await
            .expect("create");
        assert!(store.authenticate(&token).await.expect("auth").is_some());
    }
}
