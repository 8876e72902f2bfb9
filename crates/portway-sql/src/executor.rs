//! Execution seam between generated SQL and a concrete driver.
//!
//! The builder emits `@p`/`@param` markers; each executor rewrites them to
//! its driver's placeholders and binds the ordered parameter list. The
//! embedded implementation runs on SQLite, which also backs the engine's
//! tests; other backends implement the same trait.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Number, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo};
use tokio::time::timeout;

use crate::builder::{Dialect, SqlQuery, SqlValue};
use crate::error::{SqlError, SqlResult};
use crate::metadata::ColumnMetadata;

/// Driver-facing execution capability set.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run a SELECT and return rows keyed by result column name.
    async fn query_rows(&self, query: &SqlQuery) -> SqlResult<Vec<Map<String, Value>>>;

    /// Run a mutation and return the affected row count.
    async fn execute(&self, query: &SqlQuery) -> SqlResult<u64>;

    /// Catalog lookup for an object's columns.
    async fn column_metadata(&self, schema: &str, object: &str) -> SqlResult<Vec<ColumnMetadata>>;

    /// Dialect the builder should render for this executor.
    fn dialect(&self) -> Dialect;
}

/// Embedded executor over a pooled SQLite connection.
pub struct SqliteExecutor {
    pool: SqlitePool,
    command_timeout: Duration,
}

impl SqliteExecutor {
    /// Open (creating if needed) a SQLite database file.
    ///
    /// # Errors
    ///
    /// Returns [`SqlError::DbUnavailable`] when the pool cannot be built.
    pub async fn connect(path: &Path, command_timeout: Duration) -> SqlResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(|err| SqlError::DbUnavailable {
                operation: "sqlite.connect",
                detail: err.to_string(),
            })?;
        Ok(Self {
            pool,
            command_timeout,
        })
    }

    /// Wrap an existing pool (tests seed schemas through it).
    #[must_use]
    pub const fn from_pool(pool: SqlitePool, command_timeout: Duration) -> Self {
        Self {
            pool,
            command_timeout,
        }
    }

    fn rewrite_markers(text: &str) -> String {
        // Markers appear in parameter order; positional '?' placeholders
        // preserve that order.
        let pattern = Regex::new(r"@(?:param|p)\d+").unwrap_or_else(|err| {
            panic!("marker pattern must compile: {err}");
        });
        pattern.replace_all(text, "?").into_owned()
    }

    fn bind<'q>(
        statement: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
        params: &'q [SqlValue],
    ) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
        let mut bound = statement;
        for param in params {
            bound = match param {
                SqlValue::Text(text) => bound.bind(text),
                SqlValue::Int(value) => bound.bind(value),
                SqlValue::Float(value) => bound.bind(value),
                SqlValue::Bool(value) => bound.bind(value),
                SqlValue::Null => bound.bind(Option::<String>::None),
            };
        }
        bound
    }

    fn row_to_json(row: &SqliteRow) -> Map<String, Value> {
        let mut object = Map::new();
        for (index, column) in row.columns().iter().enumerate() {
            let value = match column.type_info().name().to_ascii_uppercase().as_str() {
                "INTEGER" => row
                    .try_get::<Option<i64>, _>(index)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::from),
                "REAL" => row
                    .try_get::<Option<f64>, _>(index)
                    .ok()
                    .flatten()
                    .and_then(Number::from_f64)
                    .map_or(Value::Null, Value::Number),
                "BLOB" => row
                    .try_get::<Option<Vec<u8>>, _>(index)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, |bytes| {
                        Value::String(format!("0x{}", hex_encode(&bytes)))
                    }),
                _ => row
                    .try_get::<Option<String>, _>(index)
                    .ok()
                    .flatten()
                    .map_or(Value::Null, Value::String),
            };
            object.insert(column.name().to_string(), value);
        }
        object
    }
}

#[async_trait]
impl SqlExecutor for SqliteExecutor {
    async fn query_rows(&self, query: &SqlQuery) -> SqlResult<Vec<Map<String, Value>>> {
        let text = Self::rewrite_markers(&query.text);
        let statement = Self::bind(sqlx::query(&text), &query.params);
        let rows = timeout(self.command_timeout, statement.fetch_all(&self.pool))
            .await
            .map_err(|_elapsed| SqlError::Timeout {
                operation: "sqlite.query",
            })?
            .map_err(map_query_err)?;
        Ok(rows.iter().map(Self::row_to_json).collect())
    }

    async fn execute(&self, query: &SqlQuery) -> SqlResult<u64> {
        let text = Self::rewrite_markers(&query.text);
        let statement = Self::bind(sqlx::query(&text), &query.params);
        let result = timeout(self.command_timeout, statement.execute(&self.pool))
            .await
            .map_err(|_elapsed| SqlError::Timeout {
                operation: "sqlite.execute",
            })?
            .map_err(map_execute_err)?;
        Ok(result.rows_affected())
    }

    async fn column_metadata(&self, _schema: &str, object: &str) -> SqlResult<Vec<ColumnMetadata>> {
        // SQLite has no schemas; `table_info` resolves by bare name.
        let pragma = format!("PRAGMA table_info(\"{}\")", object.replace('"', "\"\""));
        let rows = timeout(self.command_timeout, sqlx::query(&pragma).fetch_all(&self.pool))
            .await
            .map_err(|_elapsed| SqlError::Timeout {
                operation: "sqlite.metadata",
            })?
            .map_err(map_query_err)?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let name: String = row.try_get("name").ok()?;
                let sql_type: String = row.try_get("type").ok()?;
                let not_null: i64 = row.try_get("notnull").unwrap_or(0);
                Some(ColumnMetadata {
                    name,
                    sql_type,
                    is_nullable: not_null == 0,
                })
            })
            .collect())
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }
}

fn map_query_err(err: sqlx::Error) -> SqlError {
    match err {
        sqlx::Error::PoolTimedOut => SqlError::Timeout {
            operation: "sqlite.acquire",
        },
        other => SqlError::Database {
            operation: "sqlite.query",
            source: other,
        },
    }
}

/// Mutation-path errors: database-raised failures surface as row conflicts,
/// mirroring procedure RAISERROR semantics.
fn map_execute_err(err: sqlx::Error) -> SqlError {
    match err {
        sqlx::Error::Database(db_err) => SqlError::RowConflict {
            message: db_err.message().to_string(),
        },
        sqlx::Error::PoolTimedOut => SqlError::Timeout {
            operation: "sqlite.acquire",
        },
        other => SqlError::Database {
            operation: "sqlite.execute",
            source: other,
        },
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
