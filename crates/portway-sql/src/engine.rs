//! SQL endpoint execution: queries, mutations, webhook persistence.

use std::collections::HashMap;
use std::sync::Arc;

use portway_config::{SqlEndpoint, SqlObjectType, WebhookEndpoint};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::builder::{
    build_procedure_call, build_select, build_tvf_select, build_webhook_insert, bind_tvf_arguments,
};
use crate::error::{SqlError, SqlResult};
use crate::executor::SqlExecutor;
use crate::metadata::MetadataCache;
use crate::options::QueryOptions;

/// Standard response envelope for SQL reads.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    /// Number of rows in this page.
    #[serde(rename = "Count")]
    pub count: usize,
    /// Rows keyed by caller-facing alias.
    #[serde(rename = "Value")]
    pub value: Vec<Map<String, Value>>,
    /// Link to the next page, present when the page filled up.
    #[serde(rename = "NextLink", skip_serializing_if = "Option::is_none")]
    pub next_link: Option<String>,
}

/// Translates requests into SQL and shapes the results.
pub struct SqlEngine {
    metadata: Arc<MetadataCache>,
    default_top: u64,
}

impl SqlEngine {
    /// Engine with the given `$top` cap.
    #[must_use]
    pub fn new(metadata: Arc<MetadataCache>, default_top: u64) -> Self {
        Self {
            metadata,
            default_top,
        }
    }

    /// The `$top` cap applied when callers send none.
    #[must_use]
    pub const fn default_top(&self) -> u64 {
        self.default_top
    }

    /// Shared metadata cache (the invalidator subscribes through it).
    #[must_use]
    pub fn metadata(&self) -> Arc<MetadataCache> {
        Arc::clone(&self.metadata)
    }

    /// Execute a GET against a table or view endpoint.
    ///
    /// `link_base` is the public path used for `NextLink`
    /// (`/api/{env}/{endpoint}`).
    ///
    /// # Errors
    ///
    /// Surfaces query-translation errors and executor failures.
    pub async fn query(
        &self,
        executor: &dyn SqlExecutor,
        environment: &str,
        endpoint_name: &str,
        endpoint: &SqlEndpoint,
        options: &QueryOptions,
        link_base: &str,
    ) -> SqlResult<QueryResponse> {
        let metadata = self
            .metadata
            .get_or_load(
                environment,
                endpoint_name,
                &endpoint.schema,
                &endpoint.object_name,
                executor,
            )
            .await?;

        let query = build_select(endpoint, options, Some(&metadata), executor.dialect())?;
        debug!(endpoint = endpoint_name, sql = %query.text, "executing query");
        let rows = executor.query_rows(&query).await?;
        Ok(page_response(rows, options, link_base))
    }

    /// Execute a GET against a table-valued function endpoint.
    ///
    /// # Errors
    ///
    /// Surfaces parameter-binding errors, translation errors, and executor
    /// failures.
    #[allow(clippy::too_many_arguments)]
    pub async fn query_function(
        &self,
        executor: &dyn SqlExecutor,
        endpoint_name: &str,
        endpoint: &SqlEndpoint,
        path_segments: &[String],
        query_parameters: &HashMap<String, String>,
        headers: &HashMap<String, String>,
        options: &QueryOptions,
        link_base: &str,
    ) -> SqlResult<QueryResponse> {
        let arguments = bind_tvf_arguments(
            &endpoint.tvf_parameters,
            path_segments,
            query_parameters,
            headers,
        )?;
        let query = build_tvf_select(endpoint, arguments, options, executor.dialect())?;
        debug!(endpoint = endpoint_name, sql = %query.text, "executing function query");
        let rows = executor.query_rows(&query).await?;

        let projected = if endpoint.columns.is_empty() {
            rows
        } else {
            rows.into_iter()
                .map(|row| project_row(row, endpoint))
                .collect()
        };
        Ok(page_response(projected, options, link_base))
    }

    /// Route a mutation to the endpoint's stored procedure.
    ///
    /// # Errors
    ///
    /// Returns [`SqlError::EndpointMisconfigured`] for non-procedure
    /// endpoints and surfaces executor failures, including row conflicts.
    pub async fn mutate(
        &self,
        executor: &dyn SqlExecutor,
        endpoint_name: &str,
        endpoint: &SqlEndpoint,
        method: &str,
        body: &Value,
        url_key: Option<&str>,
    ) -> SqlResult<Value> {
        if endpoint.object_type != SqlObjectType::StoredProcedure
            && endpoint.procedure.is_none()
        {
            return Err(SqlError::EndpointMisconfigured {
                reason: "endpoint does not accept mutations",
            });
        }

        let empty = Map::new();
        let payload = body.as_object().unwrap_or(&empty);
        let query =
            build_procedure_call(endpoint, method, payload, url_key, executor.dialect())?;
        debug!(endpoint = endpoint_name, sql = %query.text, "executing procedure");
        let affected = executor.execute(&query).await?;
        Ok(json!({ "RowsAffected": affected }))
    }

    /// Persist a webhook payload into its configured table.
    ///
    /// # Errors
    ///
    /// Returns [`SqlError::InvalidField`] when nothing in the payload maps to
    /// an allowed column, and surfaces executor failures.
    pub async fn persist_webhook(
        &self,
        executor: &dyn SqlExecutor,
        endpoint_name: &str,
        webhook: &WebhookEndpoint,
        payload: &Value,
    ) -> SqlResult<Value> {
        let empty = Map::new();
        let fields = payload.as_object().unwrap_or(&empty);
        let query = build_webhook_insert(webhook, fields, executor.dialect())?;
        debug!(endpoint = endpoint_name, sql = %query.text, "persisting webhook payload");
        let affected = executor.execute(&query).await?;
        Ok(json!({ "RowsAffected": affected }))
    }
}

fn page_response(
    rows: Vec<Map<String, Value>>,
    options: &QueryOptions,
    link_base: &str,
) -> QueryResponse {
    let count = rows.len();
    let next_link = (count as u64 == options.top).then(|| {
        format!(
            "{link_base}?$top={}&$skip={}",
            options.top,
            options.skip + options.top
        )
    });
    QueryResponse {
        count,
        value: rows,
        next_link,
    }
}

/// Project a db-keyed row onto the endpoint's aliases, dropping anything
/// outside the exposed column set.
fn project_row(row: Map<String, Value>, endpoint: &SqlEndpoint) -> Map<String, Value> {
    let mut projected = Map::new();
    for (key, value) in row {
        if let Some(alias) = endpoint.columns.alias_for_db(&key) {
            projected.insert(alias.to_string(), value);
        }
    }
    projected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{Dialect, SqlQuery, SqlValue};
    use crate::executor::SqliteExecutor;
    use crate::metadata::ColumnMetadata;
    use async_trait::async_trait;
    use portway_config::ColumnMapping;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Mutex;
    use std::time::Duration;

    fn products_endpoint() -> SqlEndpoint {
        SqlEndpoint {
            schema: "main".to_string(),
            object_name: "Items".to_string(),
            object_type: SqlObjectType::Table,
            primary_key: Some("ItemCode".to_string()),
            columns: ColumnMapping::parse(&[
                "ItemCode;ProductNumber".to_string(),
                "LongDescription;Description".to_string(),
                "Assortment;AssortmentCode".to_string(),
            ])
            .expect("mapping"),
            procedure: None,
            tvf_parameters: Vec::new(),
        }
    }

    async fn seeded_executor() -> SqliteExecutor {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("pool");
        sqlx::query(
            "CREATE TABLE Items (ItemCode TEXT PRIMARY KEY, LongDescription TEXT, Assortment TEXT)",
        )
        .execute(&pool)
        .await
        .expect("create");
        for (code, description, assortment) in [
            ("A", "First book", "Books"),
            ("B", "Second book", "Books"),
            ("C", "A lamp", "Lighting"),
        ] {
            sqlx::query("INSERT INTO Items VALUES (?, ?, ?)")
                .bind(code)
                .bind(description)
                .bind(assortment)
                .execute(&pool)
                .await
                .expect("insert");
        }
        SqliteExecutor::from_pool(pool, Duration::from_secs(5))
    }

    fn engine() -> SqlEngine {
        SqlEngine::new(Arc::new(MetadataCache::new()), 1_000)
    }

    #[tokio::test]
    async fn query_returns_alias_keyed_rows_and_next_link() {
        let executor = seeded_executor().await;
        let options = QueryOptions::parse(
            [
                ("$select", "ProductNumber,Description"),
                ("$filter", "AssortmentCode eq 'Books'"),
                ("$top", "2"),
            ],
            1_000,
        )
        .expect("options");

        let response = engine()
            .query(
                &executor,
                "prod",
                "Products",
                &products_endpoint(),
                &options,
                "/api/prod/Products",
            )
            .await
            .expect("response");

        assert_eq!(response.count, 2);
        for row in &response.value {
            assert!(row.contains_key("ProductNumber"));
            assert!(row.contains_key("Description"));
            assert!(!row.contains_key("ItemCode"));
        }
        assert_eq!(
            response.next_link.as_deref(),
            Some("/api/prod/Products?$top=2&$skip=2")
        );
    }

    #[tokio::test]
    async fn partial_page_has_no_next_link() {
        let executor = seeded_executor().await;
        let options = QueryOptions::parse(
            [("$filter", "AssortmentCode eq 'Lighting'"), ("$top", "10")],
            1_000,
        )
        .expect("options");

        let response = engine()
            .query(
                &executor,
                "prod",
                "Products",
                &products_endpoint(),
                &options,
                "/api/prod/Products",
            )
            .await
            .expect("response");
        assert_eq!(response.count, 1);
        assert!(response.next_link.is_none());
    }

    #[tokio::test]
    async fn unknown_filter_field_is_rejected_before_execution() {
        let executor = seeded_executor().await;
        let options =
            QueryOptions::parse([("$filter", "ItemCode eq 'A'")], 1_000).expect("options");
        let err = engine()
            .query(
                &executor,
                "prod",
                "Products",
                &products_endpoint(),
                &options,
                "/api/prod/Products",
            )
            .await
            .expect_err("raw db name");
        assert!(matches!(err, SqlError::InvalidField { .. }));
    }

    /// Records the generated query and returns canned db-keyed rows.
    struct RecordingExecutor {
        rows: Vec<Map<String, Value>>,
        seen: Mutex<Vec<SqlQuery>>,
    }

    #[async_trait]
    impl SqlExecutor for RecordingExecutor {
        async fn query_rows(&self, query: &SqlQuery) -> SqlResult<Vec<Map<String, Value>>> {
            self.seen
                .lock()
                .unwrap_or_else(|err| panic!("lock: {err}"))
                .push(query.clone());
            Ok(self.rows.clone())
        }

        async fn execute(&self, query: &SqlQuery) -> SqlResult<u64> {
            self.seen
                .lock()
                .unwrap_or_else(|err| panic!("lock: {err}"))
                .push(query.clone());
            Ok(1)
        }

        async fn column_metadata(
            &self,
            _schema: &str,
            _object: &str,
        ) -> SqlResult<Vec<ColumnMetadata>> {
            Ok(Vec::new())
        }

        fn dialect(&self) -> Dialect {
            Dialect::SqlServer
        }
    }

    #[tokio::test]
    async fn function_rows_project_to_aliases() {
        let mut row = Map::new();
        row.insert("EmployeeName".to_string(), Value::from("Jo"));
        row.insert("InternalFlag".to_string(), Value::from(1));
        let executor = RecordingExecutor {
            rows: vec![row],
            seen: Mutex::new(Vec::new()),
        };

        let endpoint = SqlEndpoint {
            schema: "dbo".to_string(),
            object_name: "EmployeeReport".to_string(),
            object_type: SqlObjectType::TableValuedFunction,
            primary_key: None,
            columns: ColumnMapping::parse(&["EmployeeName;Name".to_string()]).expect("mapping"),
            procedure: None,
            tvf_parameters: vec![portway_config::TvfParameter {
                name: "CustomerId".to_string(),
                sql_type: "int".to_string(),
                source: portway_config::ParameterSource::Path,
                position: Some(1),
                required: true,
                default_value: None,
            }],
        };

        let response = engine()
            .query_function(
                &executor,
                "EmployeeReport",
                &endpoint,
                &["12345".to_string()],
                &HashMap::new(),
                &HashMap::new(),
                &QueryOptions::parse([], 1_000).expect("options"),
                "/api/prod/EmployeeReport",
            )
            .await
            .expect("response");

        assert_eq!(response.value[0]["Name"], Value::from("Jo"));
        assert!(!response.value[0].contains_key("InternalFlag"));

        let seen = executor
            .seen
            .lock()
            .unwrap_or_else(|err| panic!("lock: {err}"));
        assert_eq!(
            seen[0].text,
            "SELECT * FROM [dbo].[EmployeeReport](@param0)"
        );
        assert_eq!(seen[0].params, vec![SqlValue::Int(12_345)]);
    }

    #[tokio::test]
    async fn mutation_requires_a_procedure() {
        let executor = seeded_executor().await;
        let err = engine()
            .mutate(
                &executor,
                "Products",
                &products_endpoint(),
                "POST",
                &json!({"ProductNumber": "Z"}),
                None,
            )
            .await
            .expect_err("no procedure");
        assert!(matches!(err, SqlError::EndpointMisconfigured { .. }));
    }

    #[tokio::test]
    async fn webhook_payload_persists_through_the_insert_builder() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .expect("pool");
        sqlx::query("CREATE TABLE WebhookEvents (EventType TEXT, Payload TEXT)")
            .execute(&pool)
            .await
            .expect("create");
        let executor = SqliteExecutor::from_pool(pool, Duration::from_secs(5));

        let webhook = WebhookEndpoint {
            object_name: "WebhookEvents".to_string(),
            schema: "main".to_string(),
            columns: ColumnMapping::parse(&["EventType".to_string(), "Payload".to_string()])
                .expect("mapping"),
        };
        let result = engine()
            .persist_webhook(
                &executor,
                "orders",
                &webhook,
                &json!({"EventType": "order.created", "Payload": "{}", "Extra": true}),
            )
            .await
            .expect("persist");
        assert_eq!(result["RowsAffected"], Value::from(1));
    }
}
