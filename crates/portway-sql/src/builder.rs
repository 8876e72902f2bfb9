//! Parameterized SQL generation.
//!
//! The canonical dialect is SQL Server: bracket-quoted identifiers,
//! `OFFSET … ROWS FETCH NEXT … ROWS ONLY` paging, `EXEC` procedure calls.
//! The SQLite dialect exists so the embedded executor can serve the same
//! endpoints; the builder is the only place dialect differences live.
//!
//! Filter parameters bind as `@p0..N`, table-valued-function arguments as
//! `@param0..N`; executors rewrite the markers to driver placeholders.

use std::collections::HashMap;

use portway_config::{ColumnMapping, ParameterSource, SqlEndpoint, TvfParameter, WebhookEndpoint};
use serde_json::{Map, Value};

use crate::error::{SqlError, SqlResult};
use crate::filter::{CompareOp, FilterExpr, Literal};
use crate::metadata::ColumnMetadata;
use crate::options::QueryOptions;

/// SQL dialect the builder renders for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// SQL Server: the canonical upstream dialect.
    #[default]
    SqlServer,
    /// SQLite: used by the embedded executor.
    Sqlite,
}

impl Dialect {
    fn quote(self, identifier: &str) -> String {
        match self {
            Self::SqlServer => format!("[{identifier}]"),
            Self::Sqlite => format!("\"{identifier}\""),
        }
    }

    fn paging(self, top: u64, skip: u64) -> String {
        match self {
            Self::SqlServer => format!("OFFSET {skip} ROWS FETCH NEXT {top} ROWS ONLY"),
            Self::Sqlite => format!("LIMIT {top} OFFSET {skip}"),
        }
    }
}

/// A typed parameter value bound to a generated statement.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Text value.
    Text(String),
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// SQL NULL.
    Null,
}

impl SqlValue {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Bool(*flag),
            Value::Number(number) => number.as_i64().map_or_else(
                || Self::Float(number.as_f64().unwrap_or(0.0)),
                Self::Int,
            ),
            Value::String(text) => Self::Text(text.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

/// A generated statement plus its ordered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    /// Statement text with `@p`/`@param` markers.
    pub text: String,
    /// Parameters in marker order.
    pub params: Vec<SqlValue>,
}

/// Build the SELECT for a table or view endpoint.
///
/// # Errors
///
/// Returns [`SqlError::InvalidField`] for aliases outside the mapping,
/// [`SqlError::QuerySyntax`] for filter errors, and
/// [`SqlError::TypeMismatch`] when a literal fails coercion against the
/// column metadata.
pub fn build_select(
    endpoint: &SqlEndpoint,
    options: &QueryOptions,
    metadata: Option<&HashMap<String, ColumnMetadata>>,
    dialect: Dialect,
) -> SqlResult<SqlQuery> {
    let columns = render_select_list(&endpoint.columns, &options.select, dialect)?;
    let mut params = Vec::new();

    let mut text = format!(
        "SELECT {columns} FROM {}.{}",
        dialect.quote(&endpoint.schema),
        dialect.quote(&endpoint.object_name)
    );

    if let Some(raw_filter) = &options.filter {
        let expr = FilterExpr::parse(raw_filter)?;
        let clause = render_filter(&expr, &endpoint.columns, metadata, &mut params, dialect)?;
        text.push_str(" WHERE ");
        text.push_str(&clause);
    }

    text.push_str(" ORDER BY ");
    text.push_str(&render_order_by(endpoint, options, dialect)?);
    text.push(' ');
    text.push_str(&dialect.paging(options.top, options.skip));

    Ok(SqlQuery { text, params })
}

/// Build the SELECT over a table-valued function.
///
/// Function arguments bind as `@param0..N` in declaration order; any
/// `$filter` applies as a WHERE over the function's result set.
///
/// # Errors
///
/// Returns filter and alias errors as [`build_select`] does.
pub fn build_tvf_select(
    endpoint: &SqlEndpoint,
    arguments: Vec<SqlValue>,
    options: &QueryOptions,
    dialect: Dialect,
) -> SqlResult<SqlQuery> {
    let markers: Vec<String> = (0..arguments.len())
        .map(|index| format!("@param{index}"))
        .collect();
    let mut params = arguments;

    let mut text = format!(
        "SELECT * FROM {}.{}({})",
        dialect.quote(&endpoint.schema),
        dialect.quote(&endpoint.object_name),
        markers.join(", ")
    );

    if let Some(raw_filter) = &options.filter {
        let expr = FilterExpr::parse(raw_filter)?;
        let clause = render_filter(&expr, &endpoint.columns, None, &mut params, dialect)?;
        text.push_str(" WHERE ");
        text.push_str(&clause);
    }

    if !options.order_by.is_empty() || options.explicit_paging {
        let order = if options.order_by.is_empty() {
            match dialect {
                Dialect::SqlServer => "(SELECT NULL)".to_string(),
                Dialect::Sqlite => "1".to_string(),
            }
        } else {
            render_order_terms(endpoint, options, dialect)?
        };
        text.push_str(" ORDER BY ");
        text.push_str(&order);
        text.push(' ');
        text.push_str(&dialect.paging(options.top, options.skip));
    }

    Ok(SqlQuery { text, params })
}

/// Resolve the table-valued-function argument list from the request.
///
/// # Errors
///
/// Returns [`SqlError::MissingParameter`] for absent required parameters and
/// [`SqlError::TypeMismatch`] when a value fails coercion to the declared
/// SQL type.
pub fn bind_tvf_arguments(
    parameters: &[TvfParameter],
    path_segments: &[String],
    query: &HashMap<String, String>,
    headers: &HashMap<String, String>,
) -> SqlResult<Vec<SqlValue>> {
    let mut arguments = Vec::with_capacity(parameters.len());
    for parameter in parameters {
        let raw = match parameter.source {
            ParameterSource::Path => parameter
                .position
                .and_then(|position| path_segments.get(usize::from(position) - 1))
                .cloned(),
            ParameterSource::Query => query
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&parameter.name))
                .map(|(_, value)| value.clone()),
            ParameterSource::Header => headers
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(&parameter.name))
                .map(|(_, value)| value.clone()),
        };

        let value = match raw {
            Some(text) => coerce_text(&parameter.name, &text, &parameter.sql_type)?,
            None => match &parameter.default_value {
                Some(default) => SqlValue::from_json(default),
                None if parameter.required => {
                    return Err(SqlError::MissingParameter {
                        name: parameter.name.clone(),
                    });
                }
                None => SqlValue::Null,
            },
        };
        arguments.push(value);
    }
    Ok(arguments)
}

/// Parameter names set by the gateway, never by callers.
pub const RESERVED_PROCEDURE_PARAMETERS: &[&str] = &["Method", "Action", "Operation"];

/// Build the EXEC statement routing a mutation to the endpoint's procedure.
///
/// The synthetic `@Method` parameter carries the HTTP verb; reserved names in
/// the payload are dropped. A trailing URL key binds to the primary key
/// column when one is declared.
///
/// # Errors
///
/// Returns [`SqlError::EndpointMisconfigured`] when no procedure is declared.
pub fn build_procedure_call(
    endpoint: &SqlEndpoint,
    method: &str,
    payload: &Map<String, Value>,
    url_key: Option<&str>,
    dialect: Dialect,
) -> SqlResult<SqlQuery> {
    let procedure = endpoint
        .procedure
        .as_deref()
        .ok_or(SqlError::EndpointMisconfigured {
            reason: "mutation endpoint declares no procedure",
        })?;

    let mut assignments = vec!["@Method = @p0".to_string()];
    let mut params = vec![SqlValue::Text(method.to_ascii_uppercase())];

    if let (Some(key), Some(primary_key)) = (url_key, endpoint.primary_key.as_deref()) {
        params.push(SqlValue::Text(key.to_string()));
        assignments.push(format!("@{primary_key} = @p{}", params.len() - 1));
    }

    for (name, value) in payload {
        if RESERVED_PROCEDURE_PARAMETERS
            .iter()
            .any(|reserved| reserved.eq_ignore_ascii_case(name))
        {
            continue;
        }
        params.push(SqlValue::from_json(value));
        assignments.push(format!("@{name} = @p{}", params.len() - 1));
    }

    let text = format!(
        "EXEC {} {}",
        render_procedure_name(procedure, dialect),
        assignments.join(", ")
    );
    Ok(SqlQuery { text, params })
}

/// Build the INSERT persisting a webhook payload.
///
/// Only allowed columns are written; unknown payload fields are skipped.
///
/// # Errors
///
/// Returns [`SqlError::InvalidField`] when no payload field maps to an
/// allowed column.
pub fn build_webhook_insert(
    webhook: &WebhookEndpoint,
    payload: &Map<String, Value>,
    dialect: Dialect,
) -> SqlResult<SqlQuery> {
    let mut columns = Vec::new();
    let mut markers = Vec::new();
    let mut params = Vec::new();

    for (name, value) in payload {
        let Some(db) = webhook.columns.db_for_alias(name) else {
            continue;
        };
        params.push(SqlValue::from_json(value));
        columns.push(dialect.quote(db));
        markers.push(format!("@p{}", params.len() - 1));
    }

    if columns.is_empty() {
        return Err(SqlError::InvalidField {
            field: "payload carries no allowed columns".to_string(),
        });
    }

    let text = format!(
        "INSERT INTO {}.{} ({}) VALUES ({})",
        dialect.quote(&webhook.schema),
        dialect.quote(&webhook.object_name),
        columns.join(", "),
        markers.join(", ")
    );
    Ok(SqlQuery { text, params })
}

fn render_select_list(
    mapping: &ColumnMapping,
    select: &[String],
    dialect: Dialect,
) -> SqlResult<String> {
    if mapping.is_empty() {
        return Ok("*".to_string());
    }

    let pairs: Vec<(String, String)> = if select.is_empty() {
        mapping.pairs().to_vec()
    } else {
        select
            .iter()
            .map(|alias| {
                mapping
                    .db_for_alias(alias)
                    .map(|db| (db.to_string(), alias.clone()))
                    .ok_or_else(|| SqlError::InvalidField {
                        field: alias.clone(),
                    })
            })
            .collect::<SqlResult<_>>()?
    };

    Ok(pairs
        .iter()
        .map(|(db, alias)| {
            if db.eq_ignore_ascii_case(alias) {
                dialect.quote(db)
            } else {
                format!("{} AS {alias}", dialect.quote(db))
            }
        })
        .collect::<Vec<_>>()
        .join(", "))
}

fn render_order_by(
    endpoint: &SqlEndpoint,
    options: &QueryOptions,
    dialect: Dialect,
) -> SqlResult<String> {
    if !options.order_by.is_empty() {
        return render_order_terms(endpoint, options, dialect);
    }
    if let Some(primary_key) = &endpoint.primary_key {
        return Ok(dialect.quote(primary_key));
    }
    if let Some((db, _)) = endpoint.columns.pairs().first() {
        return Ok(dialect.quote(db));
    }
    Ok(match dialect {
        Dialect::SqlServer => "(SELECT NULL)".to_string(),
        Dialect::Sqlite => "1".to_string(),
    })
}

fn render_order_terms(
    endpoint: &SqlEndpoint,
    options: &QueryOptions,
    dialect: Dialect,
) -> SqlResult<String> {
    let terms: Vec<String> = options
        .order_by
        .iter()
        .map(|(alias, direction)| {
            let db = resolve_field(&endpoint.columns, alias)?;
            Ok(format!("{} {}", dialect.quote(&db), direction.as_sql()))
        })
        .collect::<SqlResult<_>>()?;
    Ok(terms.join(", "))
}

fn resolve_field(mapping: &ColumnMapping, alias: &str) -> SqlResult<String> {
    if mapping.is_empty() {
        return Ok(alias.to_string());
    }
    mapping
        .db_for_alias(alias)
        .map(str::to_string)
        .ok_or_else(|| SqlError::InvalidField {
            field: alias.to_string(),
        })
}

fn render_filter(
    expr: &FilterExpr,
    mapping: &ColumnMapping,
    metadata: Option<&HashMap<String, ColumnMetadata>>,
    params: &mut Vec<SqlValue>,
    dialect: Dialect,
) -> SqlResult<String> {
    match expr {
        FilterExpr::Comparison { field, op, value } => {
            let db = resolve_field(mapping, field)?;
            if matches!(value, Literal::Null) {
                return match op {
                    CompareOp::Eq => Ok(format!("{} IS NULL", dialect.quote(&db))),
                    CompareOp::Ne => Ok(format!("{} IS NOT NULL", dialect.quote(&db))),
                    _ => Err(SqlError::QuerySyntax {
                        detail: format!("operator '{}' cannot compare with null", op.as_sql()),
                    }),
                };
            }
            let bound = coerce_literal(field, &db, value, metadata)?;
            params.push(bound);
            Ok(format!(
                "{} {} @p{}",
                dialect.quote(&db),
                op.as_sql(),
                params.len() - 1
            ))
        }
        FilterExpr::Function {
            function,
            field,
            value,
        } => {
            let db = resolve_field(mapping, field)?;
            params.push(SqlValue::Text(function.pattern(value)));
            Ok(format!(
                "{} LIKE @p{}",
                dialect.quote(&db),
                params.len() - 1
            ))
        }
        FilterExpr::And(left, right) => Ok(format!(
            "({} AND {})",
            render_filter(left, mapping, metadata, params, dialect)?,
            render_filter(right, mapping, metadata, params, dialect)?
        )),
        FilterExpr::Or(left, right) => Ok(format!(
            "({} OR {})",
            render_filter(left, mapping, metadata, params, dialect)?,
            render_filter(right, mapping, metadata, params, dialect)?
        )),
        FilterExpr::Not(inner) => Ok(format!(
            "NOT ({})",
            render_filter(inner, mapping, metadata, params, dialect)?
        )),
    }
}

fn coerce_literal(
    field: &str,
    db_column: &str,
    literal: &Literal,
    metadata: Option<&HashMap<String, ColumnMetadata>>,
) -> SqlResult<SqlValue> {
    let declared = metadata.and_then(|columns| columns.get(&db_column.to_ascii_lowercase()));
    let Some(column) = declared else {
        return Ok(plain_value(literal));
    };

    let sql_type = column.sql_type.to_ascii_lowercase();
    if is_numeric_type(&sql_type) {
        return match literal {
            Literal::Integer(value) => Ok(SqlValue::Int(*value)),
            Literal::Float(value) => Ok(SqlValue::Float(*value)),
            Literal::String(text) => text.parse::<i64>().map(SqlValue::Int).or_else(|_| {
                text.parse::<f64>()
                    .map(SqlValue::Float)
                    .map_err(|_err| mismatch(field, &column.sql_type))
            }),
            Literal::Bool(value) => Ok(SqlValue::Int(i64::from(*value))),
            _ => Err(mismatch(field, &column.sql_type)),
        };
    }
    if is_boolean_type(&sql_type) {
        return match literal {
            Literal::Bool(value) => Ok(SqlValue::Bool(*value)),
            Literal::Integer(0) => Ok(SqlValue::Bool(false)),
            Literal::Integer(1) => Ok(SqlValue::Bool(true)),
            _ => Err(mismatch(field, &column.sql_type)),
        };
    }
    if is_temporal_type(&sql_type) {
        return match literal {
            Literal::DateTime(text) | Literal::String(text) => Ok(SqlValue::Text(text.clone())),
            _ => Err(mismatch(field, &column.sql_type)),
        };
    }
    Ok(plain_value(literal))
}

fn coerce_text(name: &str, text: &str, sql_type: &str) -> SqlResult<SqlValue> {
    let lowered = sql_type.to_ascii_lowercase();
    if is_numeric_type(&lowered) {
        return text
            .parse::<i64>()
            .map(SqlValue::Int)
            .or_else(|_| text.parse::<f64>().map(SqlValue::Float))
            .map_err(|_err| SqlError::TypeMismatch {
                field: name.to_string(),
                expected: sql_type.to_string(),
            });
    }
    if is_boolean_type(&lowered) {
        return match text.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(SqlValue::Bool(true)),
            "false" | "0" => Ok(SqlValue::Bool(false)),
            _ => Err(SqlError::TypeMismatch {
                field: name.to_string(),
                expected: sql_type.to_string(),
            }),
        };
    }
    Ok(SqlValue::Text(text.to_string()))
}

fn plain_value(literal: &Literal) -> SqlValue {
    match literal {
        Literal::String(text) | Literal::DateTime(text) => SqlValue::Text(text.clone()),
        Literal::Integer(value) => SqlValue::Int(*value),
        Literal::Float(value) => SqlValue::Float(*value),
        Literal::Bool(value) => SqlValue::Bool(*value),
        Literal::Null => SqlValue::Null,
    }
}

fn mismatch(field: &str, expected: &str) -> SqlError {
    SqlError::TypeMismatch {
        field: field.to_string(),
        expected: expected.to_string(),
    }
}

fn is_numeric_type(sql_type: &str) -> bool {
    [
        "int", "bigint", "smallint", "tinyint", "integer", "decimal", "numeric", "float", "real",
        "money",
    ]
    .iter()
    .any(|candidate| sql_type.starts_with(candidate))
}

fn is_boolean_type(sql_type: &str) -> bool {
    sql_type.starts_with("bit") || sql_type.starts_with("bool")
}

fn is_temporal_type(sql_type: &str) -> bool {
    sql_type.starts_with("date") || sql_type.starts_with("time")
}

fn render_procedure_name(procedure: &str, dialect: Dialect) -> String {
    if procedure.contains('[') || procedure.contains('"') {
        // Already quoted in the definition file.
        return procedure.to_string();
    }
    procedure
        .split('.')
        .map(|part| dialect.quote(part))
        .collect::<Vec<_>>()
        .join(".")
}
