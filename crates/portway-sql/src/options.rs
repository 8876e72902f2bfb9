//! Query-string option parsing: `$select`, `$filter`, `$orderby`, `$top`, `$skip`.

use crate::error::{SqlError, SqlResult};

/// Sort direction for one `$orderby` term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (default).
    Asc,
    /// Descending order.
    Desc,
}

impl SortDirection {
    /// SQL keyword for the direction.
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Parsed query options, all fields expressed in caller-facing aliases.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// `$select` aliases, in request order; empty means all exposed columns.
    pub select: Vec<String>,
    /// Raw `$filter` expression, parsed later against the alias map.
    pub filter: Option<String>,
    /// `$orderby` terms.
    pub order_by: Vec<(String, SortDirection)>,
    /// Page size; the default cap applies when the caller sent none.
    pub top: u64,
    /// Rows skipped before the page starts.
    pub skip: u64,
    /// Whether the caller sent `$top` or `$skip` themselves. Function
    /// endpoints only page when asked to.
    pub explicit_paging: bool,
}

impl QueryOptions {
    /// Parse decoded query pairs, applying the default `$top` cap.
    ///
    /// Unknown `$`-prefixed options are rejected; plain parameters are left
    /// for the endpoint (TVF query parameters travel beside the `$` options).
    ///
    /// # Errors
    ///
    /// Returns [`SqlError::QuerySyntax`] for malformed numbers, empty terms,
    /// or unknown `$` options.
    pub fn parse<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
        default_top: u64,
    ) -> SqlResult<Self> {
        let mut options = Self {
            top: default_top,
            ..Self::default()
        };

        for (key, value) in pairs {
            match key {
                "$select" => {
                    options.select = value
                        .split(',')
                        .map(str::trim)
                        .filter(|entry| !entry.is_empty())
                        .map(str::to_string)
                        .collect();
                    if options.select.is_empty() {
                        return Err(SqlError::QuerySyntax {
                            detail: "$select must name at least one column".to_string(),
                        });
                    }
                }
                "$filter" => {
                    let trimmed = value.trim();
                    if trimmed.is_empty() {
                        return Err(SqlError::QuerySyntax {
                            detail: "$filter must not be empty".to_string(),
                        });
                    }
                    options.filter = Some(trimmed.to_string());
                }
                "$orderby" => {
                    options.order_by = parse_order_by(value)?;
                }
                "$top" => {
                    options.top = parse_count("$top", value)?;
                    if options.top == 0 {
                        return Err(SqlError::QuerySyntax {
                            detail: "$top must be positive".to_string(),
                        });
                    }
                    options.explicit_paging = true;
                }
                "$skip" => {
                    options.skip = parse_count("$skip", value)?;
                    options.explicit_paging = true;
                }
                other if other.starts_with('$') => {
                    return Err(SqlError::QuerySyntax {
                        detail: format!("unknown query option '{other}'"),
                    });
                }
                _ => {}
            }
        }
        Ok(options)
    }
}

fn parse_order_by(value: &str) -> SqlResult<Vec<(String, SortDirection)>> {
    let mut terms = Vec::new();
    for raw_term in value.split(',') {
        let term = raw_term.trim();
        if term.is_empty() {
            return Err(SqlError::QuerySyntax {
                detail: "$orderby contains an empty term".to_string(),
            });
        }
        let mut parts = term.split_whitespace();
        let field = parts
            .next()
            .ok_or_else(|| SqlError::QuerySyntax {
                detail: "$orderby contains an empty term".to_string(),
            })?
            .to_string();
        let direction = match parts.next() {
            None => SortDirection::Asc,
            Some(word) if word.eq_ignore_ascii_case("asc") => SortDirection::Asc,
            Some(word) if word.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            Some(word) => {
                return Err(SqlError::QuerySyntax {
                    detail: format!("invalid sort direction '{word}'"),
                });
            }
        };
        if parts.next().is_some() {
            return Err(SqlError::QuerySyntax {
                detail: format!("malformed $orderby term '{term}'"),
            });
        }
        terms.push((field, direction));
    }
    Ok(terms)
}

fn parse_count(option: &str, value: &str) -> SqlResult<u64> {
    value.trim().parse().map_err(|_err| SqlError::QuerySyntax {
        detail: format!("{option} must be a non-negative integer"),
    })
}
