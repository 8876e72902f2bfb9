#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::cast_possible_truncation)]

//! SQL engine for the Portway gateway.
//!
//! Translates the supported query-language subset (`$select`, `$filter`,
//! `$orderby`, `$top`, `$skip`) into parameterized SQL, maps caller-facing
//! aliases onto database columns bijectively, binds table-valued-function
//! parameters from path, query, and header sources, and routes mutations to
//! stored procedures. Execution flows through the [`SqlExecutor`] seam so
//! backends stay pluggable.

pub mod builder;
pub mod engine;
pub mod error;
pub mod executor;
pub mod filter;
pub mod metadata;
pub mod options;

pub use builder::{Dialect, SqlQuery, SqlValue};
pub use engine::{QueryResponse, SqlEngine};
pub use error::{SqlError, SqlResult};
pub use executor::{SqlExecutor, SqliteExecutor};
pub use filter::{CompareOp, FilterExpr, Literal, StringFunction};
pub use metadata::{ColumnMap, ColumnMetadata, MetadataCache};
pub use options::{QueryOptions, SortDirection};
