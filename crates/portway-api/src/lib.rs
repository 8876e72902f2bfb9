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

//! HTTP surface of the Portway gateway.
//!
//! A single URL shape drives everything:
//! `/api/{environment}/{endpointPath}[/{segments…}][?query]`, with parallel
//! `composite/`, `files/`, and `webhook/` prefixes. The router authenticates
//! bearer tokens, applies per-IP and per-token rate limits, resolves the
//! target endpoint from an immutable registry snapshot, and maps engine
//! errors onto the wire envelope.

mod auth;
mod dispatch;
mod files_http;
mod health;
mod rate_limit;
mod runner;

pub mod errors;
pub mod router;
pub mod state;

pub use errors::ApiError;
pub use rate_limit::{Admission, BucketConfig, RateLimiter};
pub use router::ApiServer;
pub use state::{ApiState, SqlExecutorFactory, SqliteExecutorFactory, auth_context_hash};
