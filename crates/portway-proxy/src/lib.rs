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

//! Proxy engine for the Portway gateway.
//!
//! Forwards requests to configured upstreams while preserving method (after
//! translation), path suffix, query, and body; injects environment headers;
//! rewrites upstream URLs in JSON/XML responses back to the public base; and
//! caches GET responses under the gateway's cache policy.

pub mod cache_policy;
pub mod engine;
pub mod error;
pub mod rewrite;
pub mod translate;

pub use cache_policy::{CacheEntry, cache_duration, cache_key, endpoint_prefix};
pub use engine::{ProxiedResponse, ProxyEngine, ProxyRequest};
pub use error::{ProxyError, ProxyResult};
pub use rewrite::{rewrite_urls, should_rewrite};
pub use translate::{AppendHeaders, HeaderConflictPolicy, TranslationMap};
