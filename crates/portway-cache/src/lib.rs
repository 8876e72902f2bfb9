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

//! Pluggable response cache for the Portway gateway.
//!
//! The capability set is deliberately small: get, set, remove (single and
//! by prefix), and an acquire-or-skip distributed lock. Providers cover an
//! in-memory bounded LRU, Redis behind a reconnecting connection manager,
//! and a failover composite that degrades to memory during an outage.

pub mod error;
pub mod fallback;
pub mod memory;
pub mod provider;
pub mod redis;

pub use error::{CacheError, CacheResult};
pub use fallback::FailoverCacheProvider;
pub use memory::MemoryCacheProvider;
pub use provider::{CacheProvider, LockHandle};
pub use redis::RedisCacheProvider;
