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

//! Token authentication for the Portway gateway.
//!
//! Bearer tokens live in the embedded `auth.db` database, hashed with
//! PBKDF2-SHA256. This crate verifies presented tokens, evaluates scope and
//! environment grants, and appends audit records without ever blocking the
//! request path.

pub mod audit;
pub mod error;
pub mod hashing;
pub mod scopes;
pub mod store;

pub use audit::{AuditOperation, AuditRecord, AuditRow, AuditWriter};
pub use error::{AuthError, AuthResult};
pub use scopes::{ScopePattern, ScopeSet};
pub use store::{AuthContext, TokenRow, TokenStore};
