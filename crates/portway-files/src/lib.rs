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

//! File engine for the Portway gateway.
//!
//! Uploads, downloads, deletions, and listings under a per-environment
//! directory, with a hybrid memory+disk layer (dirty buffers flushed on a
//! timer or under memory pressure) and a per-environment index cache. File
//! identifiers are URL-safe base64 of `{environment}:{relativePath}`.

pub mod error;
pub mod id;
pub mod service;

pub use error::{FileError, FileResult};
pub use id::{FileRef, decode as decode_file_id, encode as encode_file_id};
pub use service::{FileMetadata, FileService, FileServiceOptions};
