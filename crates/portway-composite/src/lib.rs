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

//! Composite orchestrator for the Portway gateway.
//!
//! A composite endpoint chains sub-requests against sibling endpoints,
//! sharing a per-request UUID (`$guid`) and prior step results
//! (`$prev.{step}.{path}`) through template substitution. Steps run in
//! declared order; array steps fan out with bounded parallelism and keep
//! input order. The first failure short-circuits with partial results.

pub mod error;
pub mod orchestrator;
pub mod template;

pub use error::{CompositeError, CompositeResult};
pub use orchestrator::{
    CompositeOrchestrator, CompositeOutcome, CompositeState, StepOutcome, StepRunner,
};
pub use template::TemplateContext;
