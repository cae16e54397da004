//! lmpack export
//!
//! Drives a [`TensorSource`](lmpack_model::TensorSource) through the
//! container layout: resolves the format version, derives the header,
//! detects a shared classifier, quantizes when the version asks for it, and
//! publishes the file atomically.

mod config;
mod error;
mod export;

pub use config::ExportConfig;
pub use error::{ExportError, Result};
pub use export::{
    derive_hyperparams, export, export_to_writer, is_shared_classifier, resolve_version,
    ExportOptions, ExportPlan, ExportSummary,
};
