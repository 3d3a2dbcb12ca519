#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` persistence for parking violations.
//!
//! [`store`] owns the schema (a final table plus a staging table of the
//! same shape) and the [`ViolationStore`] transaction seam. [`loader`]
//! drives the per-batch stage / reconcile / commit protocol on top of it.

pub mod loader;
pub mod paths;
pub mod store;

pub use loader::{BatchLoader, BatchReport, LoadError, LoaderState};
pub use store::{DuckDbStore, StagedRow, StoreTransaction, ViolationStore};

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` error.
    #[error("DuckDB error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// Filesystem error preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}
