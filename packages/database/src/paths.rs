#![allow(clippy::module_name_repetitions)]
//! Canonical file paths under the project's `data/` directory.

use std::path::{Path, PathBuf};

/// Environment variable overriding the database location.
pub const DATABASE_PATH_ENV: &str = "PARKING_DATABASE_PATH";

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`.
///
/// # Panics
///
/// Panics if the project root cannot be resolved.
#[must_use]
pub fn project_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .expect("Failed to find project root from CARGO_MANIFEST_DIR")
        .to_path_buf()
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Returns the default `DuckDB` file for the violations store.
#[must_use]
pub fn default_database_path() -> PathBuf {
    data_dir().join("parking_violations.duckdb")
}

/// Resolves the database path: an explicit path wins, then
/// [`DATABASE_PATH_ENV`], then [`default_database_path`].
#[must_use]
pub fn violations_db_path(explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(
        || {
            std::env::var_os(DATABASE_PATH_ENV)
                .filter(|v| !v.is_empty())
                .map_or_else(default_database_path, PathBuf::from)
        },
        Path::to_path_buf,
    )
}

/// Returns the `data/identity/` directory holding the persisted
/// surrogate-id mappings.
#[must_use]
pub fn identity_dir() -> PathBuf {
    data_dir().join("identity")
}

/// Ensures a directory exists, creating it if necessary.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.as_os_str().is_empty() && !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}
