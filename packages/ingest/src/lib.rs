#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Anonymizes, geocodes, and loads fixed-width parking violation extracts
//! into the `DuckDB` violations store.

pub mod pipeline;
pub mod rules;
pub mod sink;
pub mod transform;

use std::io::Write as _;
use std::path::{Path, PathBuf};

use parking_geocoder::{CentroidError, CentroidTable, LookupError, StreetLookupParser};
use parking_ingest_models::RunSummary;

pub use pipeline::{Pipeline, PipelineError};
pub use rules::{AgencyRules, RulesError};
pub use sink::{CsvSink, RecordSink, SinkError};

/// Returns the default plate mapping file, `data/identity/plates.csv`.
#[must_use]
pub fn default_plates_path() -> PathBuf {
    parking_database::paths::identity_dir().join("plates.csv")
}

/// Returns the default ticket mapping file, `data/identity/tickets.csv`.
#[must_use]
pub fn default_tickets_path() -> PathBuf {
    parking_database::paths::identity_dir().join("tickets.csv")
}

/// Errors loading geocoding reference data.
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    /// The address lookup table failed to load.
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// The centroid table failed to load.
    #[error(transparent)]
    Centroids(#[from] CentroidError),
}

/// Read-only data the geocoder resolves against.
pub struct ReferenceData {
    /// Address parser backed by the lookup table.
    pub parser: StreetLookupParser,
    /// Segment id -> centroid.
    pub centroids: CentroidTable,
}

impl ReferenceData {
    /// Loads the address lookup table and centroid table. A missing path
    /// leaves that table empty, which disables segment geocoding.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError`] if a given file fails to load.
    pub fn load(
        address_lookup: Option<&Path>,
        centroids: Option<&Path>,
    ) -> Result<Self, ReferenceError> {
        let parser = match address_lookup {
            Some(path) => StreetLookupParser::load(path)?,
            None => {
                log::warn!("No address lookup table given; locations will not map to segments");
                StreetLookupParser::empty()
            }
        };
        let centroids = match centroids {
            Some(path) => CentroidTable::load(path)?,
            None => {
                log::warn!("No centroid table given; only supplied coordinates will be used");
                CentroidTable::default()
            }
        };

        Ok(Self { parser, centroids })
    }
}

/// Writes the run summary as pretty-printed JSON.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be written.
pub fn write_summary(path: &Path, summary: &RunSummary) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        parking_database::paths::ensure_dir(parent)?;
    }
    let mut writer = std::io::BufWriter::new(std::fs::File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writer.flush()?;
    log::info!("Wrote run summary to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_files_default_to_data_dir() {
        let dir = parking_database::paths::identity_dir();
        assert_eq!(default_plates_path(), dir.join("plates.csv"));
        assert_eq!(default_tickets_path(), dir.join("tickets.csv"));
    }

    #[test]
    fn missing_reference_paths_give_empty_tables() {
        let data = ReferenceData::load(None, None).unwrap();
        assert!(data.parser.is_empty());
        assert!(data.centroids.is_empty());
    }

    #[test]
    fn bad_centroid_file_is_an_error() {
        let result = ReferenceData::load(None, Some(Path::new("/nonexistent/centroids.csv")));
        assert!(matches!(result, Err(ReferenceError::Centroids(_))));
    }

    #[test]
    fn summary_is_written_as_json() {
        let path = std::env::temp_dir().join(format!("parking_summary_{}.json", std::process::id()));
        let summary = RunSummary {
            rows_read: 12,
            ..RunSummary::default()
        };

        write_summary(&path, &summary).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["rows_read"], 12);

        std::fs::remove_file(&path).unwrap();
    }
}
