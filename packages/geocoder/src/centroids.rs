//! Street-segment centroid reference table.
//!
//! Loaded once from CSV (`seg_id, lat, lon`; extra columns are ignored)
//! and shared read-only by the resolver.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

/// Coordinates of a segment's centroid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Centroid {
    /// Latitude (WGS84).
    pub lat: f64,
    /// Longitude (WGS84).
    pub lon: f64,
}

/// Errors loading the centroid table.
#[derive(Debug, thiserror::Error)]
pub enum CentroidError {
    /// CSV parsing error.
    #[error("CSV error in {origin}: {source}")]
    Csv {
        /// Path or description of the CSV source.
        origin: String,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// A segment id appears twice.
    #[error("Segment {segment_id} appears more than once in {origin}")]
    DuplicateSegment {
        /// Path or description of the CSV source.
        origin: String,
        /// Repeated segment id.
        segment_id: String,
    },

    /// Coordinates are not finite.
    #[error("Segment {segment_id} in {origin} has invalid coordinates ({lat}, {lon})")]
    InvalidCoordinates {
        /// Path or description of the CSV source.
        origin: String,
        /// Segment id.
        segment_id: String,
        /// Latitude as read.
        lat: f64,
        /// Longitude as read.
        lon: f64,
    },
}

#[derive(Debug, Deserialize)]
struct CentroidRow {
    #[serde(alias = "segment_id", alias = "SEG_ID")]
    seg_id: String,
    #[serde(alias = "latitude", alias = "LAT")]
    lat: f64,
    #[serde(alias = "longitude", alias = "lng", alias = "LON")]
    lon: f64,
}

/// Segment id -> centroid.
#[derive(Debug, Clone, Default)]
pub struct CentroidTable {
    centroids: BTreeMap<String, Centroid>,
}

impl CentroidTable {
    /// Loads the table from a CSV file.
    ///
    /// # Errors
    ///
    /// Returns [`CentroidError`] if the file cannot be read, a row does not
    /// parse, a segment repeats, or a coordinate is not finite.
    pub fn load(path: &Path) -> Result<Self, CentroidError> {
        let origin = path.display().to_string();
        let reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|source| CentroidError::Csv {
                origin: origin.clone(),
                source,
            })?;
        let table = Self::from_csv(reader, &origin)?;
        log::info!("Loaded {} segment centroids from {origin}", table.len());
        Ok(table)
    }

    /// Loads the table from any CSV source.
    ///
    /// # Errors
    ///
    /// Same as [`CentroidTable::load`].
    pub fn from_reader(reader: impl Read) -> Result<Self, CentroidError> {
        let reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        Self::from_csv(reader, "centroids")
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>, origin: &str) -> Result<Self, CentroidError> {
        let mut centroids = BTreeMap::new();

        for result in reader.deserialize::<CentroidRow>() {
            let row = result.map_err(|source| CentroidError::Csv {
                origin: origin.to_string(),
                source,
            })?;
            let segment_id = row.seg_id.trim().to_string();

            if !row.lat.is_finite() || !row.lon.is_finite() {
                return Err(CentroidError::InvalidCoordinates {
                    origin: origin.to_string(),
                    segment_id,
                    lat: row.lat,
                    lon: row.lon,
                });
            }
            if centroids.contains_key(&segment_id) {
                return Err(CentroidError::DuplicateSegment {
                    origin: origin.to_string(),
                    segment_id,
                });
            }

            centroids.insert(
                segment_id,
                Centroid {
                    lat: row.lat,
                    lon: row.lon,
                },
            );
        }

        Ok(Self { centroids })
    }

    /// Looks up a segment's centroid.
    #[must_use]
    pub fn get(&self, segment_id: &str) -> Option<Centroid> {
        self.centroids.get(segment_id).copied()
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.centroids.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.centroids.is_empty()
    }
}

impl FromIterator<(String, Centroid)> for CentroidTable {
    fn from_iter<I: IntoIterator<Item = (String, Centroid)>>(iter: I) -> Self {
        Self {
            centroids: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_looks_up() {
        let csv = "seg_id,lat,lon,street\n\
                   440201,39.9524,-75.1636,MARKET ST\n\
                   440202,39.9530,-75.1650,S 15TH ST\n";
        let table = CentroidTable::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.get("440201"),
            Some(Centroid {
                lat: 39.9524,
                lon: -75.1636
            })
        );
        assert_eq!(table.get("999"), None);
    }

    #[test]
    fn accepts_long_column_names() {
        let csv = "segment_id,latitude,longitude\n\
                   1,39.9,-75.1\n";
        let table = CentroidTable::from_reader(csv.as_bytes()).unwrap();
        assert!(table.get("1").is_some());
    }

    #[test]
    fn rejects_duplicate_segments() {
        let csv = "seg_id,lat,lon\n1,39.9,-75.1\n1,39.8,-75.2\n";
        assert!(matches!(
            CentroidTable::from_reader(csv.as_bytes()),
            Err(CentroidError::DuplicateSegment { .. })
        ));
    }

    #[test]
    fn rejects_non_numeric_coordinates() {
        let csv = "seg_id,lat,lon\n1,north,-75.1\n";
        assert!(matches!(
            CentroidTable::from_reader(csv.as_bytes()),
            Err(CentroidError::Csv { .. })
        ));
    }

    #[test]
    fn rejects_non_finite_coordinates() {
        let csv = "seg_id,lat,lon\n1,NaN,-75.1\n";
        assert!(matches!(
            CentroidTable::from_reader(csv.as_bytes()),
            Err(CentroidError::InvalidCoordinates { .. })
        ));
    }
}
