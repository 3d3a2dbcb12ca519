//! Layered location resolution.
//!
//! Precedence, first match wins:
//!
//! 1. Supplied coordinates on the record (`gps`).
//! 2. Centroid of the street segment the parser derived (`segment`).
//! 3. Nothing: `failed_segment` if a segment id was derived but has no
//!    centroid, `failed_address` if no segment id could be derived.
//!
//! The address is parsed in every case, so the normalized location and
//! postal code are filled in even for GPS records.

use parking_violation_models::{AnonymizedRecord, GeocodeSource, GeocodedRecord};

use crate::centroids::CentroidTable;
use crate::parser::{AddressParser, ParsedAddress};
use crate::stats::GeocodeStats;

/// Outcome of resolving one location.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Normalized address (the raw text, trimmed, if it did not parse).
    pub location: String,
    /// Latitude, if resolved.
    pub lat: Option<f64>,
    /// Longitude, if resolved.
    pub lon: Option<f64>,
    /// Postal code, if one was found.
    pub zip_code: Option<String>,
    /// Which branch of the precedence produced the result.
    pub source: GeocodeSource,
}

/// Resolves locations against a parser and the centroid table.
pub struct GeocodeResolver<'a> {
    parser: &'a dyn AddressParser,
    centroids: &'a CentroidTable,
}

impl<'a> GeocodeResolver<'a> {
    /// Creates a resolver over a parser and a centroid table.
    #[must_use]
    pub fn new(parser: &'a dyn AddressParser, centroids: &'a CentroidTable) -> Self {
        Self { parser, centroids }
    }

    /// Resolves a raw location, given the coordinates supplied with it.
    ///
    /// Never fails: unresolved locations come back with no coordinates and
    /// a failure source, and are counted in `stats`.
    pub fn resolve_location(
        &self,
        raw: &str,
        supplied: Option<(f64, f64)>,
        stats: &mut GeocodeStats,
    ) -> Resolution {
        let parsed = self.parser.parse(raw);
        let (location, zip_code, segment_id) = match parsed {
            Some(ParsedAddress {
                normalized,
                zip_code,
                segment_id,
            }) => (normalized, zip_code, segment_id),
            None => (raw.trim().to_string(), None, None),
        };

        let mut unmatched = None;
        let (coordinates, source) = if let Some(coordinates) = supplied {
            (Some(coordinates), GeocodeSource::Gps)
        } else if let Some(segment_id) = segment_id.as_deref() {
            match self.centroids.get(segment_id) {
                Some(centroid) => (Some((centroid.lat, centroid.lon)), GeocodeSource::Segment),
                None => {
                    unmatched = Some(segment_id);
                    (None, GeocodeSource::FailedSegment)
                }
            }
        } else {
            (None, GeocodeSource::FailedAddress)
        };

        if source == GeocodeSource::FailedAddress {
            log::trace!("No segment for location {raw:?}");
        }
        stats.record(source, zip_code.is_some(), unmatched);

        Resolution {
            location,
            lat: coordinates.map(|(lat, _)| lat),
            lon: coordinates.map(|(_, lon)| lon),
            zip_code,
            source,
        }
    }

    /// Resolves an anonymized record into a geocoded one.
    pub fn resolve(&self, record: AnonymizedRecord, stats: &mut GeocodeStats) -> GeocodedRecord {
        let resolution =
            self.resolve_location(&record.location, record.supplied_coordinates(), stats);

        GeocodedRecord {
            anon_ticket_number: record.anon_ticket_number,
            issued_at: record.issued_at,
            state: record.state,
            anon_plate_id: record.anon_plate_id,
            division: record.division,
            location: resolution.location,
            violation_desc: record.violation_desc,
            fine: record.fine,
            issuing_agency: record.issuing_agency,
            lat: resolution.lat,
            lon: resolution.lon,
            gps: resolution.source == GeocodeSource::Gps,
            zip_code: resolution.zip_code,
        }
    }
}
