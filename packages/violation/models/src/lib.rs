#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Parking violation record types.
//!
//! A violation moves through three shapes on its way into the store:
//!
//! 1. [`DecodedRecord`] — typed fields sliced out of a fixed-width line.
//! 2. [`AnonymizedRecord`] — plate and ticket number replaced by surrogate
//!    ids, division and agency normalized.
//! 3. [`GeocodedRecord`] — location normalized and coordinates resolved.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A violation as decoded from one fixed-width input line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedRecord {
    /// Raw ticket number (identifying).
    pub ticket_number: String,
    /// Issue date and time combined.
    pub issued_at: NaiveDateTime,
    /// Two-letter registration state of the plate.
    pub state: String,
    /// Raw license plate (identifying).
    pub plate: String,
    /// Issuing division. `None` when blank or all zeros.
    pub division: Option<String>,
    /// Free-form location text as written on the ticket.
    pub location: String,
    /// Violation description.
    pub violation_desc: String,
    /// Fine amount.
    pub fine: Decimal,
    /// Issuing agency code.
    pub issuing_agency: String,
    /// Supplied latitude, if the extract carries coordinates.
    pub lat: Option<f64>,
    /// Supplied longitude, if the extract carries coordinates.
    pub lon: Option<f64>,
}

impl DecodedRecord {
    /// Returns the supplied coordinates when both are present.
    #[must_use]
    pub const fn supplied_coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// A violation with its identifying fields replaced by surrogate ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymizedRecord {
    /// Surrogate id for the ticket number.
    pub anon_ticket_number: i64,
    /// Issue date and time.
    pub issued_at: NaiveDateTime,
    /// Registration state.
    pub state: String,
    /// Surrogate id for the `(state, plate)` pair.
    pub anon_plate_id: i64,
    /// Division, kept only for division-bearing agencies.
    pub division: Option<String>,
    /// Raw location text.
    pub location: String,
    /// Violation description.
    pub violation_desc: String,
    /// Fine amount.
    pub fine: Decimal,
    /// Canonical issuing agency name.
    pub issuing_agency: String,
    /// Supplied latitude.
    pub lat: Option<f64>,
    /// Supplied longitude.
    pub lon: Option<f64>,
}

impl AnonymizedRecord {
    /// Returns the supplied coordinates when both are present.
    #[must_use]
    pub const fn supplied_coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Where a record's coordinates came from, or why it has none.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GeocodeSource {
    /// Coordinates were supplied on the input line.
    Gps,
    /// Coordinates are the centroid of the matched street segment.
    Segment,
    /// A segment id was derived but is missing from the centroid table.
    FailedSegment,
    /// No segment id could be derived from the location.
    FailedAddress,
}

/// A fully transformed violation, ready to be committed to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodedRecord {
    /// Surrogate id for the ticket number (the business key in the store).
    pub anon_ticket_number: i64,
    /// Issue date and time.
    pub issued_at: NaiveDateTime,
    /// Registration state.
    pub state: String,
    /// Surrogate id for the plate.
    pub anon_plate_id: i64,
    /// Division, if any.
    pub division: Option<String>,
    /// Normalized address.
    pub location: String,
    /// Violation description.
    pub violation_desc: String,
    /// Fine amount.
    pub fine: Decimal,
    /// Canonical issuing agency name.
    pub issuing_agency: String,
    /// Resolved latitude.
    pub lat: Option<f64>,
    /// Resolved longitude.
    pub lon: Option<f64>,
    /// `true` when the coordinates are the ones supplied on the input line.
    pub gps: bool,
    /// Postal code from the parsed address.
    pub zip_code: Option<String>,
}

impl GeocodedRecord {
    /// Returns the resolved coordinates when both are present.
    #[must_use]
    pub const fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}
