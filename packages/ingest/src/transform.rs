//! Row filtering and anonymization.

use chrono::NaiveDate;
use parking_identity::IdentityIndex;
use parking_violation_models::{AnonymizedRecord, DecodedRecord};
use rust_decimal::Decimal;
use strum_macros::{AsRefStr, Display};

use crate::rules::AgencyRules;

/// Why a decoded row was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Rejection {
    /// Issued before the minimum issue date.
    IssuedTooEarly,
    /// Fine of zero or less.
    NonPositiveFine,
}

/// Drops rows that should never reach anonymization.
#[derive(Debug, Clone, Copy)]
pub struct RecordFilter {
    min_issue_date: NaiveDate,
}

impl RecordFilter {
    /// Keeps rows issued on or after `min_issue_date` with a positive fine.
    #[must_use]
    pub const fn new(min_issue_date: NaiveDate) -> Self {
        Self { min_issue_date }
    }

    /// Returns why `record` should be dropped, or `None` to keep it.
    #[must_use]
    pub fn rejection(&self, record: &DecodedRecord) -> Option<Rejection> {
        if record.issued_at.date() < self.min_issue_date {
            Some(Rejection::IssuedTooEarly)
        } else if record.fine <= Decimal::ZERO {
            Some(Rejection::NonPositiveFine)
        } else {
            None
        }
    }
}

/// Replaces the ticket number and plate with surrogate ids and applies the
/// agency rules.
///
/// The division survives only when the canonical agency is a
/// division-bearing one.
pub fn anonymize(
    record: DecodedRecord,
    index: &mut IdentityIndex,
    rules: &AgencyRules,
    dedup_tickets: bool,
) -> AnonymizedRecord {
    let anon_ticket_number = index.assign_ticket(&record.ticket_number, dedup_tickets);
    let anon_plate_id = index.assign_plate(&record.state, &record.plate);
    let issuing_agency = rules.canonical_agency(&record.issuing_agency);
    let division = record
        .division
        .filter(|_| rules.keeps_division(&issuing_agency));

    AnonymizedRecord {
        anon_ticket_number,
        issued_at: record.issued_at,
        state: record.state,
        anon_plate_id,
        division,
        location: record.location,
        violation_desc: record.violation_desc,
        fine: record.fine,
        issuing_agency,
        lat: record.lat,
        lon: record.lon,
    }
}
