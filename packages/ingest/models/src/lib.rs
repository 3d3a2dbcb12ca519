#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Ingestion options, progress, and run summary types.

pub mod progress;

use chrono::NaiveDate;
use parking_geocoder::GeocodeStats;
use serde::{Deserialize, Serialize};

/// Default number of rows per committed batch.
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

/// Earliest issue date kept by default.
///
/// # Panics
///
/// Never; the date is a valid constant.
#[must_use]
pub fn default_min_issue_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2012, 1, 1).expect("2012-01-01 is a valid date")
}

/// Knobs for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Give repeated ticket numbers a fresh, suffixed identity.
    pub dedup_tickets: bool,
    /// Rows per committed batch; the `run` command sizes its loader from this.
    pub batch_size: usize,
    /// 1-based input row at which geocoding and loading start. Earlier rows
    /// are still decoded and anonymized.
    pub starting_row: u64,
    /// Rows issued before this date are dropped.
    pub min_issue_date: NaiveDate,
    /// Whether input lines carry trailing latitude/longitude columns.
    pub coordinates: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            dedup_tickets: false,
            batch_size: DEFAULT_BATCH_SIZE,
            starting_row: 1,
            min_issue_date: default_min_issue_date(),
            coordinates: false,
        }
    }
}

/// Counters describing a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Input lines read, blank ones included.
    pub rows_read: u64,
    /// Whitespace-only lines skipped.
    pub blank_lines: u64,
    /// Rows dropped by the issue-date or fine filter.
    pub filtered: u64,
    /// Rows anonymized but not loaded because they precede the starting row.
    pub skipped_by_offset: u64,
    /// Rows handed to the sink.
    pub emitted: u64,
    /// Batches committed to the store (zero for CSV output).
    pub batches_committed: u64,
    /// Input row ending the last committed batch.
    pub last_committed_row: Option<u64>,
    /// Plate ids assigned during this run.
    pub new_plates: u64,
    /// Ticket ids assigned during this run.
    pub new_tickets: u64,
    /// Highest plate id after the run.
    pub plate_counter: i64,
    /// Highest ticket id after the run.
    pub ticket_counter: i64,
    /// Geocode resolution counters.
    pub geocode: GeocodeStats,
    /// Wall time of the run in seconds.
    pub elapsed_secs: f64,
}

impl RunSummary {
    /// Logs the summary at info level.
    pub fn log(&self) {
        log::info!(
            "Read {} row(s): {} blank, {} filtered, {} before starting row, {} emitted",
            self.rows_read,
            self.blank_lines,
            self.filtered,
            self.skipped_by_offset,
            self.emitted,
        );
        if let Some(last) = self.last_committed_row {
            log::info!(
                "Committed {} batch(es), last committed row {last}",
                self.batches_committed
            );
        }
        log::info!(
            "Assigned {} new plate id(s) (counter {}) and {} new ticket id(s) (counter {})",
            self.new_plates,
            self.plate_counter,
            self.new_tickets,
            self.ticket_counter,
        );
        log::info!("Total runtime {:.1}s", self.elapsed_secs);
    }
}
