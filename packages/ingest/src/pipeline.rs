//! Single-worker orchestration: read, decode, filter, anonymize, geocode,
//! hand off to a sink.
//!
//! Rows are processed strictly in input order. Every line counts towards
//! the 1-based row number, blank ones included, so row numbers (and the
//! store's `id` column) stay stable across re-runs of the same input.

use std::io::BufRead;
use std::time::Instant;

use parking_geocoder::{GeocodeResolver, GeocodeStats};
use parking_identity::IdentityIndex;
use parking_ingest_models::progress::ProgressCallback;
use parking_ingest_models::{PipelineOptions, RunSummary};
use parking_layout::{DecodeError, Layout, LayoutError};

use crate::rules::AgencyRules;
use crate::sink::{RecordSink, SinkError};
use crate::transform::{RecordFilter, anonymize};

/// How often (in rows) the progress message is refreshed.
const PROGRESS_MESSAGE_INTERVAL: u64 = 10_000;

/// Errors that halt a pipeline run.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The field layout is invalid.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// A line could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The input could not be read.
    #[error("Failed to read input at row {row}: {source}")]
    Read {
        /// 1-based row being read.
        row: u64,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The sink rejected a record.
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// A configured pipeline. Reusable across inputs.
pub struct Pipeline<'a> {
    layout: Layout,
    filter: RecordFilter,
    rules: AgencyRules,
    resolver: GeocodeResolver<'a>,
    options: PipelineOptions,
}

impl<'a> Pipeline<'a> {
    /// Builds a pipeline for the given options.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Layout`] if the field layout is invalid.
    pub fn new(
        options: PipelineOptions,
        rules: AgencyRules,
        resolver: GeocodeResolver<'a>,
    ) -> Result<Self, PipelineError> {
        let layout = Layout::parking_violations(options.coordinates)?;
        log::debug!(
            "Layout is {} bytes wide ({} columns)",
            layout.width(),
            layout.columns().len()
        );

        Ok(Self {
            layout,
            filter: RecordFilter::new(options.min_issue_date),
            rules,
            resolver,
            options,
        })
    }

    /// The options this pipeline was built with.
    #[must_use]
    pub const fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Runs every line of `input` through the pipeline into `sink`.
    ///
    /// Rows before the starting row are decoded, filtered and anonymized
    /// (so surrogate assignment replays identically) but are neither
    /// geocoded nor handed to the sink. The caller persists `index` once
    /// this returns successfully.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] on the first unreadable or undecodable
    /// line, or the first sink failure. Nothing after that row is
    /// processed.
    pub fn run(
        &self,
        mut input: impl BufRead,
        index: &mut IdentityIndex,
        sink: &mut dyn RecordSink,
        progress: &dyn ProgressCallback,
    ) -> Result<RunSummary, PipelineError> {
        let start = Instant::now();
        let starting_row = self.options.starting_row.max(1);
        let mut summary = RunSummary::default();
        let mut stats = GeocodeStats::default();
        let mut buf = Vec::new();
        let mut row = 0u64;

        if starting_row > 1 {
            log::info!("Resuming at row {starting_row}; earlier rows are replayed for ids only");
        }
        progress.set_message("Processing violations".to_string());

        loop {
            buf.clear();
            let read = input
                .read_until(b'\n', &mut buf)
                .map_err(|source| PipelineError::Read {
                    row: row + 1,
                    source,
                })?;
            if read == 0 {
                break;
            }
            row += 1;
            summary.rows_read += 1;
            progress.inc(u64::try_from(read).unwrap_or(u64::MAX));
            if row % PROGRESS_MESSAGE_INTERVAL == 0 {
                progress.set_message(format!("Processing violations (row {row})"));
            }

            let bytes = buf.strip_suffix(b"\n").unwrap_or(&buf);
            let Ok(line) = std::str::from_utf8(bytes) else {
                return Err(DecodeError::NonAscii { row }.into());
            };
            if line.trim().is_empty() {
                summary.blank_lines += 1;
                continue;
            }

            let decoded = self.layout.decode(line, row)?;
            if let Some(reason) = self.filter.rejection(&decoded) {
                log::trace!("Row {row}: dropped ({reason})");
                summary.filtered += 1;
                continue;
            }

            let anonymized = anonymize(
                decoded,
                index,
                &self.rules,
                self.options.dedup_tickets,
            );
            if row < starting_row {
                summary.skipped_by_offset += 1;
                continue;
            }

            let geocoded = self.resolver.resolve(anonymized, &mut stats);
            sink.accept(row, geocoded)?;
            summary.emitted += 1;
        }

        sink.finish()?;

        summary.batches_committed = sink.batches_committed();
        summary.last_committed_row = sink.last_committed_row();
        summary.new_plates = index.new_plates();
        summary.new_tickets = index.new_tickets();
        summary.plate_counter = index.plate_counter();
        summary.ticket_counter = index.ticket_counter();
        summary.geocode = stats;
        summary.elapsed_secs = start.elapsed().as_secs_f64();

        progress.finish(format!("Processed {row} row(s)"));
        Ok(summary)
    }
}
