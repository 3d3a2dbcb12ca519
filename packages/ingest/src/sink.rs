//! Destinations for fully transformed records.
//!
//! `run` hands records to a [`BatchLoader`]; `transform` writes them as CSV
//! through [`CsvSink`].

use std::io::Write;

use parking_database::{BatchLoader, DbError, LoadError, ViolationStore, store::point_shape};
use parking_violation_models::GeocodedRecord;
use rust_decimal::Decimal;
use serde::Serialize;

/// Errors raised by a [`RecordSink`].
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// Committing a batch to the store failed.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Preparing an output value failed.
    #[error(transparent)]
    Db(#[from] DbError),

    /// Writing CSV output failed.
    #[error("CSV output error: {0}")]
    Csv(#[from] csv::Error),

    /// Flushing output failed.
    #[error("Output error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives geocoded records in input order.
pub trait RecordSink {
    /// Accepts the record read from input row `row_number` (1-based).
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the record cannot be written.
    fn accept(&mut self, row_number: u64, record: GeocodedRecord) -> Result<(), SinkError>;

    /// Writes out anything still buffered. Called once, after the last row.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the final write fails.
    fn finish(&mut self) -> Result<(), SinkError>;

    /// Batches committed so far, for sinks that commit in batches.
    fn batches_committed(&self) -> u64 {
        0
    }

    /// Input row ending the last committed batch, if any.
    fn last_committed_row(&self) -> Option<u64> {
        None
    }
}

impl<S: ViolationStore> RecordSink for BatchLoader<S> {
    fn accept(&mut self, row_number: u64, record: GeocodedRecord) -> Result<(), SinkError> {
        self.append(row_number, record)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.flush()?;
        Ok(())
    }

    fn batches_committed(&self) -> u64 {
        Self::batches_committed(self)
    }

    fn last_committed_row(&self) -> Option<u64> {
        Self::last_committed_row(self)
    }
}

/// One CSV output row. Columns match the store's final table.
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    id: u64,
    anon_ticket_number: i64,
    issue_datetime: String,
    state: &'a str,
    anon_plate_id: i64,
    division: Option<&'a str>,
    location: &'a str,
    violation_desc: &'a str,
    fine: Decimal,
    issuing_agency: &'a str,
    lat: Option<f64>,
    lon: Option<f64>,
    gps: bool,
    zip_code: Option<&'a str>,
    shape: Option<String>,
}

/// Writes records as CSV with a header row.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvSink<W> {
    /// Wraps a writer.
    pub fn new(writer: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
        }
    }

    /// Flushes and returns the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] if the final flush fails.
    pub fn into_inner(self) -> Result<W, SinkError> {
        self.writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))
    }
}

impl<W: Write> RecordSink for CsvSink<W> {
    fn accept(&mut self, row_number: u64, record: GeocodedRecord) -> Result<(), SinkError> {
        let shape = record
            .coordinates()
            .map(|(lat, lon)| point_shape(lat, lon))
            .transpose()?;

        self.writer.serialize(ExportRow {
            id: row_number,
            anon_ticket_number: record.anon_ticket_number,
            issue_datetime: record.issued_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            state: &record.state,
            anon_plate_id: record.anon_plate_id,
            division: record.division.as_deref(),
            location: &record.location,
            violation_desc: &record.violation_desc,
            fine: record.fine,
            issuing_agency: &record.issuing_agency,
            lat: record.lat,
            lon: record.lon,
            gps: record.gps,
            zip_code: record.zip_code.as_deref(),
            shape,
        })?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn record(coordinates: Option<(f64, f64)>) -> GeocodedRecord {
        GeocodedRecord {
            anon_ticket_number: 4,
            issued_at: NaiveDate::from_ymd_opt(2018, 1, 15)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap(),
            state: "PA".to_string(),
            anon_plate_id: 9,
            division: None,
            location: "1500 MARKET ST".to_string(),
            violation_desc: "METER EXPIRED".to_string(),
            fine: Decimal::new(3600, 2),
            issuing_agency: "PPA".to_string(),
            lat: coordinates.map(|(lat, _)| lat),
            lon: coordinates.map(|(_, lon)| lon),
            gps: false,
            zip_code: Some("19102".to_string()),
        }
    }

    #[test]
    fn csv_sink_writes_header_and_rows() {
        let mut sink = CsvSink::new(Vec::new());
        sink.accept(3, record(Some((39.95, -75.16)))).unwrap();
        sink.accept(4, record(None)).unwrap();
        sink.finish().unwrap();

        let text = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "id,anon_ticket_number,issue_datetime,state,anon_plate_id,division,location,\
             violation_desc,fine,issuing_agency,lat,lon,gps,zip_code,shape"
        );

        let mut reader = csv::Reader::from_reader(text.as_bytes());
        let rows: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "3");
        assert_eq!(&rows[0][2], "2018-01-15 08:30:00");
        assert_eq!(&rows[0][5], "");
        assert_eq!(&rows[0][8], "36.00");
        assert_eq!(&rows[0][12], "false");
        assert!(rows[0][14].contains("Point"));
        assert_eq!(&rows[1][10], "");
        assert_eq!(&rows[1][14], "");
    }

    #[test]
    fn loader_sink_reports_batches() {
        let store = parking_database::DuckDbStore::open_in_memory().unwrap();
        let mut loader = BatchLoader::new(store, 1);

        RecordSink::accept(&mut loader, 1, record(None)).unwrap();
        RecordSink::finish(&mut loader).unwrap();

        assert_eq!(RecordSink::batches_committed(&loader), 1);
        assert_eq!(RecordSink::last_committed_row(&loader), Some(1));
    }
}
