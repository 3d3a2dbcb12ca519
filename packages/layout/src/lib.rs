#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Fixed-width layout decoder.
//!
//! Each field of a violation extract occupies a closed-open byte range
//! `[start, end)` of the line. A [`Layout`] is a validated, sorted list of
//! such ranges; [`Layout::decode`] slices a line and converts the slices
//! into a typed [`DecodedRecord`].

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::str::FromStr as _;

use chrono::NaiveDateTime;
use parking_violation_models::DecodedRecord;
use rust_decimal::Decimal;
use strum_macros::{AsRefStr, Display};

/// Format of the combined `issue_date` + `issue_time` fields.
pub const ISSUED_AT_FORMAT: &str = "%m/%d/%Y %H:%M";

/// A named field in the extract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Field {
    /// Ticket number.
    Ticket,
    /// Issue date, `MM/DD/YYYY`.
    IssueDate,
    /// Issue time, `HH:MM`.
    IssueTime,
    /// Plate registration state.
    State,
    /// License plate.
    Plate,
    /// Issuing division.
    Division,
    /// Location text.
    Location,
    /// Violation description.
    ViolationDesc,
    /// Fine amount.
    Fine,
    /// Issuing agency code.
    IssuingAgency,
    /// Supplied latitude.
    Lat,
    /// Supplied longitude.
    Lon,
}

impl Field {
    const REQUIRED: [Self; 10] = [
        Self::Ticket,
        Self::IssueDate,
        Self::IssueTime,
        Self::State,
        Self::Plate,
        Self::Division,
        Self::Location,
        Self::ViolationDesc,
        Self::Fine,
        Self::IssuingAgency,
    ];
}

/// One column of the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    /// Field carried by this column.
    pub field: Field,
    /// Inclusive start offset.
    pub start: usize,
    /// Exclusive end offset.
    pub end: usize,
}

impl Column {
    /// Creates a column spanning `[start, end)`.
    #[must_use]
    pub const fn new(field: Field, start: usize, end: usize) -> Self {
        Self { field, start, end }
    }
}

/// Errors building a [`Layout`].
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    /// A column's range is empty or reversed.
    #[error("Column {field} has an empty range [{start}, {end})")]
    EmptyRange {
        /// Offending field.
        field: Field,
        /// Start offset.
        start: usize,
        /// End offset.
        end: usize,
    },

    /// Two columns share bytes.
    #[error("Column {second} starts at {start}, inside column {first}")]
    Overlap {
        /// Earlier column.
        first: Field,
        /// Later column.
        second: Field,
        /// Start offset of the later column.
        start: usize,
    },

    /// A field is declared more than once.
    #[error("Field {0} is declared more than once")]
    DuplicateField(Field),

    /// A required field has no column.
    #[error("Layout is missing required field {0}")]
    MissingField(Field),

    /// Only one of `lat`/`lon` is declared.
    #[error("Layout must declare both lat and lon, or neither")]
    UnpairedCoordinates,
}

/// Errors decoding a single line. All of them are fatal for the run.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// Line is wider than the layout.
    #[error("Row {row}: line is {len} bytes, layout is {width} bytes wide")]
    LineTooLong {
        /// 1-based row number.
        row: u64,
        /// Actual length.
        len: usize,
        /// Declared layout width.
        width: usize,
    },

    /// Line contains non-ASCII bytes, so byte offsets are meaningless.
    #[error("Row {row}: line contains non-ASCII characters")]
    NonAscii {
        /// 1-based row number.
        row: u64,
    },

    /// Issue date/time did not parse.
    #[error("Row {row}: invalid issue timestamp {value:?}: {source}")]
    InvalidTimestamp {
        /// 1-based row number.
        row: u64,
        /// Combined date and time text.
        value: String,
        /// Underlying parse error.
        source: chrono::ParseError,
    },

    /// Fine did not parse as a decimal.
    #[error("Row {row}: invalid fine {value:?}: {source}")]
    InvalidFine {
        /// 1-based row number.
        row: u64,
        /// Fine text.
        value: String,
        /// Underlying parse error.
        source: rust_decimal::Error,
    },

    /// A coordinate field is present but not numeric.
    #[error("Row {row}: invalid {field} {value:?}: {source}")]
    InvalidCoordinate {
        /// 1-based row number.
        row: u64,
        /// `lat` or `lon`.
        field: Field,
        /// Coordinate text.
        value: String,
        /// Underlying parse error.
        source: std::num::ParseFloatError,
    },
}

/// A validated fixed-width layout.
#[derive(Debug, Clone)]
pub struct Layout {
    columns: Vec<Column>,
    ranges: BTreeMap<Field, (usize, usize)>,
    width: usize,
}

impl Layout {
    /// Builds a layout from columns in any order.
    ///
    /// Columns are sorted by start offset. Gaps between columns are
    /// allowed and skipped during decoding.
    ///
    /// # Errors
    ///
    /// Returns [`LayoutError`] if a range is empty, two ranges overlap, a
    /// field repeats, a required field is missing, or only one coordinate
    /// column is declared.
    pub fn new(mut columns: Vec<Column>) -> Result<Self, LayoutError> {
        columns.sort_by_key(|c| c.start);

        let mut ranges = BTreeMap::new();
        let mut previous: Option<Column> = None;

        for column in &columns {
            if column.end <= column.start {
                return Err(LayoutError::EmptyRange {
                    field: column.field,
                    start: column.start,
                    end: column.end,
                });
            }
            if let Some(prev) = previous
                && column.start < prev.end
            {
                return Err(LayoutError::Overlap {
                    first: prev.field,
                    second: column.field,
                    start: column.start,
                });
            }
            if ranges
                .insert(column.field, (column.start, column.end))
                .is_some()
            {
                return Err(LayoutError::DuplicateField(column.field));
            }
            previous = Some(*column);
        }

        if let Some(missing) = Field::REQUIRED.iter().find(|f| !ranges.contains_key(*f)) {
            return Err(LayoutError::MissingField(*missing));
        }
        if ranges.contains_key(&Field::Lat) != ranges.contains_key(&Field::Lon) {
            return Err(LayoutError::UnpairedCoordinates);
        }

        let width = columns.last().map_or(0, |c| c.end);

        Ok(Self {
            columns,
            ranges,
            width,
        })
    }

    /// The parking violation extract layout.
    ///
    /// With `coordinates`, two 15-byte columns for latitude and longitude
    /// follow the issuing agency.
    ///
    /// # Errors
    ///
    /// Never fails for the built-in columns; the `Result` mirrors
    /// [`Layout::new`].
    pub fn parking_violations(coordinates: bool) -> Result<Self, LayoutError> {
        let mut columns = vec![
            Column::new(Field::Ticket, 0, 11),
            Column::new(Field::IssueDate, 11, 21),
            Column::new(Field::IssueTime, 21, 26),
            Column::new(Field::State, 26, 28),
            Column::new(Field::Plate, 28, 36),
            Column::new(Field::Division, 36, 40),
            Column::new(Field::Location, 40, 75),
            Column::new(Field::ViolationDesc, 75, 95),
            Column::new(Field::Fine, 95, 104),
            Column::new(Field::IssuingAgency, 104, 110),
        ];
        if coordinates {
            columns.push(Column::new(Field::Lat, 110, 125));
            columns.push(Column::new(Field::Lon, 125, 140));
        }
        Self::new(columns)
    }

    /// Total declared width in bytes.
    #[must_use]
    pub const fn width(&self) -> usize {
        self.width
    }

    /// Columns sorted by start offset.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Whether the layout carries coordinate columns.
    #[must_use]
    pub fn has_coordinates(&self) -> bool {
        self.ranges.contains_key(&Field::Lat)
    }

    /// Slices one field out of a padded line, trimmed. Returns an empty
    /// string for fields the layout does not declare.
    fn slice<'a>(&self, line: &'a str, field: Field) -> &'a str {
        self.ranges
            .get(&field)
            .map_or("", |&(start, end)| line[start..end].trim())
    }

    /// Decodes one line into a typed record.
    ///
    /// A trailing `\r` is dropped and short lines are right-padded with
    /// spaces to the layout width before slicing.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the line is too long, is not ASCII, or a
    /// timestamp, fine, or coordinate field does not parse.
    pub fn decode(&self, line: &str, row: u64) -> Result<DecodedRecord, DecodeError> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if !line.is_ascii() {
            return Err(DecodeError::NonAscii { row });
        }
        if line.len() > self.width {
            return Err(DecodeError::LineTooLong {
                row,
                len: line.len(),
                width: self.width,
            });
        }

        let padded: Cow<'_, str> = if line.len() < self.width {
            Cow::Owned(format!("{line:<width$}", width = self.width))
        } else {
            Cow::Borrowed(line)
        };
        let field = |f| self.slice(&padded, f);

        let timestamp = format!("{} {}", field(Field::IssueDate), field(Field::IssueTime));
        let issued_at =
            NaiveDateTime::parse_from_str(&timestamp, ISSUED_AT_FORMAT).map_err(|source| {
                DecodeError::InvalidTimestamp {
                    row,
                    value: timestamp.clone(),
                    source,
                }
            })?;

        let fine_text = field(Field::Fine);
        let fine = Decimal::from_str(fine_text).map_err(|source| DecodeError::InvalidFine {
            row,
            value: fine_text.to_string(),
            source,
        })?;

        let lat = parse_coordinate(row, Field::Lat, field(Field::Lat))?;
        let lon = parse_coordinate(row, Field::Lon, field(Field::Lon))?;

        Ok(DecodedRecord {
            ticket_number: field(Field::Ticket).to_string(),
            issued_at,
            state: field(Field::State).to_string(),
            plate: field(Field::Plate).to_string(),
            division: normalize_division(field(Field::Division)),
            location: field(Field::Location).to_string(),
            violation_desc: field(Field::ViolationDesc).to_string(),
            fine,
            issuing_agency: field(Field::IssuingAgency).to_string(),
            lat,
            lon,
        })
    }
}

/// Maps blank and all-zero divisions (`"0000"`, `"00"`) to `None`.
#[must_use]
pub fn normalize_division(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.bytes().all(|b| b == b'0') {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Parses a coordinate field. Blank and zero values mean "not supplied".
fn parse_coordinate(row: u64, field: Field, value: &str) -> Result<Option<f64>, DecodeError> {
    if value.is_empty() {
        return Ok(None);
    }
    let parsed = value
        .parse::<f64>()
        .map_err(|source| DecodeError::InvalidCoordinate {
            row,
            field,
            value: value.to_string(),
            source,
        })?;
    if parsed == 0.0 {
        return Ok(None);
    }
    Ok(Some(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a line from `(width, value)` pairs, left-aligning each value.
    fn line(fields: &[(usize, &str)]) -> String {
        fields
            .iter()
            .map(|(width, value)| format!("{value:<width$}"))
            .collect()
    }

    fn sample_line(division: &str, agency: &str) -> String {
        line(&[
            (11, "12345678901"),
            (10, "01/15/2018"),
            (5, "08:30"),
            (2, "PA"),
            (8, "ABC1234"),
            (4, division),
            (35, "1500 MARKET ST"),
            (20, "METER EXPIRED CC"),
            (9, "    36.00"),
            (6, agency),
        ])
    }

    #[test]
    fn decodes_padded_fields() {
        let layout = Layout::parking_violations(false).unwrap();
        let record = layout.decode(&sample_line("0000", "PPA"), 1).unwrap();

        assert_eq!(record.ticket_number, "12345678901");
        assert_eq!(record.state, "PA");
        assert_eq!(record.plate, "ABC1234");
        assert_eq!(record.division, None);
        assert_eq!(record.location, "1500 MARKET ST");
        assert_eq!(record.violation_desc, "METER EXPIRED CC");
        assert_eq!(record.fine, Decimal::new(3600, 2));
        assert_eq!(record.issuing_agency, "PPA");
        assert_eq!(
            record.issued_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2018-01-15 08:30:00"
        );
        assert_eq!(record.lat, None);
        assert_eq!(record.lon, None);
    }

    #[test]
    fn pads_short_lines() {
        let layout = Layout::parking_violations(false).unwrap();
        let full = sample_line("", "PPA");
        let short = full.trim_end();
        assert!(short.len() < layout.width());

        let record = layout.decode(short, 7).unwrap();
        assert_eq!(record.issuing_agency, "PPA");
    }

    #[test]
    fn drops_trailing_carriage_return() {
        let layout = Layout::parking_violations(false).unwrap();
        let line = format!("{}\r", sample_line("", "PPA"));
        assert!(layout.decode(&line, 1).is_ok());
    }

    #[test]
    fn rejects_long_lines() {
        let layout = Layout::parking_violations(false).unwrap();
        let line = format!("{}EXTRA", sample_line("", "PPA"));
        assert!(matches!(
            layout.decode(&line, 3),
            Err(DecodeError::LineTooLong {
                row: 3,
                width: 110,
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_ascii() {
        let layout = Layout::parking_violations(false).unwrap();
        let line = sample_line("", "PPA").replace("MARKET", "MÄRKET");
        assert!(matches!(
            layout.decode(&line, 2),
            Err(DecodeError::NonAscii { row: 2 })
        ));
    }

    #[test]
    fn rejects_bad_timestamp() {
        let layout = Layout::parking_violations(false).unwrap();
        let line = sample_line("", "PPA").replace("01/15/2018", "13/45/2018");
        assert!(matches!(
            layout.decode(&line, 4),
            Err(DecodeError::InvalidTimestamp { row: 4, .. })
        ));
    }

    #[test]
    fn rejects_bad_fine() {
        let layout = Layout::parking_violations(false).unwrap();
        let line = sample_line("", "PPA").replace("    36.00", "   THIRTY");
        assert!(matches!(
            layout.decode(&line, 5),
            Err(DecodeError::InvalidFine { row: 5, .. })
        ));
    }

    #[test]
    fn decodes_coordinates_when_present() {
        let layout = Layout::parking_violations(true).unwrap();
        let line = format!(
            "{}{:<15}{:<15}",
            sample_line("", "PPA"),
            "39.952",
            "-75.163"
        );
        let record = layout.decode(&line, 1).unwrap();
        assert_eq!(record.supplied_coordinates(), Some((39.952, -75.163)));
    }

    #[test]
    fn zero_or_blank_coordinates_are_missing() {
        let layout = Layout::parking_violations(true).unwrap();
        let line = format!("{}{:<15}{:<15}", sample_line("", "PPA"), "0", "");
        let record = layout.decode(&line, 1).unwrap();
        assert_eq!(record.lat, None);
        assert_eq!(record.lon, None);
    }

    #[test]
    fn rejects_non_numeric_coordinates() {
        let layout = Layout::parking_violations(true).unwrap();
        let line = format!("{}{:<15}{:<15}", sample_line("", "PPA"), "north", "-75.1");
        assert!(matches!(
            layout.decode(&line, 9),
            Err(DecodeError::InvalidCoordinate {
                row: 9,
                field: Field::Lat,
                ..
            })
        ));
    }

    #[test]
    fn normalizes_zero_divisions() {
        assert_eq!(normalize_division("0000"), None);
        assert_eq!(normalize_division("00"), None);
        assert_eq!(normalize_division("  "), None);
        assert_eq!(normalize_division(" 0012"), Some("0012".to_string()));
    }

    #[test]
    fn sorts_columns_and_skips_gaps() {
        let mut columns = Layout::parking_violations(false)
            .unwrap()
            .columns()
            .to_vec();
        columns.reverse();
        // Shift the agency column right to leave a two-byte gap.
        if let Some(agency) = columns.iter_mut().find(|c| c.field == Field::IssuingAgency) {
            agency.start = 106;
            agency.end = 112;
        }
        let layout = Layout::new(columns).unwrap();
        assert_eq!(layout.columns()[0].field, Field::Ticket);
        assert_eq!(layout.width(), 112);

        let line = format!("{}XX{:<6}", &sample_line("", "")[..104], "POLICE");
        let record = layout.decode(&line, 1).unwrap();
        assert_eq!(record.issuing_agency, "POLICE");
    }

    #[test]
    fn rejects_overlapping_columns() {
        let mut columns = Layout::parking_violations(false)
            .unwrap()
            .columns()
            .to_vec();
        columns[1].start = 10;
        assert!(matches!(
            Layout::new(columns),
            Err(LayoutError::Overlap {
                first: Field::Ticket,
                second: Field::IssueDate,
                start: 10,
            })
        ));
    }

    #[test]
    fn rejects_missing_and_unpaired_fields() {
        let columns: Vec<Column> = Layout::parking_violations(false)
            .unwrap()
            .columns()
            .iter()
            .copied()
            .filter(|c| c.field != Field::Fine)
            .collect();
        assert!(matches!(
            Layout::new(columns),
            Err(LayoutError::MissingField(Field::Fine))
        ));

        let mut columns = Layout::parking_violations(false)
            .unwrap()
            .columns()
            .to_vec();
        columns.push(Column::new(Field::Lat, 110, 120));
        assert!(matches!(
            Layout::new(columns),
            Err(LayoutError::UnpairedCoordinates)
        ));
    }
}
