//! The address-parsing capability used by the resolver.
//!
//! [`AddressParser`] is the seam: the resolver only needs a normalized
//! address, an optional postal code, and an optional street-segment id.
//! [`StreetLookupParser`] is the built-in implementation. It cleans the
//! location with [`crate::address::clean_block_address`] and looks the
//! result up in an address table (`address, seg_id, zip_code`).

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;

use crate::address::{clean_block_address, split_zip};

/// Structured result of parsing a raw location.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParsedAddress {
    /// Canonical form of the address.
    pub normalized: String,
    /// Five-digit postal code, if one could be determined.
    pub zip_code: Option<String>,
    /// Street-centerline segment id, if one could be determined.
    pub segment_id: Option<String>,
}

/// Turns raw location text into a [`ParsedAddress`].
pub trait AddressParser {
    /// Parses a raw location. Returns `None` if the text is not an address.
    fn parse(&self, raw: &str) -> Option<ParsedAddress>;
}

/// Errors loading the address lookup table.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// CSV parsing error.
    #[error("CSV error in {origin}: {source}")]
    Csv {
        /// Path or description of the CSV source.
        origin: String,
        /// Underlying CSV error.
        source: csv::Error,
    },
}

#[derive(Debug, Deserialize)]
struct LookupRow {
    address: String,
    #[serde(default, alias = "segment_id")]
    seg_id: Option<String>,
    #[serde(default, alias = "zip")]
    zip_code: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct LookupEntry {
    segment_id: Option<String>,
    zip_code: Option<String>,
}

/// Parser backed by a table of known addresses.
#[derive(Debug, Clone, Default)]
pub struct StreetLookupParser {
    entries: BTreeMap<String, LookupEntry>,
}

impl StreetLookupParser {
    /// A parser with no lookup table. It still normalizes locations and
    /// picks up trailing postal codes, but never yields a segment id.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads the lookup table from a CSV file.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, LookupError> {
        let origin = path.display().to_string();
        let reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|source| LookupError::Csv {
                origin: origin.clone(),
                source,
            })?;
        let parser = Self::from_csv(reader, &origin)?;
        log::info!(
            "Loaded {} address lookup entries from {origin}",
            parser.entries.len()
        );
        Ok(parser)
    }

    /// Loads the lookup table from any CSV source.
    ///
    /// # Errors
    ///
    /// Returns [`LookupError`] if a row cannot be parsed.
    pub fn from_reader(reader: impl Read) -> Result<Self, LookupError> {
        let reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        Self::from_csv(reader, "address lookup")
    }

    fn from_csv<R: Read>(mut reader: csv::Reader<R>, origin: &str) -> Result<Self, LookupError> {
        let mut entries = BTreeMap::new();

        for result in reader.deserialize::<LookupRow>() {
            let row = result.map_err(|source| LookupError::Csv {
                origin: origin.to_string(),
                source,
            })?;

            // Keys go through the same cleaning as ticket locations.
            let Some(key) = clean_block_address(&row.address).key() else {
                log::trace!("  skipping unusable lookup address {:?}", row.address);
                continue;
            };

            entries.insert(
                key,
                LookupEntry {
                    segment_id: non_empty(row.seg_id),
                    zip_code: non_empty(row.zip_code),
                },
            );
        }

        Ok(Self { entries })
    }

    /// Number of addresses in the lookup table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the lookup table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl AddressParser for StreetLookupParser {
    fn parse(&self, raw: &str) -> Option<ParsedAddress> {
        let (body, text_zip) = split_zip(raw);
        let cleaned = clean_block_address(body);
        let normalized = cleaned.key()?;

        let entry = self.entries.get(&normalized).or_else(|| {
            cleaned
                .swapped_key()
                .and_then(|swapped| self.entries.get(&swapped))
        });

        let (segment_id, table_zip) = entry.map_or((None, None), |e| {
            (e.segment_id.clone(), e.zip_code.clone())
        });

        Some(ParsedAddress {
            normalized,
            zip_code: table_zip.or(text_zip),
            segment_id,
        })
    }
}
