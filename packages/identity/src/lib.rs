#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Identity index: stable surrogate ids for plates and ticket numbers.
//!
//! Two mappings are kept, each with a monotonic counter:
//!
//! - plates: `(state, plate)` -> `{id, date_added}`
//! - tickets: `ticket_number` -> `anon_ticket_number`
//!
//! The index is loaded from CSV at the start of a run, mutated as records
//! are anonymized, and persisted back at the end. On load each counter is
//! set to the largest id present, so ids assigned by a later run never
//! collide with earlier ones.
//!
//! The index has a single writer. Two runs sharing the same files at the
//! same time will hand out overlapping ids.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// Suffix appended to a repeated ticket number under dedup mode.
pub const DUPLICATE_MARKER: &str = "E";

/// Which of the two mappings an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Mapping {
    /// `(state, plate)` mapping.
    Plate,
    /// Ticket number mapping.
    Ticket,
}

/// Errors loading or persisting the identity index.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// File could not be opened, written, or renamed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path involved.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// CSV could not be read or written (includes non-numeric ids).
    #[error("CSV error in {origin}: {source}")]
    Csv {
        /// Path or description of the CSV source.
        origin: String,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// The same surrogate id appears twice.
    #[error("Corrupt {mapping} index {origin}: id {id} is assigned more than once")]
    DuplicateId {
        /// Mapping being loaded.
        mapping: Mapping,
        /// Path or description of the CSV source.
        origin: String,
        /// Repeated id.
        id: i64,
    },

    /// The same key appears twice.
    #[error("Corrupt {mapping} index {origin}: key {key:?} appears more than once")]
    DuplicateKey {
        /// Mapping being loaded.
        mapping: Mapping,
        /// Path or description of the CSV source.
        origin: String,
        /// Repeated key.
        key: String,
    },

    /// An id is zero or negative.
    #[error("Corrupt {mapping} index {origin}: id {id} is not positive")]
    InvalidId {
        /// Mapping being loaded.
        mapping: Mapping,
        /// Path or description of the CSV source.
        origin: String,
        /// Offending id.
        id: i64,
    },
}

/// Key of the plate mapping.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlateKey {
    /// Registration state.
    pub state: String,
    /// License plate.
    pub plate: String,
}

/// Value of the plate mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlateEntry {
    /// Surrogate id.
    pub id: i64,
    /// Date the plate was first seen.
    pub date_added: NaiveDate,
}

#[derive(Debug, Serialize, Deserialize)]
struct PlateRow {
    id: i64,
    plate: String,
    state: String,
    date_added: NaiveDate,
}

#[derive(Debug, Serialize, Deserialize)]
struct TicketRow {
    ticket_number: String,
    anon_ticket_number: i64,
}

/// The two surrogate mappings and their counters.
#[derive(Debug, Clone)]
pub struct IdentityIndex {
    plates: BTreeMap<PlateKey, PlateEntry>,
    tickets: BTreeMap<String, i64>,
    plate_counter: i64,
    ticket_counter: i64,
    new_plates: u64,
    new_tickets: u64,
    today: NaiveDate,
}

impl Default for IdentityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityIndex {
    /// Creates an empty index with both counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            plates: BTreeMap::new(),
            tickets: BTreeMap::new(),
            plate_counter: 0,
            ticket_counter: 0,
            new_plates: 0,
            new_tickets: 0,
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Overrides the date stamped on newly seen plates.
    #[must_use]
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Loads the index from the plate and ticket CSV files.
    ///
    /// A `None` path, or a path that does not exist yet, starts that
    /// mapping empty.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if a file cannot be read, a row does not
    /// parse, or the file holds duplicate or non-positive ids or duplicate
    /// keys.
    pub fn load(plates: Option<&Path>, tickets: Option<&Path>) -> Result<Self, IdentityError> {
        let mut index = Self::new();

        if let Some(path) = plates
            && let Some(file) = open_existing(path)?
        {
            index.read_plates(file, &path.display().to_string())?;
        }
        if let Some(path) = tickets
            && let Some(file) = open_existing(path)?
        {
            index.read_tickets(file, &path.display().to_string())?;
        }

        log::info!(
            "Loaded identity index: {} plates (counter {}), {} tickets (counter {})",
            index.plates.len(),
            index.plate_counter,
            index.tickets.len(),
            index.ticket_counter,
        );

        Ok(index)
    }

    /// Loads the index from in-memory CSV sources.
    ///
    /// # Errors
    ///
    /// Same as [`IdentityIndex::load`].
    pub fn load_from_readers(plates: impl Read, tickets: impl Read) -> Result<Self, IdentityError> {
        let mut index = Self::new();
        index.read_plates(plates, "plates")?;
        index.read_tickets(tickets, "tickets")?;
        Ok(index)
    }

    fn read_plates(&mut self, reader: impl Read, origin: &str) -> Result<(), IdentityError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut seen_ids = std::collections::BTreeSet::new();

        for result in csv_reader.deserialize::<PlateRow>() {
            let row = result.map_err(|source| IdentityError::Csv {
                origin: origin.to_string(),
                source,
            })?;
            check_id(Mapping::Plate, origin, row.id, &mut seen_ids)?;

            let key = PlateKey {
                state: row.state,
                plate: row.plate,
            };
            if self.plates.contains_key(&key) {
                return Err(IdentityError::DuplicateKey {
                    mapping: Mapping::Plate,
                    origin: origin.to_string(),
                    key: format!("{}/{}", key.state, key.plate),
                });
            }

            self.plate_counter = self.plate_counter.max(row.id);
            self.plates.insert(
                key,
                PlateEntry {
                    id: row.id,
                    date_added: row.date_added,
                },
            );
        }

        Ok(())
    }

    fn read_tickets(&mut self, reader: impl Read, origin: &str) -> Result<(), IdentityError> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let mut seen_ids = std::collections::BTreeSet::new();

        for result in csv_reader.deserialize::<TicketRow>() {
            let row = result.map_err(|source| IdentityError::Csv {
                origin: origin.to_string(),
                source,
            })?;
            check_id(Mapping::Ticket, origin, row.anon_ticket_number, &mut seen_ids)?;

            if self.tickets.contains_key(&row.ticket_number) {
                return Err(IdentityError::DuplicateKey {
                    mapping: Mapping::Ticket,
                    origin: origin.to_string(),
                    key: row.ticket_number,
                });
            }

            self.ticket_counter = self.ticket_counter.max(row.anon_ticket_number);
            self.tickets
                .insert(row.ticket_number, row.anon_ticket_number);
        }

        Ok(())
    }

    /// Returns the surrogate id for `(state, plate)`, assigning the next id
    /// if the pair has not been seen before.
    pub fn assign_plate(&mut self, state: &str, plate: &str) -> i64 {
        let key = PlateKey {
            state: state.to_string(),
            plate: plate.to_string(),
        };
        if let Some(entry) = self.plates.get(&key) {
            return entry.id;
        }

        self.plate_counter += 1;
        self.new_plates += 1;
        let id = self.plate_counter;
        self.plates.insert(
            key,
            PlateEntry {
                id,
                date_added: self.today,
            },
        );
        id
    }

    /// Returns the surrogate id for a ticket number.
    ///
    /// An unseen ticket gets the next id. A seen ticket keeps its id unless
    /// `dedup` is set, in which case this occurrence is recorded as a
    /// distinct ticket under a suffixed key (`{ticket}E`, then `{ticket}E2`,
    /// `{ticket}E3`, ...) with a fresh id. The original entry is never
    /// touched.
    pub fn assign_ticket(&mut self, ticket: &str, dedup: bool) -> i64 {
        let key = match self.tickets.get(ticket) {
            None => ticket.to_string(),
            Some(&id) if !dedup => return id,
            Some(_) => {
                let key = self.duplicate_key(ticket);
                log::debug!("Duplicate ticket number {ticket}, recording as {key}");
                key
            }
        };

        self.ticket_counter += 1;
        self.new_tickets += 1;
        let id = self.ticket_counter;
        self.tickets.insert(key, id);
        id
    }

    fn duplicate_key(&self, ticket: &str) -> String {
        let mut occurrence = 1u32;
        loop {
            let key = if occurrence == 1 {
                format!("{ticket}{DUPLICATE_MARKER}")
            } else {
                format!("{ticket}{DUPLICATE_MARKER}{occurrence}")
            };
            if !self.tickets.contains_key(&key) {
                return key;
            }
            occurrence += 1;
        }
    }

    /// Looks up a plate id without assigning one.
    #[must_use]
    pub fn plate(&self, state: &str, plate: &str) -> Option<PlateEntry> {
        self.plates
            .get(&PlateKey {
                state: state.to_string(),
                plate: plate.to_string(),
            })
            .copied()
    }

    /// Looks up a ticket id without assigning one.
    #[must_use]
    pub fn ticket(&self, ticket: &str) -> Option<i64> {
        self.tickets.get(ticket).copied()
    }

    /// Largest plate id handed out so far.
    #[must_use]
    pub const fn plate_counter(&self) -> i64 {
        self.plate_counter
    }

    /// Largest ticket id handed out so far.
    #[must_use]
    pub const fn ticket_counter(&self) -> i64 {
        self.ticket_counter
    }

    /// Number of plate entries.
    #[must_use]
    pub fn plate_count(&self) -> usize {
        self.plates.len()
    }

    /// Number of ticket entries (including suffixed duplicates).
    #[must_use]
    pub fn ticket_count(&self) -> usize {
        self.tickets.len()
    }

    /// Plates added since load.
    #[must_use]
    pub const fn new_plates(&self) -> u64 {
        self.new_plates
    }

    /// Tickets added since load.
    #[must_use]
    pub const fn new_tickets(&self) -> u64 {
        self.new_tickets
    }

    /// Writes the plate mapping as CSV (`id, plate, state, date_added`),
    /// ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Csv`] if writing fails.
    pub fn write_plates(&self, writer: impl Write) -> Result<(), IdentityError> {
        let mut rows: Vec<PlateRow> = self
            .plates
            .iter()
            .map(|(key, entry)| PlateRow {
                id: entry.id,
                plate: key.plate.clone(),
                state: key.state.clone(),
                date_added: entry.date_added,
            })
            .collect();
        rows.sort_by_key(|r| r.id);
        write_rows(writer, &rows, "plates")
    }

    /// Writes the ticket mapping as CSV
    /// (`ticket_number, anon_ticket_number`), ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Csv`] if writing fails.
    pub fn write_tickets(&self, writer: impl Write) -> Result<(), IdentityError> {
        let mut rows: Vec<TicketRow> = self
            .tickets
            .iter()
            .map(|(ticket, &id)| TicketRow {
                ticket_number: ticket.clone(),
                anon_ticket_number: id,
            })
            .collect();
        rows.sort_by_key(|r| r.anon_ticket_number);
        write_rows(writer, &rows, "tickets")
    }

    /// Persists both mappings, replacing the files atomically.
    ///
    /// Each mapping is written to a sibling `.tmp` file which is then
    /// renamed over the destination.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if any file cannot be written or renamed.
    pub fn persist(&self, plates: &Path, tickets: &Path) -> Result<(), IdentityError> {
        replace_file(plates, |file| self.write_plates(file))?;
        replace_file(tickets, |file| self.write_tickets(file))?;

        log::info!(
            "Persisted identity index: {} plates ({} new) to {}, {} tickets ({} new) to {}",
            self.plates.len(),
            self.new_plates,
            plates.display(),
            self.tickets.len(),
            self.new_tickets,
            tickets.display(),
        );

        Ok(())
    }
}

fn check_id(
    mapping: Mapping,
    origin: &str,
    id: i64,
    seen: &mut std::collections::BTreeSet<i64>,
) -> Result<(), IdentityError> {
    if id <= 0 {
        return Err(IdentityError::InvalidId {
            mapping,
            origin: origin.to_string(),
            id,
        });
    }
    if !seen.insert(id) {
        return Err(IdentityError::DuplicateId {
            mapping,
            origin: origin.to_string(),
            id,
        });
    }
    Ok(())
}

fn open_existing(path: &Path) -> Result<Option<File>, IdentityError> {
    match File::open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!(
                "Identity index file {} does not exist, starting empty",
                path.display()
            );
            Ok(None)
        }
        Err(source) => Err(IdentityError::Io {
            path: path.display().to_string(),
            source,
        }),
    }
}

fn write_rows<T: Serialize>(
    writer: impl Write,
    rows: &[T],
    origin: &str,
) -> Result<(), IdentityError> {
    let csv_err = |source| IdentityError::Csv {
        origin: origin.to_string(),
        source,
    };

    let mut csv_writer = csv::Writer::from_writer(writer);
    for row in rows {
        csv_writer.serialize(row).map_err(csv_err)?;
    }
    csv_writer
        .flush()
        .map_err(|e| csv_err(csv::Error::from(e)))?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

fn replace_file(
    path: &Path,
    write: impl FnOnce(&mut File) -> Result<(), IdentityError>,
) -> Result<(), IdentityError> {
    let io_err = |p: &Path| {
        let p = p.display().to_string();
        move |source| IdentityError::Io { path: p, source }
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    let tmp = temp_path(path);
    let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
    write(&mut file)?;
    file.sync_all().map_err(io_err(&tmp))?;
    drop(file);

    std::fs::rename(&tmp, path).map_err(io_err(path))
}
