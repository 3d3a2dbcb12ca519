//! Violation storage in `DuckDB`.
//!
//! Two tables share one column layout: `parking_violations` (final) and
//! `parking_violations_staging`. A batch is written to staging, then
//! reconciled into the final table by business key (`anon_ticket_number`)
//! inside a single transaction.
//!
//! Neither table has a primary key. `DuckDB` rejects deleting and
//! re-inserting a constrained key within one transaction.

use std::path::Path;

use duckdb::Connection;
use parking_violation_models::GeocodedRecord;

use crate::DbError;

/// Final violations table.
pub const FINAL_TABLE: &str = "parking_violations";

/// Staging table with the same columns as [`FINAL_TABLE`].
pub const STAGING_TABLE: &str = "parking_violations_staging";

/// Timestamp text handed to `DuckDB` for `CAST(? AS TIMESTAMP)`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const COLUMNS: &str = "id, anon_ticket_number, issue_datetime, state, anon_plate_id, \
                       division, location, violation_desc, fine, issuing_agency, \
                       lat, lon, gps, zip_code, shape";

fn table_ddl(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id BIGINT NOT NULL,
            anon_ticket_number BIGINT NOT NULL,
            issue_datetime TIMESTAMP NOT NULL,
            state TEXT,
            anon_plate_id BIGINT NOT NULL,
            division TEXT,
            location TEXT,
            violation_desc TEXT,
            fine DECIMAL(12, 2) NOT NULL,
            issuing_agency TEXT,
            lat DOUBLE,
            lon DOUBLE,
            gps BOOLEAN NOT NULL,
            zip_code TEXT,
            shape TEXT
        );"
    )
}

/// A record paired with the input row it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRow {
    /// 1-based input row number; stored as the `id` column.
    pub row_number: u64,
    /// The transformed record.
    pub record: GeocodedRecord,
}

/// One open store transaction, exposing the steps of the commit protocol.
///
/// Dropping a transaction without calling [`StoreTransaction::commit`]
/// must leave the final table untouched.
pub trait StoreTransaction {
    /// Writes rows into the staging table. Returns the number written.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if a row cannot be converted or written.
    fn stage(&mut self, rows: &[StagedRow]) -> Result<u64, DbError>;

    /// Deletes final rows whose ticket id also appears in staging.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the delete fails.
    fn delete_conflicts(&mut self) -> Result<u64, DbError>;

    /// Copies every staging row into the final table.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the insert fails.
    fn copy_staging_to_final(&mut self) -> Result<u64, DbError>;

    /// Empties the staging table.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the delete fails.
    fn clear_staging(&mut self) -> Result<u64, DbError>;

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the commit fails.
    fn commit(self: Box<Self>) -> Result<(), DbError>;

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the rollback fails.
    fn rollback(self: Box<Self>) -> Result<(), DbError>;
}

/// A store that can open transactions for the commit protocol.
pub trait ViolationStore {
    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the transaction cannot be started.
    fn begin(&mut self) -> Result<Box<dyn StoreTransaction + '_>, DbError>;
}

/// `DuckDB`-backed [`ViolationStore`].
pub struct DuckDbStore {
    conn: Connection,
}

impl DuckDbStore {
    /// Opens (or creates) the store at `path` and ensures the schema.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the directory, connection, or schema cannot
    /// be created.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            crate::paths::ensure_dir(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self::from_connection(conn)?;
        log::debug!("Opened violations store at {}", path.display());
        Ok(store)
    }

    /// Opens a transient in-memory store.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema cannot be created.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wraps an existing connection and ensures the schema.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the schema cannot be created.
    pub fn from_connection(conn: Connection) -> Result<Self, DbError> {
        create_schema(&conn)?;
        Ok(Self { conn })
    }

    /// The underlying connection, for ad-hoc queries.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Rows in the final table.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn row_count(&self) -> Result<u64, DbError> {
        count_rows(&self.conn, FINAL_TABLE)
    }

    /// Rows in the staging table. Zero between batches.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn staging_row_count(&self) -> Result<u64, DbError> {
        count_rows(&self.conn, STAGING_TABLE)
    }

    /// Highest input row number present in the final table.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn max_row_number(&self) -> Result<Option<u64>, DbError> {
        let mut stmt = self.conn.prepare(&format!("SELECT MAX(id) FROM {FINAL_TABLE}"))?;
        let max: Option<i64> = stmt.query_row([], |row| row.get(0))?;
        Ok(max.and_then(|v| u64::try_from(v).ok()))
    }
}

impl ViolationStore for DuckDbStore {
    fn begin(&mut self) -> Result<Box<dyn StoreTransaction + '_>, DbError> {
        Ok(Box::new(DuckDbTransaction {
            txn: self.conn.transaction()?,
        }))
    }
}

/// Creates the final and staging tables if they do not exist.
///
/// # Errors
///
/// Returns [`DbError`] if the DDL fails.
pub fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(&format!(
        "{}\n{}",
        table_ddl(FINAL_TABLE),
        table_ddl(STAGING_TABLE)
    ))?;
    Ok(())
}

fn count_rows(conn: &Connection, table: &str) -> Result<u64, DbError> {
    let mut stmt = conn.prepare(&format!("SELECT COUNT(*) FROM {table}"))?;
    let count: i64 = stmt.query_row([], |row| row.get(0))?;
    u64::try_from(count).map_err(|e| DbError::Conversion {
        message: format!("negative row count in {table}: {e}"),
    })
}

/// GeoJSON Point text (`[lon, lat]`) for the `shape` column.
///
/// # Errors
///
/// Returns [`DbError::Conversion`] if the geometry cannot be serialized.
pub fn point_shape(lat: f64, lon: f64) -> Result<String, DbError> {
    let geometry = geojson::Geometry::new(geojson::Value::Point(vec![lon, lat]));
    serde_json::to_string(&geometry).map_err(|e| DbError::Conversion {
        message: format!("failed to serialize point ({lat}, {lon}): {e}"),
    })
}

struct DuckDbTransaction<'conn> {
    txn: duckdb::Transaction<'conn>,
}

fn affected(count: usize) -> u64 {
    u64::try_from(count).unwrap_or(u64::MAX)
}

impl StoreTransaction for DuckDbTransaction<'_> {
    fn stage(&mut self, rows: &[StagedRow]) -> Result<u64, DbError> {
        let mut stmt = self.txn.prepare(&format!(
            "INSERT INTO {STAGING_TABLE} ({COLUMNS})
             VALUES (?, ?, CAST(? AS TIMESTAMP), ?, ?, ?, ?, ?, CAST(? AS DECIMAL(12, 2)), ?, ?, ?, ?, ?, ?)"
        ))?;

        let mut staged = 0u64;
        for row in rows {
            let r = &row.record;
            let id = i64::try_from(row.row_number).map_err(|e| DbError::Conversion {
                message: format!("row number {} out of range: {e}", row.row_number),
            })?;
            let issued_at = r.issued_at.format(TIMESTAMP_FORMAT).to_string();
            let fine = r.fine.round_dp(2).to_string();
            let shape = r
                .coordinates()
                .map(|(lat, lon)| point_shape(lat, lon))
                .transpose()?;

            stmt.execute(duckdb::params![
                id,
                r.anon_ticket_number,
                issued_at,
                r.state,
                r.anon_plate_id,
                r.division.as_deref(),
                r.location,
                r.violation_desc,
                fine,
                r.issuing_agency,
                r.lat,
                r.lon,
                r.gps,
                r.zip_code.as_deref(),
                shape,
            ])?;
            staged += 1;
        }

        Ok(staged)
    }

    fn delete_conflicts(&mut self) -> Result<u64, DbError> {
        let deleted = self.txn.execute(
            &format!(
                "DELETE FROM {FINAL_TABLE}
                 WHERE anon_ticket_number IN (SELECT anon_ticket_number FROM {STAGING_TABLE})"
            ),
            [],
        )?;
        Ok(affected(deleted))
    }

    fn copy_staging_to_final(&mut self) -> Result<u64, DbError> {
        let inserted = self.txn.execute(
            &format!(
                "INSERT INTO {FINAL_TABLE} ({COLUMNS})
                 SELECT {COLUMNS} FROM {STAGING_TABLE}"
            ),
            [],
        )?;
        Ok(affected(inserted))
    }

    fn clear_staging(&mut self) -> Result<u64, DbError> {
        let cleared = self.txn.execute(&format!("DELETE FROM {STAGING_TABLE}"), [])?;
        Ok(affected(cleared))
    }

    fn commit(self: Box<Self>) -> Result<(), DbError> {
        let this = *self;
        this.txn.commit()?;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<(), DbError> {
        let this = *self;
        this.txn.rollback()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    use super::*;

    pub fn record(ticket: i64, location: &str, coordinates: Option<(f64, f64)>) -> GeocodedRecord {
        GeocodedRecord {
            anon_ticket_number: ticket,
            issued_at: NaiveDate::from_ymd_opt(2018, 1, 15)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap(),
            state: "PA".to_string(),
            anon_plate_id: ticket * 10,
            division: None,
            location: location.to_string(),
            violation_desc: "METER EXPIRED".to_string(),
            fine: Decimal::new(3600, 2),
            issuing_agency: "PPA".to_string(),
            lat: coordinates.map(|(lat, _)| lat),
            lon: coordinates.map(|(_, lon)| lon),
            gps: coordinates.is_some(),
            zip_code: Some("19102".to_string()),
        }
    }

    pub fn staged(row_number: u64, ticket: i64, location: &str) -> StagedRow {
        StagedRow {
            row_number,
            record: record(ticket, location, None),
        }
    }

    #[test]
    fn schema_creation_is_repeatable() {
        let store = DuckDbStore::open_in_memory().unwrap();
        create_schema(store.connection()).unwrap();
        assert_eq!(store.row_count().unwrap(), 0);
        assert_eq!(store.staging_row_count().unwrap(), 0);
        assert_eq!(store.max_row_number().unwrap(), None);
    }

    #[test]
    fn protocol_steps_move_rows_from_staging_to_final() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        let rows = vec![staged(1, 100, "1500 MARKET ST"), staged(2, 101, "2 ELM ST")];

        {
            let mut txn = store.begin().unwrap();
            assert_eq!(txn.stage(&rows).unwrap(), 2);
            assert_eq!(txn.delete_conflicts().unwrap(), 0);
            assert_eq!(txn.copy_staging_to_final().unwrap(), 2);
            assert_eq!(txn.clear_staging().unwrap(), 2);
            txn.commit().unwrap();
        }

        assert_eq!(store.row_count().unwrap(), 2);
        assert_eq!(store.staging_row_count().unwrap(), 0);
        assert_eq!(store.max_row_number().unwrap(), Some(2));
    }

    #[test]
    fn columns_round_trip_through_duckdb_types() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        let row = StagedRow {
            row_number: 7,
            record: record(55, "1500 MARKET ST", Some((39.95, -75.16))),
        };

        {
            let mut txn = store.begin().unwrap();
            txn.stage(std::slice::from_ref(&row)).unwrap();
            txn.copy_staging_to_final().unwrap();
            txn.clear_staging().unwrap();
            txn.commit().unwrap();
        }

        let mut stmt = store
            .connection()
            .prepare(&format!(
                "SELECT id, CAST(issue_datetime AS TEXT), CAST(fine AS TEXT), gps, lat, shape
                 FROM {FINAL_TABLE}"
            ))
            .unwrap();
        let (id, issued, fine, gps, lat, shape): (i64, String, String, bool, Option<f64>, Option<String>) =
            stmt.query_row([], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
            })
            .unwrap();

        assert_eq!(id, 7);
        assert_eq!(issued, "2018-01-15 08:30:00");
        assert_eq!(fine, "36.00");
        assert!(gps);
        assert_eq!(lat, Some(39.95));
        let shape: serde_json::Value = serde_json::from_str(&shape.unwrap()).unwrap();
        assert_eq!(shape["type"], "Point");
        assert_eq!(shape["coordinates"][0], -75.16);
        assert_eq!(shape["coordinates"][1], 39.95);
    }

    #[test]
    fn unresolved_rows_have_no_shape() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        {
            let mut txn = store.begin().unwrap();
            txn.stage(&[staged(1, 100, "NOWHERE")]).unwrap();
            txn.copy_staging_to_final().unwrap();
            txn.commit().unwrap();
        }

        let mut stmt = store
            .connection()
            .prepare(&format!("SELECT COUNT(*) FROM {FINAL_TABLE} WHERE shape IS NULL"))
            .unwrap();
        let nulls: i64 = stmt.query_row([], |r| r.get(0)).unwrap();
        assert_eq!(nulls, 1);
    }

    #[test]
    fn dropped_transaction_leaves_final_table_untouched() {
        let mut store = DuckDbStore::open_in_memory().unwrap();
        {
            let mut txn = store.begin().unwrap();
            txn.stage(&[staged(1, 100, "A ST")]).unwrap();
            txn.copy_staging_to_final().unwrap();
        }

        assert_eq!(store.row_count().unwrap(), 0);
        assert_eq!(store.staging_row_count().unwrap(), 0);
    }
}
