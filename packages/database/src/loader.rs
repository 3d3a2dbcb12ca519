//! Batched, idempotent loading into a [`ViolationStore`].
//!
//! Records are buffered until `batch_size` is reached, then committed as
//! one transaction:
//!
//! ```text
//! ACCUMULATING -> STAGING -> RECONCILING -> COMMITTED -> ACCUMULATING
//!                    \             \
//!                     +-------------+--> FAILED
//! ```
//!
//! Reconciling deletes final rows sharing a ticket id with the staged
//! batch before copying it in, so replaying a batch that was already
//! (fully or partly) committed converges on the same content. A failed
//! batch is rolled back and the loader refuses further rows; recovery is
//! a restart from a row at or before the failed batch's first row.

use std::time::{Duration, Instant};

use parking_violation_models::GeocodedRecord;
use strum_macros::{AsRefStr, Display};

use crate::DbError;
use crate::store::{StagedRow, StoreTransaction, ViolationStore};

/// Upper bound on the buffer's up-front allocation.
const PREALLOCATE_LIMIT: usize = 10_000;

/// Where the loader is in the commit protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum LoaderState {
    /// Buffering rows for the next batch.
    Accumulating,
    /// Writing the batch to the staging table.
    Staging,
    /// Deleting conflicts, copying staging to final, clearing staging.
    Reconciling,
    /// The last batch committed.
    Committed,
    /// A batch failed and was rolled back. Terminal.
    Failed,
}

/// Errors from [`BatchLoader`].
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// A batch failed and was rolled back.
    #[error("Batch of rows {first_row}-{last_row} failed while {state}: {source}")]
    Batch {
        /// First input row of the batch.
        first_row: u64,
        /// Last input row of the batch.
        last_row: u64,
        /// Protocol step that failed.
        state: LoaderState,
        /// Underlying store error.
        source: DbError,
    },

    /// A row was offered after an earlier batch failed.
    #[error("Loader halted after a failed batch; restart the run from row {restart_row}")]
    Halted {
        /// First row of the failed batch.
        restart_row: u64,
    },
}

/// Outcome of one committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// First input row of the batch.
    pub first_row: u64,
    /// Last input row of the batch.
    pub last_row: u64,
    /// Rows staged.
    pub rows: u64,
    /// Stale final rows removed before the copy.
    pub deleted: u64,
    /// Rows copied into the final table.
    pub inserted: u64,
    /// Wall time of the transaction.
    pub elapsed: Duration,
}

/// Buffers records and commits them in fixed-size atomic batches.
pub struct BatchLoader<S: ViolationStore> {
    store: S,
    batch_size: usize,
    buffer: Vec<StagedRow>,
    state: LoaderState,
    batches_committed: u64,
    rows_committed: u64,
    last_committed_row: Option<u64>,
    failed_at: Option<u64>,
}

impl<S: ViolationStore> BatchLoader<S> {
    /// Creates a loader committing every `batch_size` rows (at least 1).
    pub fn new(store: S, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            batch_size,
            buffer: Vec::with_capacity(batch_size.min(PREALLOCATE_LIMIT)),
            state: LoaderState::Accumulating,
            batches_committed: 0,
            rows_committed: 0,
            last_committed_row: None,
            failed_at: None,
        }
    }

    /// Buffers one record, committing the batch when it is full.
    ///
    /// Returns the report of the batch this row completed, if any.
    ///
    /// # Errors
    ///
    /// Returns [`LoadError::Batch`] if committing the full batch failed
    /// (it has been rolled back), or [`LoadError::Halted`] if an earlier
    /// batch failed.
    pub fn append(
        &mut self,
        row_number: u64,
        record: GeocodedRecord,
    ) -> Result<Option<BatchReport>, LoadError> {
        self.ensure_running()?;
        self.buffer.push(StagedRow { row_number, record });

        if self.buffer.len() >= self.batch_size {
            self.commit_buffer()
        } else {
            Ok(None)
        }
    }

    /// Commits whatever is buffered. A no-op when the buffer is empty.
    ///
    /// # Errors
    ///
    /// Same as [`BatchLoader::append`].
    pub fn flush(&mut self) -> Result<Option<BatchReport>, LoadError> {
        self.ensure_running()?;
        self.commit_buffer()
    }

    fn ensure_running(&self) -> Result<(), LoadError> {
        match self.failed_at {
            Some(restart_row) => Err(LoadError::Halted { restart_row }),
            None => Ok(()),
        }
    }

    fn commit_buffer(&mut self) -> Result<Option<BatchReport>, LoadError> {
        let (Some(first), Some(last)) = (self.buffer.first(), self.buffer.last()) else {
            return Ok(None);
        };
        let (first_row, last_row) = (first.row_number, last.row_number);

        log::info!("Upserting batch: {first_row} - {last_row}");
        let start = Instant::now();

        match run_protocol(&mut self.store, &self.buffer, &mut self.state) {
            Ok((deleted, inserted)) => {
                let elapsed = start.elapsed();
                let rows = self.buffer.len() as u64;
                self.buffer.clear();
                self.batches_committed += 1;
                self.rows_committed += rows;
                self.last_committed_row = Some(last_row);
                self.state = LoaderState::Accumulating;

                if deleted > 0 {
                    log::debug!("  replaced {deleted} previously loaded row(s)");
                }
                log::info!("Batch upserted - runtime {:.2}s", elapsed.as_secs_f64());

                Ok(Some(BatchReport {
                    first_row,
                    last_row,
                    rows,
                    deleted,
                    inserted,
                    elapsed,
                }))
            }
            Err((state, source)) => {
                self.state = LoaderState::Failed;
                self.failed_at = Some(first_row);
                log::error!("Batch {first_row} - {last_row} rolled back while {state}: {source}");
                Err(LoadError::Batch {
                    first_row,
                    last_row,
                    state,
                    source,
                })
            }
        }
    }

    /// Current protocol state.
    #[must_use]
    pub const fn state(&self) -> LoaderState {
        self.state
    }

    /// Rows buffered and not yet committed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Batches committed so far.
    #[must_use]
    pub const fn batches_committed(&self) -> u64 {
        self.batches_committed
    }

    /// Rows committed so far.
    #[must_use]
    pub const fn rows_committed(&self) -> u64 {
        self.rows_committed
    }

    /// Input row number ending the last committed batch.
    #[must_use]
    pub const fn last_committed_row(&self) -> Option<u64> {
        self.last_committed_row
    }

    /// The wrapped store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// The wrapped store, mutably.
    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Consumes the loader, returning the store. Buffered rows are dropped.
    pub fn into_store(self) -> S {
        if !self.buffer.is_empty() {
            log::warn!("Discarding {} uncommitted row(s)", self.buffer.len());
        }
        self.store
    }
}

type StepFailure = (LoaderState, DbError);

fn run_protocol<S: ViolationStore>(
    store: &mut S,
    rows: &[StagedRow],
    state: &mut LoaderState,
) -> Result<(u64, u64), StepFailure> {
    *state = LoaderState::Staging;
    let mut txn = store.begin().map_err(|e| (LoaderState::Staging, e))?;

    match reconcile(txn.as_mut(), rows, state) {
        Ok(counts) => {
            txn.commit().map_err(|e| (LoaderState::Reconciling, e))?;
            *state = LoaderState::Committed;
            Ok(counts)
        }
        Err(failure) => {
            if let Err(e) = txn.rollback() {
                log::error!("Rollback failed: {e}");
            }
            Err(failure)
        }
    }
}

fn reconcile(
    txn: &mut (dyn StoreTransaction + '_),
    rows: &[StagedRow],
    state: &mut LoaderState,
) -> Result<(u64, u64), StepFailure> {
    let staged = txn.stage(rows).map_err(|e| (LoaderState::Staging, e))?;
    log::trace!("  staged {staged} row(s)");

    *state = LoaderState::Reconciling;
    let at = |e| (LoaderState::Reconciling, e);
    let deleted = txn.delete_conflicts().map_err(at)?;
    let inserted = txn.copy_staging_to_final().map_err(at)?;
    txn.clear_staging().map_err(at)?;

    Ok((deleted, inserted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{record, staged};
    use crate::store::{DuckDbStore, FINAL_TABLE};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Stage,
        Delete,
        Copy,
        Commit,
    }

    /// Store that fails a chosen protocol step.
    struct FlakyStore {
        inner: DuckDbStore,
        fail_on: Option<Step>,
    }

    struct FlakyTransaction<'a> {
        inner: Box<dyn StoreTransaction + 'a>,
        fail_on: Option<Step>,
    }

    impl FlakyTransaction<'_> {
        fn check(&self, step: Step) -> Result<(), DbError> {
            if self.fail_on == Some(step) {
                return Err(DbError::Conversion {
                    message: format!("injected failure at {step:?}"),
                });
            }
            Ok(())
        }
    }

    impl StoreTransaction for FlakyTransaction<'_> {
        fn stage(&mut self, rows: &[StagedRow]) -> Result<u64, DbError> {
            let staged = self.inner.stage(rows)?;
            self.check(Step::Stage)?;
            Ok(staged)
        }

        fn delete_conflicts(&mut self) -> Result<u64, DbError> {
            let deleted = self.inner.delete_conflicts()?;
            self.check(Step::Delete)?;
            Ok(deleted)
        }

        fn copy_staging_to_final(&mut self) -> Result<u64, DbError> {
            let inserted = self.inner.copy_staging_to_final()?;
            self.check(Step::Copy)?;
            Ok(inserted)
        }

        fn clear_staging(&mut self) -> Result<u64, DbError> {
            self.inner.clear_staging()
        }

        fn commit(self: Box<Self>) -> Result<(), DbError> {
            self.check(Step::Commit)?;
            let this = *self;
            this.inner.commit()
        }

        fn rollback(self: Box<Self>) -> Result<(), DbError> {
            let this = *self;
            this.inner.rollback()
        }
    }

    impl ViolationStore for FlakyStore {
        fn begin(&mut self) -> Result<Box<dyn StoreTransaction + '_>, DbError> {
            let fail_on = self.fail_on;
            Ok(Box::new(FlakyTransaction {
                inner: self.inner.begin()?,
                fail_on,
            }))
        }
    }

    fn flaky() -> FlakyStore {
        FlakyStore {
            inner: DuckDbStore::open_in_memory().unwrap(),
            fail_on: None,
        }
    }

    fn locations(store: &DuckDbStore) -> Vec<(i64, i64, String)> {
        let mut stmt = store
            .connection()
            .prepare(&format!(
                "SELECT id, anon_ticket_number, location FROM {FINAL_TABLE} ORDER BY id"
            ))
            .unwrap();
        stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn load_all(loader: &mut BatchLoader<impl ViolationStore>, rows: &[StagedRow]) {
        for row in rows {
            loader.append(row.row_number, row.record.clone()).unwrap();
        }
        loader.flush().unwrap();
    }

    #[test]
    fn commits_full_batches_and_flushes_remainder() {
        let mut loader = BatchLoader::new(DuckDbStore::open_in_memory().unwrap(), 2);
        let mut reports = Vec::new();

        for n in 1..=5 {
            let ticket = 100 + i64::try_from(n).unwrap();
            if let Some(report) = loader.append(n, record(ticket, "A ST", None)).unwrap() {
                reports.push(report);
            }
        }
        assert_eq!(loader.pending(), 1);
        reports.extend(loader.flush().unwrap());

        let spans: Vec<(u64, u64)> = reports.iter().map(|r| (r.first_row, r.last_row)).collect();
        assert_eq!(spans, vec![(1, 2), (3, 4), (5, 5)]);
        assert_eq!(loader.batches_committed(), 3);
        assert_eq!(loader.rows_committed(), 5);
        assert_eq!(loader.last_committed_row(), Some(5));
        assert_eq!(loader.state(), LoaderState::Accumulating);
        assert_eq!(loader.store().row_count().unwrap(), 5);
        assert_eq!(loader.store().staging_row_count().unwrap(), 0);
    }

    #[test]
    fn flush_on_empty_buffer_is_a_no_op() {
        let mut loader = BatchLoader::new(DuckDbStore::open_in_memory().unwrap(), 10);
        assert_eq!(loader.flush().unwrap(), None);
        assert_eq!(loader.batches_committed(), 0);
    }

    #[test]
    fn zero_batch_size_commits_every_row() {
        let mut loader = BatchLoader::new(DuckDbStore::open_in_memory().unwrap(), 0);
        let report = loader.append(1, record(1, "A ST", None)).unwrap();
        assert!(report.is_some());
    }

    #[test]
    fn replaying_committed_batches_is_idempotent() {
        let rows: Vec<StagedRow> = (1..=4)
            .map(|n| staged(n, 200 + i64::try_from(n).unwrap(), "1500 MARKET ST"))
            .collect();

        let mut loader = BatchLoader::new(DuckDbStore::open_in_memory().unwrap(), 3);
        load_all(&mut loader, &rows);
        let before = locations(loader.store());

        let mut loader = BatchLoader::new(loader.into_store(), 3);
        load_all(&mut loader, &rows);

        assert_eq!(loader.store().row_count().unwrap(), 4);
        assert_eq!(locations(loader.store()), before);
    }

    #[test]
    fn replay_after_partial_load_converges() {
        let rows: Vec<StagedRow> = (1..=4)
            .map(|n| staged(n, 300 + i64::try_from(n).unwrap(), "2 ELM ST"))
            .collect();

        let mut loader = BatchLoader::new(DuckDbStore::open_in_memory().unwrap(), 10);
        load_all(&mut loader, &rows[..2]);
        assert_eq!(loader.store().row_count().unwrap(), 2);

        let mut loader = BatchLoader::new(loader.into_store(), 10);
        load_all(&mut loader, &rows);
        let report_rows = loader.rows_committed();

        assert_eq!(report_rows, 4);
        assert_eq!(loader.store().row_count().unwrap(), 4);
    }

    #[test]
    fn replay_replaces_stale_content_for_same_ticket() {
        let mut loader = BatchLoader::new(DuckDbStore::open_in_memory().unwrap(), 10);
        load_all(&mut loader, &[staged(1, 7, "OLD ST")]);
        load_all(&mut loader, &[staged(1, 7, "NEW ST")]);

        assert_eq!(
            locations(loader.store()),
            vec![(1, 7, "NEW ST".to_string())]
        );
    }

    #[test]
    fn failed_reconcile_rolls_back_and_halts() {
        let mut loader = BatchLoader::new(flaky(), 2);
        load_all(&mut loader, &[staged(1, 10, "A ST"), staged(2, 11, "B ST")]);
        let before = locations(&loader.store().inner);

        loader.store_mut().fail_on = Some(Step::Copy);
        loader.append(3, record(10, "CHANGED", None)).unwrap();
        let err = loader.append(4, record(12, "C ST", None)).unwrap_err();

        match err {
            LoadError::Batch {
                first_row,
                last_row,
                state,
                ..
            } => {
                assert_eq!((first_row, last_row), (3, 4));
                assert_eq!(state, LoaderState::Reconciling);
            }
            LoadError::Halted { .. } => panic!("expected a batch failure"),
        }
        assert_eq!(loader.state(), LoaderState::Failed);
        assert_eq!(locations(&loader.store().inner), before);
        assert_eq!(loader.store().inner.staging_row_count().unwrap(), 0);

        assert!(matches!(
            loader.append(5, record(13, "D ST", None)),
            Err(LoadError::Halted { restart_row: 3 })
        ));
        assert!(matches!(loader.flush(), Err(LoadError::Halted { .. })));
    }

    #[test]
    fn failed_staging_reports_staging_state() {
        let mut store = flaky();
        store.fail_on = Some(Step::Stage);
        let mut loader = BatchLoader::new(store, 1);

        let err = loader.append(1, record(1, "A ST", None)).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Batch {
                state: LoaderState::Staging,
                ..
            }
        ));
        assert_eq!(loader.store().inner.row_count().unwrap(), 0);
        assert_eq!(loader.store().inner.staging_row_count().unwrap(), 0);
    }

    #[test]
    fn failed_delete_and_commit_leave_store_unchanged() {
        for step in [Step::Delete, Step::Commit] {
            let mut loader = BatchLoader::new(flaky(), 1);
            load_all(&mut loader, &[staged(1, 1, "A ST")]);

            loader.store_mut().fail_on = Some(step);
            assert!(loader.append(2, record(1, "B ST", None)).is_err());
            assert_eq!(
                locations(&loader.store().inner),
                vec![(1, 1, "A ST".to_string())],
                "step {step:?}"
            );
        }
    }
}
