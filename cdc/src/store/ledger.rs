use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;

use crate::error::CdcResult;
use crate::schema::SchemaChangeEvent;
use crate::types::{Batch, BatchId, BatchScope, ResolvedTable, Stage, StageVector};

/// Trait for the batch ledger: the persisted record of batch identity and
/// stage-completion state per tier.
///
/// The ledger is the only resource mutated across scopes. Stage writes are
/// conditional ("set bit only if not already set") so repeated stage execution
/// is idempotent at the ledger level; the next invocation of a run is fully
/// self-describing from ledger state alone.
///
/// Implementations should ensure thread-safety and handle concurrent access to the data.
pub trait LedgerStore {
    /// Returns the highest-id batch this scope has ever processed, if any.
    fn last_batch(
        &self,
        db: &str,
        scope: &BatchScope,
    ) -> impl Future<Output = CdcResult<Option<Batch>>> + Send;

    /// Returns one batch of this scope by id.
    fn batch(
        &self,
        db: &str,
        ctid: BatchId,
        scope: &BatchScope,
    ) -> impl Future<Output = CdcResult<Option<Batch>>> + Send;

    /// Returns every batch of this scope whose stage vector is not yet
    /// complete, in ascending id order.
    fn incomplete_batches(
        &self,
        db: &str,
        scope: &BatchScope,
    ) -> impl Future<Output = CdcResult<Vec<Batch>>> + Send;

    /// Returns relay-scope batches newer than `ctid` that have `required` set,
    /// in ascending id order.
    fn pending_batches_after(
        &self,
        db: &str,
        ctid: BatchId,
        required: Stage,
    ) -> impl Future<Output = CdcResult<Vec<Batch>>> + Send;

    /// Creates a ledger row for `batch` in the given scope.
    ///
    /// Creating a row that already exists is a no-op, so re-running discovery
    /// after a crash cannot duplicate batches.
    fn create_batch(
        &self,
        db: &str,
        batch: &Batch,
        scope: &BatchScope,
    ) -> impl Future<Output = CdcResult<()>> + Send;

    /// Creates a new relay-scope batch with the next available id.
    fn open_batch(
        &self,
        db: &str,
        sync_start_version: i64,
        sync_stop_version: i64,
    ) -> impl Future<Output = CdcResult<Batch>> + Send;

    /// Sets the given stage bits on a batch, returning `true` if any bit was
    /// newly set. Bits already set are left untouched, never cleared.
    fn set_stages(
        &self,
        db: &str,
        ctid: BatchId,
        stages: StageVector,
        scope: &BatchScope,
    ) -> impl Future<Output = CdcResult<bool>> + Send;

    /// Reads the current stage vector of a batch.
    fn read_stages(
        &self,
        db: &str,
        ctid: BatchId,
        scope: &BatchScope,
    ) -> impl Future<Output = CdcResult<StageVector>> + Send;

    /// Marks a batch complete: the full stage vector plus the one-time stop
    /// time. Marking an already-complete batch leaves its stop time untouched.
    fn mark_batch_complete(
        &self,
        db: &str,
        ctid: BatchId,
        stop_time: DateTime<Utc>,
        scope: &BatchScope,
    ) -> impl Future<Output = CdcResult<()>> + Send;

    /// Records that a batch was folded into a later one: its vector becomes
    /// complete so it is never rediscovered, but it receives no stop time of
    /// its own — completion belongs to the superseding batch.
    fn supersede_batch(
        &self,
        db: &str,
        ctid: BatchId,
        by: BatchId,
        scope: &BatchScope,
    ) -> impl Future<Output = CdcResult<()>> + Send;

    /// Removes all of a batch's ledger state in the given database, the
    /// compensating action when shard schemas turn out to be out of sync.
    fn revert_batch(&self, db: &str, ctid: BatchId) -> impl Future<Output = CdcResult<()>> + Send;

    /// Returns the DDL events recorded for a batch, in no particular order.
    fn schema_changes(
        &self,
        db: &str,
        ctid: BatchId,
    ) -> impl Future<Output = CdcResult<Vec<SchemaChangeEvent>>> + Send;

    /// Copies the schema-change set of a batch from one database to another,
    /// returning the number of events published.
    fn publish_schema_changes(
        &self,
        source_db: &str,
        dest_db: &str,
        ctid: BatchId,
    ) -> impl Future<Output = CdcResult<u64>> + Send;

    /// Records the expected row count for one table of a batch, used by
    /// downstream row-count reconciliation.
    fn publish_table_info(
        &self,
        db: &str,
        ctid: BatchId,
        table: &ResolvedTable,
        expected_rows: u64,
    ) -> impl Future<Output = CdcResult<()>> + Send;

    /// Returns the expected row counts recorded for a batch, keyed by table name.
    fn expected_row_counts(
        &self,
        db: &str,
        ctid: BatchId,
    ) -> impl Future<Output = CdcResult<HashMap<String, u64>>> + Send;
}
