use std::future::Future;
use std::time::Duration;

use crate::error::CdcResult;
use crate::types::{BatchId, Column, ColumnType, ResolvedTable};

/// Row counts produced by one upsert/delete merge unit.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct ApplyCounts {
    /// Rows inserted or updated by the merge.
    pub inserted: u64,
    /// Rows deleted by the merge.
    pub deleted: u64,
}

impl ApplyCounts {
    pub fn merge(&mut self, other: ApplyCounts) {
        self.inserted += other.inserted;
        self.deleted += other.deleted;
    }
}

/// Trait for the relational data-access collaborator the core runs against.
///
/// The core never builds SQL itself; it names the operation and the tables
/// involved and leaves execution to the implementation. The four column DDL
/// operations are mirrored onto a table's `_History` twin when the table is
/// configured to record history, using the same column-existence check — an
/// operation against a twin that already lacks or has the column is a no-op,
/// not an error, because history and live tables can drift independently.
pub trait Database {
    fn table_exists(
        &self,
        db: &str,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = CdcResult<bool>> + Send;

    /// Returns the column list of a table with primary-key flags.
    ///
    /// A missing table yields an empty list rather than an error; a change
    /// table legitimately does not exist when it captured no changes.
    fn column_list(
        &self,
        db: &str,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = CdcResult<Vec<Column>>> + Send;

    /// Returns the column names two tables have in common, in the first
    /// table's column order.
    fn intersect_columns(
        &self,
        db: &str,
        schema: &str,
        table_a: &str,
        table_b: &str,
    ) -> impl Future<Output = CdcResult<Vec<String>>> + Send;

    fn rename_column(
        &self,
        table: &ResolvedTable,
        db: &str,
        column: &str,
        new_name: &str,
    ) -> impl Future<Output = CdcResult<()>> + Send;

    fn modify_column(
        &self,
        table: &ResolvedTable,
        db: &str,
        column: &str,
        new_type: &ColumnType,
    ) -> impl Future<Output = CdcResult<()>> + Send;

    /// Appends a new column with a default-null definition.
    fn add_column(
        &self,
        table: &ResolvedTable,
        db: &str,
        column: &str,
        new_type: &ColumnType,
    ) -> impl Future<Output = CdcResult<()>> + Send;

    fn drop_column(
        &self,
        table: &ResolvedTable,
        db: &str,
        column: &str,
    ) -> impl Future<Output = CdcResult<()>> + Send;

    /// Applies a batch's captured changes to the destination table, and to the
    /// archive twin's destination when one is paired, as a single atomic unit.
    ///
    /// Destination rows are matched to captured rows by primary key: a
    /// captured delete removes the matching destination row, a captured
    /// insert/update upserts all configured columns, untouched rows stay as
    /// they are.
    fn apply_table_changes(
        &self,
        table: &ResolvedTable,
        archive: Option<&ResolvedTable>,
        db: &str,
        ct_db: &str,
        ctid: BatchId,
        timeout: Duration,
    ) -> impl Future<Output = CdcResult<ApplyCounts>> + Send;

    /// Inserts all of `source`'s rows into `dest` over their common columns,
    /// returning the number of rows unioned.
    fn union_changes(
        &self,
        db: &str,
        schema: &str,
        source: &str,
        dest: &str,
    ) -> impl Future<Output = CdcResult<u64>> + Send;

    /// Removes duplicate-primary-key rows from a consolidated change table,
    /// keeping the first-seen row per key, and returns the number removed.
    ///
    /// Because consolidation unions batches from highest to lowest id, the
    /// first-seen row per key is the most recent one; older duplicates are
    /// superseded intermediate states.
    fn remove_duplicate_changes(
        &self,
        table: &ResolvedTable,
        db: &str,
        schema: &str,
        consolidated: &str,
    ) -> impl Future<Output = CdcResult<u64>> + Send;

    /// Merges one shard's captured rows for a batch into the relay-side
    /// per-batch change table, returning the number of rows merged.
    fn merge_shard_table(
        &self,
        table: &ResolvedTable,
        relay_db: &str,
        shard_db: &str,
        ctid: BatchId,
    ) -> impl Future<Output = CdcResult<u64>> + Send;

    /// Appends a batch's captured changes for a table into its append-only
    /// history twin, creating the twin on first use. Returns the number of
    /// rows appended.
    fn append_to_history(
        &self,
        table: &ResolvedTable,
        ct_db: &str,
        dest_db: &str,
        ctid: BatchId,
    ) -> impl Future<Output = CdcResult<u64>> + Send;

    /// Returns the number of rows in a table; a missing table counts as zero.
    fn table_row_count(
        &self,
        db: &str,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = CdcResult<u64>> + Send;
}
