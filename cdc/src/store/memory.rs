use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{CdcError, CdcResult, ErrorKind};
use crate::schema::SchemaChangeEvent;
use crate::store::copy::TableCopier;
use crate::store::database::{ApplyCounts, Database};
use crate::store::ledger::LedgerStore;
use crate::types::{
    Batch, BatchId, BatchScope, Cell, ChangeOperation, ChangeRow, ChangeTable, Column, ColumnType,
    ResolvedTable, Stage, StageVector,
};
use crate::{bail, cdc_error};

/// One stored table: its column list, declared types and rows.
///
/// Destination tables and change tables share this shape; for destination
/// tables the per-row operation and version are write artifacts with no
/// further meaning.
#[derive(Debug, Clone, Default)]
struct TableData {
    columns: Vec<Column>,
    column_types: BTreeMap<String, ColumnType>,
    rows: Vec<ChangeRow>,
}

impl TableData {
    fn with_columns(columns: Vec<Column>) -> Self {
        Self {
            columns,
            column_types: BTreeMap::new(),
            rows: Vec::new(),
        }
    }

    fn definition_only(&self) -> Self {
        Self {
            columns: self.columns.clone(),
            column_types: self.column_types.clone(),
            rows: Vec::new(),
        }
    }

    fn has_column(&self, name: &str) -> bool {
        self.columns
            .iter()
            .any(|column| column.name.eq_ignore_ascii_case(name))
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn rename_column(&mut self, from: &str, to: &str) {
        for column in &mut self.columns {
            if column.name.eq_ignore_ascii_case(from) {
                column.name = to.to_string();
            }
        }

        if let Some(key) = self.type_key(from)
            && let Some(column_type) = self.column_types.remove(&key)
        {
            self.column_types.insert(to.to_string(), column_type);
        }

        for row in &mut self.rows {
            let key = row
                .values
                .keys()
                .find(|k| k.eq_ignore_ascii_case(from))
                .cloned();
            if let Some(key) = key
                && let Some(value) = row.values.remove(&key)
            {
                row.values.insert(to.to_string(), value);
            }
        }
    }

    fn set_column_type(&mut self, column: &str, column_type: ColumnType) {
        let key = self.type_key(column).unwrap_or_else(|| column.to_string());
        self.column_types.insert(key, column_type);
    }

    fn add_column(&mut self, column: &str, column_type: ColumnType) {
        self.columns.push(Column::new(column, false));
        self.column_types.insert(column.to_string(), column_type);

        // New columns default to null on every existing row.
        for row in &mut self.rows {
            row.values.insert(column.to_string(), Cell::Null);
        }
    }

    fn drop_column(&mut self, column: &str) {
        self.columns.retain(|c| !c.name.eq_ignore_ascii_case(column));

        if let Some(key) = self.type_key(column) {
            self.column_types.remove(&key);
        }

        for row in &mut self.rows {
            let key = row
                .values
                .keys()
                .find(|k| k.eq_ignore_ascii_case(column))
                .cloned();
            if let Some(key) = key {
                row.values.remove(&key);
            }
        }
    }

    fn type_key(&self, column: &str) -> Option<String> {
        self.column_types
            .keys()
            .find(|k| k.eq_ignore_ascii_case(column))
            .cloned()
    }
}

/// Projects rows onto the given columns, keeping operation and version.
fn project_rows(rows: &[ChangeRow], columns: &[String]) -> Vec<ChangeRow> {
    rows.iter()
        .map(|row| {
            let mut projected = ChangeRow::new(row.operation, row.version);
            for column in columns {
                if let Some(value) = row.value(column) {
                    projected.values.insert(column.clone(), value.clone());
                }
            }

            projected
        })
        .collect()
}

#[derive(Debug, Clone)]
struct BatchRow {
    batch: Batch,
    superseded_by: Option<BatchId>,
}

type TableKey = (String, String, String);

#[derive(Debug, Default)]
struct Inner {
    /// Tables keyed by (database, schema, table name).
    tables: HashMap<TableKey, TableData>,
    /// Ledger rows keyed by (database, scope), ordered by batch id.
    batches: HashMap<(String, BatchScope), BTreeMap<BatchId, BatchRow>>,
    /// Captured DDL events keyed by (database, batch id).
    schema_events: HashMap<(String, BatchId), Vec<SchemaChangeEvent>>,
    /// Expected row counts keyed by (database, batch id), then table name.
    table_info: HashMap<(String, BatchId), HashMap<String, u64>>,
}

impl Inner {
    fn table_key(db: &str, schema: &str, table: &str) -> TableKey {
        (db.to_string(), schema.to_string(), table.to_string())
    }

    fn table(&self, db: &str, schema: &str, table: &str) -> Option<&TableData> {
        self.tables.get(&Self::table_key(db, schema, table))
    }

    fn table_mut(&mut self, db: &str, schema: &str, table: &str) -> Option<&mut TableData> {
        self.tables.get_mut(&Self::table_key(db, schema, table))
    }

    fn batch_row_mut(
        &mut self,
        db: &str,
        ctid: BatchId,
        scope: &BatchScope,
    ) -> CdcResult<&mut BatchRow> {
        self.batches
            .get_mut(&(db.to_string(), scope.clone()))
            .and_then(|rows| rows.get_mut(&ctid))
            .ok_or_else(|| {
                cdc_error!(
                    ErrorKind::InvalidBatchState,
                    "batch does not exist in the ledger",
                    format!("database {db}, scope {scope}, batch {ctid}")
                )
            })
    }

    /// Applies one table's captured changes onto a staged destination clone.
    fn merge_unit(
        table: &ResolvedTable,
        change_rows: &[ChangeRow],
        dest: &mut TableData,
    ) -> CdcResult<ApplyCounts> {
        let primary_keys = table.primary_keys();
        if primary_keys.is_empty() {
            bail!(
                ErrorKind::InvalidData,
                "cannot apply changes to a table without a primary key",
                table.qualified_name()
            );
        }

        let configured: Vec<String> = table.columns().iter().map(|c| c.name.clone()).collect();
        if configured.is_empty() {
            bail!(
                ErrorKind::InvalidData,
                "cannot apply changes to a table without a resolved field list",
                table.qualified_name()
            );
        }

        let mut counts = ApplyCounts::default();
        for change in change_rows {
            let key = change.key(&primary_keys);
            let existing = dest
                .rows
                .iter()
                .position(|row| row.key(&primary_keys) == key);

            if change.operation.is_delete() {
                if let Some(position) = existing {
                    dest.rows.remove(position);
                    counts.deleted += 1;
                }
                continue;
            }

            match existing {
                Some(position) => {
                    let row = &mut dest.rows[position];
                    for column in &configured {
                        if let Some(value) = change.value(column) {
                            row.values.insert(column.clone(), value.clone());
                        }
                    }
                    row.version = change.version;
                }
                None => {
                    let mut row = ChangeRow::new(ChangeOperation::Insert, change.version);
                    for column in &configured {
                        if let Some(value) = change.value(column) {
                            row.values.insert(column.clone(), value.clone());
                        }
                    }
                    dest.rows.push(row);
                }
            }
            counts.inserted += 1;
        }

        Ok(counts)
    }
}

/// In-memory implementation of all three collaborator traits.
///
/// Backs unit and scenario tests, mirroring a real deployment closely enough
/// that pipeline behavior (resumption, idempotence, consolidation) can be
/// exercised without a database.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table with the given columns, replacing any existing one.
    pub async fn create_table(&self, db: &str, schema: &str, table: &str, columns: Vec<Column>) {
        let mut inner = self.inner.lock().await;
        inner.tables.insert(
            Inner::table_key(db, schema, table),
            TableData::with_columns(columns),
        );
    }

    /// Appends rows to an existing table.
    pub async fn insert_rows(
        &self,
        db: &str,
        schema: &str,
        table: &str,
        rows: Vec<ChangeRow>,
    ) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;
        let Some(data) = inner.table_mut(db, schema, table) else {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "table does not exist",
                format!("{db}.{schema}.{table}")
            );
        };
        data.rows.extend(rows);

        Ok(())
    }

    /// Returns a table's rows; a missing table reads as empty.
    pub async fn rows(&self, db: &str, schema: &str, table: &str) -> Vec<ChangeRow> {
        let inner = self.inner.lock().await;
        inner
            .table(db, schema, table)
            .map(|data| data.rows.clone())
            .unwrap_or_default()
    }

    /// Records a captured DDL event for a batch, the way the master side does.
    pub async fn record_schema_change(&self, db: &str, ctid: BatchId, event: SchemaChangeEvent) {
        let mut inner = self.inner.lock().await;
        inner
            .schema_events
            .entry((db.to_string(), ctid))
            .or_default()
            .push(event);
    }

    /// Returns the batch a ledger row was superseded by, if any.
    pub async fn superseded_by(
        &self,
        db: &str,
        ctid: BatchId,
        scope: &BatchScope,
    ) -> Option<BatchId> {
        let inner = self.inner.lock().await;
        inner
            .batches
            .get(&(db.to_string(), scope.clone()))
            .and_then(|rows| rows.get(&ctid))
            .and_then(|row| row.superseded_by)
    }
}

impl LedgerStore for MemoryStore {
    async fn last_batch(&self, db: &str, scope: &BatchScope) -> CdcResult<Option<Batch>> {
        let inner = self.inner.lock().await;
        let batch = inner
            .batches
            .get(&(db.to_string(), scope.clone()))
            .and_then(|rows| rows.last_key_value())
            .map(|(_, row)| row.batch.clone());

        Ok(batch)
    }

    async fn batch(&self, db: &str, ctid: BatchId, scope: &BatchScope) -> CdcResult<Option<Batch>> {
        let inner = self.inner.lock().await;
        let batch = inner
            .batches
            .get(&(db.to_string(), scope.clone()))
            .and_then(|rows| rows.get(&ctid))
            .map(|row| row.batch.clone());

        Ok(batch)
    }

    async fn incomplete_batches(&self, db: &str, scope: &BatchScope) -> CdcResult<Vec<Batch>> {
        let inner = self.inner.lock().await;
        let batches = inner
            .batches
            .get(&(db.to_string(), scope.clone()))
            .map(|rows| {
                rows.values()
                    .filter(|row| !row.batch.is_complete())
                    .map(|row| row.batch.clone())
                    .collect()
            })
            .unwrap_or_default();

        Ok(batches)
    }

    async fn pending_batches_after(
        &self,
        db: &str,
        ctid: BatchId,
        required: Stage,
    ) -> CdcResult<Vec<Batch>> {
        let inner = self.inner.lock().await;
        let batches = inner
            .batches
            .get(&(db.to_string(), BatchScope::Relay))
            .map(|rows| {
                rows.values()
                    .filter(|row| row.batch.ctid > ctid && row.batch.stages.contains(required))
                    .map(|row| row.batch.clone())
                    .collect()
            })
            .unwrap_or_default();

        Ok(batches)
    }

    async fn create_batch(&self, db: &str, batch: &Batch, scope: &BatchScope) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;
        let rows = inner
            .batches
            .entry((db.to_string(), scope.clone()))
            .or_default();

        // A row that already exists is left untouched so re-running discovery
        // after a crash cannot reset a batch's progress.
        rows.entry(batch.ctid).or_insert_with(|| BatchRow {
            batch: batch.clone(),
            superseded_by: None,
        });

        Ok(())
    }

    async fn open_batch(
        &self,
        db: &str,
        sync_start_version: i64,
        sync_stop_version: i64,
    ) -> CdcResult<Batch> {
        let mut inner = self.inner.lock().await;
        let next = inner
            .batches
            .iter()
            .filter(|((batch_db, _), _)| batch_db == db)
            .filter_map(|(_, rows)| rows.last_key_value().map(|(id, _)| *id))
            .max()
            .map(|id| id.next())
            .unwrap_or(BatchId::FIRST);

        let batch = Batch::new(next, sync_start_version, sync_stop_version, Utc::now());
        inner
            .batches
            .entry((db.to_string(), BatchScope::Relay))
            .or_default()
            .insert(next, BatchRow {
                batch: batch.clone(),
                superseded_by: None,
            });

        Ok(batch)
    }

    async fn set_stages(
        &self,
        db: &str,
        ctid: BatchId,
        stages: StageVector,
        scope: &BatchScope,
    ) -> CdcResult<bool> {
        let mut inner = self.inner.lock().await;
        let row = inner.batch_row_mut(db, ctid, scope)?;
        let before = row.batch.stages;
        row.batch.stages = before.union(stages);

        Ok(row.batch.stages != before)
    }

    async fn read_stages(
        &self,
        db: &str,
        ctid: BatchId,
        scope: &BatchScope,
    ) -> CdcResult<StageVector> {
        let mut inner = self.inner.lock().await;
        let row = inner.batch_row_mut(db, ctid, scope)?;

        Ok(row.batch.stages)
    }

    async fn mark_batch_complete(
        &self,
        db: &str,
        ctid: BatchId,
        stop_time: DateTime<Utc>,
        scope: &BatchScope,
    ) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;
        let row = inner.batch_row_mut(db, ctid, scope)?;
        row.batch.stages = StageVector::complete();

        // The stop time is set exactly once, at final completion.
        if row.batch.stop_time.is_none() {
            row.batch.stop_time = Some(stop_time);
        }

        Ok(())
    }

    async fn supersede_batch(
        &self,
        db: &str,
        ctid: BatchId,
        by: BatchId,
        scope: &BatchScope,
    ) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;
        let row = inner.batch_row_mut(db, ctid, scope)?;
        row.batch.stages = StageVector::complete();
        row.superseded_by = Some(by);

        Ok(())
    }

    async fn revert_batch(&self, db: &str, ctid: BatchId) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;
        for ((batch_db, _), rows) in inner.batches.iter_mut() {
            if batch_db == db {
                rows.remove(&ctid);
            }
        }
        inner.schema_events.remove(&(db.to_string(), ctid));
        inner.table_info.remove(&(db.to_string(), ctid));

        Ok(())
    }

    async fn schema_changes(&self, db: &str, ctid: BatchId) -> CdcResult<Vec<SchemaChangeEvent>> {
        let inner = self.inner.lock().await;
        let events = inner
            .schema_events
            .get(&(db.to_string(), ctid))
            .cloned()
            .unwrap_or_default();

        Ok(events)
    }

    async fn publish_schema_changes(
        &self,
        source_db: &str,
        dest_db: &str,
        ctid: BatchId,
    ) -> CdcResult<u64> {
        let mut inner = self.inner.lock().await;
        let events = inner
            .schema_events
            .get(&(source_db.to_string(), ctid))
            .cloned()
            .unwrap_or_default();
        let published = events.len() as u64;
        inner
            .schema_events
            .insert((dest_db.to_string(), ctid), events);

        Ok(published)
    }

    async fn publish_table_info(
        &self,
        db: &str,
        ctid: BatchId,
        table: &ResolvedTable,
        expected_rows: u64,
    ) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .table_info
            .entry((db.to_string(), ctid))
            .or_default()
            .insert(table.name().to_string(), expected_rows);

        Ok(())
    }

    async fn expected_row_counts(
        &self,
        db: &str,
        ctid: BatchId,
    ) -> CdcResult<HashMap<String, u64>> {
        let inner = self.inner.lock().await;
        let counts = inner
            .table_info
            .get(&(db.to_string(), ctid))
            .cloned()
            .unwrap_or_default();

        Ok(counts)
    }
}

impl Database for MemoryStore {
    async fn table_exists(&self, db: &str, schema: &str, table: &str) -> CdcResult<bool> {
        let inner = self.inner.lock().await;

        Ok(inner.table(db, schema, table).is_some())
    }

    async fn column_list(&self, db: &str, schema: &str, table: &str) -> CdcResult<Vec<Column>> {
        let inner = self.inner.lock().await;
        let columns = inner
            .table(db, schema, table)
            .map(|data| data.columns.clone())
            .unwrap_or_default();

        Ok(columns)
    }

    async fn intersect_columns(
        &self,
        db: &str,
        schema: &str,
        table_a: &str,
        table_b: &str,
    ) -> CdcResult<Vec<String>> {
        let inner = self.inner.lock().await;
        let Some(a) = inner.table(db, schema, table_a) else {
            return Ok(Vec::new());
        };
        let Some(b) = inner.table(db, schema, table_b) else {
            return Ok(Vec::new());
        };

        let columns = a
            .column_names()
            .into_iter()
            .filter(|column| b.has_column(column))
            .collect();

        Ok(columns)
    }

    async fn rename_column(
        &self,
        table: &ResolvedTable,
        db: &str,
        column: &str,
        new_name: &str,
    ) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;

        if let Some(data) = inner.table_mut(db, table.schema(), table.name())
            && data.has_column(column)
        {
            data.rename_column(column, new_name);
        }

        if table.config.record_history {
            let history = table.history_table_name();
            if let Some(data) = inner.table_mut(db, table.schema(), &history)
                && data.has_column(column)
            {
                data.rename_column(column, new_name);
            }
        }

        Ok(())
    }

    async fn modify_column(
        &self,
        table: &ResolvedTable,
        db: &str,
        column: &str,
        new_type: &ColumnType,
    ) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;

        if let Some(data) = inner.table_mut(db, table.schema(), table.name())
            && data.has_column(column)
        {
            data.set_column_type(column, new_type.clone());
        }

        if table.config.record_history {
            let history = table.history_table_name();
            if let Some(data) = inner.table_mut(db, table.schema(), &history)
                && data.has_column(column)
            {
                data.set_column_type(column, new_type.clone());
            }
        }

        Ok(())
    }

    async fn add_column(
        &self,
        table: &ResolvedTable,
        db: &str,
        column: &str,
        new_type: &ColumnType,
    ) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;

        if let Some(data) = inner.table_mut(db, table.schema(), table.name())
            && !data.has_column(column)
        {
            data.add_column(column, new_type.clone());
        }

        if table.config.record_history {
            let history = table.history_table_name();
            if let Some(data) = inner.table_mut(db, table.schema(), &history)
                && !data.has_column(column)
            {
                data.add_column(column, new_type.clone());
            }
        }

        Ok(())
    }

    async fn drop_column(&self, table: &ResolvedTable, db: &str, column: &str) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;

        if let Some(data) = inner.table_mut(db, table.schema(), table.name())
            && data.has_column(column)
        {
            data.drop_column(column);
        }

        if table.config.record_history {
            let history = table.history_table_name();
            if let Some(data) = inner.table_mut(db, table.schema(), &history)
                && data.has_column(column)
            {
                data.drop_column(column);
            }
        }

        Ok(())
    }

    async fn apply_table_changes(
        &self,
        table: &ResolvedTable,
        archive: Option<&ResolvedTable>,
        db: &str,
        ct_db: &str,
        ctid: BatchId,
        _timeout: Duration,
    ) -> CdcResult<ApplyCounts> {
        let mut inner = self.inner.lock().await;

        let mut unit = vec![table];
        if let Some(archive) = archive {
            unit.push(archive);
        }

        // Stage every member on a clone first so the unit commits atomically.
        let mut staged: Vec<(TableKey, TableData)> = Vec::with_capacity(unit.len());
        let mut counts = ApplyCounts::default();
        for member in unit {
            let ct_name = ChangeTable::batch_name(member.name(), ctid);
            let Some(changes) = inner.table(ct_db, member.schema(), &ct_name) else {
                bail!(
                    ErrorKind::ChangeTableMissing,
                    "change table does not exist",
                    format!("{ct_db}.{}.{ct_name}", member.schema())
                );
            };
            let change_rows = changes.rows.clone();

            let dest_key = Inner::table_key(db, member.schema(), member.name());
            let Some(dest) = inner.tables.get(&dest_key) else {
                bail!(
                    ErrorKind::DestinationQueryFailed,
                    "destination table does not exist",
                    format!("{db}.{}", member.qualified_name())
                );
            };

            let mut dest = dest.clone();
            counts.merge(Inner::merge_unit(member, &change_rows, &mut dest)?);
            staged.push((dest_key, dest));
        }

        for (key, data) in staged {
            inner.tables.insert(key, data);
        }

        Ok(counts)
    }

    async fn union_changes(
        &self,
        db: &str,
        schema: &str,
        source: &str,
        dest: &str,
    ) -> CdcResult<u64> {
        let mut inner = self.inner.lock().await;

        let columns = {
            let Some(source_data) = inner.table(db, schema, source) else {
                bail!(
                    ErrorKind::ChangeTableMissing,
                    "change table does not exist",
                    format!("{db}.{schema}.{source}")
                );
            };
            let Some(dest_data) = inner.table(db, schema, dest) else {
                bail!(
                    ErrorKind::DestinationQueryFailed,
                    "consolidated table does not exist",
                    format!("{db}.{schema}.{dest}")
                );
            };

            source_data
                .column_names()
                .into_iter()
                .filter(|column| dest_data.has_column(column))
                .collect::<Vec<_>>()
        };

        let rows = inner
            .table(db, schema, source)
            .map(|data| project_rows(&data.rows, &columns))
            .unwrap_or_default();
        let unioned = rows.len() as u64;

        if let Some(dest_data) = inner.table_mut(db, schema, dest) {
            dest_data.rows.extend(rows);
        }

        Ok(unioned)
    }

    async fn remove_duplicate_changes(
        &self,
        table: &ResolvedTable,
        db: &str,
        schema: &str,
        consolidated: &str,
    ) -> CdcResult<u64> {
        let mut inner = self.inner.lock().await;
        let primary_keys = table.primary_keys();

        let Some(data) = inner.table_mut(db, schema, consolidated) else {
            bail!(
                ErrorKind::DestinationQueryFailed,
                "consolidated table does not exist",
                format!("{db}.{schema}.{consolidated}")
            );
        };

        let before = data.rows.len();
        let mut seen = HashSet::new();
        data.rows.retain(|row| seen.insert(row.key(&primary_keys)));

        Ok((before - data.rows.len()) as u64)
    }

    async fn merge_shard_table(
        &self,
        table: &ResolvedTable,
        relay_db: &str,
        shard_db: &str,
        ctid: BatchId,
    ) -> CdcResult<u64> {
        let mut inner = self.inner.lock().await;
        let ct_name = ChangeTable::batch_name(table.name(), ctid);

        let columns = {
            let Some(source) = inner.table(shard_db, table.schema(), &ct_name) else {
                bail!(
                    ErrorKind::ChangeTableMissing,
                    "change table does not exist",
                    format!("{shard_db}.{}.{ct_name}", table.schema())
                );
            };
            let Some(dest) = inner.table(relay_db, table.schema(), &ct_name) else {
                bail!(
                    ErrorKind::DestinationQueryFailed,
                    "relay change table does not exist",
                    format!("{relay_db}.{}.{ct_name}", table.schema())
                );
            };

            source
                .column_names()
                .into_iter()
                .filter(|column| dest.has_column(column))
                .collect::<Vec<_>>()
        };

        let rows = inner
            .table(shard_db, table.schema(), &ct_name)
            .map(|data| project_rows(&data.rows, &columns))
            .unwrap_or_default();
        let merged = rows.len() as u64;

        if let Some(dest) = inner.table_mut(relay_db, table.schema(), &ct_name) {
            dest.rows.extend(rows);
        }

        Ok(merged)
    }

    async fn append_to_history(
        &self,
        table: &ResolvedTable,
        ct_db: &str,
        dest_db: &str,
        ctid: BatchId,
    ) -> CdcResult<u64> {
        let mut inner = self.inner.lock().await;
        let ct_name = ChangeTable::batch_name(table.name(), ctid);

        let Some(changes) = inner.table(ct_db, table.schema(), &ct_name) else {
            bail!(
                ErrorKind::ChangeTableMissing,
                "change table does not exist",
                format!("{ct_db}.{}.{ct_name}", table.schema())
            );
        };
        let definition = changes.definition_only();
        let rows = changes.rows.clone();
        let appended = rows.len() as u64;

        let history_key = Inner::table_key(dest_db, table.schema(), &table.history_table_name());
        let history = inner
            .tables
            .entry(history_key)
            .or_insert_with(|| definition);
        history.rows.extend(rows);

        Ok(appended)
    }

    async fn table_row_count(&self, db: &str, schema: &str, table: &str) -> CdcResult<u64> {
        let inner = self.inner.lock().await;
        let count = inner
            .table(db, schema, table)
            .map(|data| data.rows.len() as u64)
            .unwrap_or(0);

        Ok(count)
    }
}

impl TableCopier for MemoryStore {
    async fn copy_table(
        &self,
        source_db: &str,
        schema: &str,
        source_table: &str,
        dest_db: &str,
        dest_table: &str,
        _timeout: Duration,
    ) -> CdcResult<u64> {
        let mut inner = self.inner.lock().await;

        let Some(source) = inner.table(source_db, schema, source_table) else {
            bail!(
                ErrorKind::ChangeTableMissing,
                "source table does not exist",
                format!("{source_db}.{schema}.{source_table}")
            );
        };
        let copied = source.clone();
        let rows = copied.rows.len() as u64;

        inner
            .tables
            .insert(Inner::table_key(dest_db, schema, dest_table), copied);

        Ok(rows)
    }

    async fn copy_table_definition(
        &self,
        source_db: &str,
        schema: &str,
        source_table: &str,
        dest_db: &str,
        dest_table: &str,
    ) -> CdcResult<()> {
        let mut inner = self.inner.lock().await;

        let Some(source) = inner.table(source_db, schema, source_table) else {
            bail!(
                ErrorKind::ChangeTableMissing,
                "source table does not exist",
                format!("{source_db}.{schema}.{source_table}")
            );
        };
        let definition = source.definition_only();

        inner
            .tables
            .insert(Inner::table_key(dest_db, schema, dest_table), definition);

        Ok(())
    }
}
