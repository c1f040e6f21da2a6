use cdc_config::shared::ShardConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::bail;
use crate::concurrency::pool::{WorkerPool, collect_results};
use crate::error::{CdcError, CdcResult, ErrorKind};
use crate::metrics::register_metrics;
use crate::store::copy::TableCopier;
use crate::store::database::Database;
use crate::store::ledger::LedgerStore;
use crate::types::{Batch, BatchId, BatchScope, ChangeTable, Column, ResolvedTable, Stage, StageVector};

/// What one consolidator run amounted to.
#[derive(Debug, PartialEq, Eq)]
pub enum ShardRunOutcome {
    /// The previous batch was fully uploaded; a new batch was opened on the
    /// relay and on every shard.
    OpenedNextBatch(BatchId),
    /// At least one shard has not finished uploading the current batch yet.
    WaitingForShards,
    /// Every shard's changes were merged into relay-side per-batch tables.
    Consolidated {
        /// Rows per table after the merge, as published downstream.
        row_counts: HashMap<String, u64>,
    },
}

/// Returns `true` if the per-shard field lists for one table disagree.
///
/// Shards that captured no changes for the table are absent from the map and
/// do not count as drift. Column order is irrelevant; name and primary-key
/// membership are compared.
pub(crate) fn schema_out_of_sync(field_lists: &HashMap<String, Vec<Column>>) -> bool {
    let mut sorted: Vec<Vec<Column>> = field_lists
        .values()
        .map(|columns| {
            let mut columns = columns.clone();
            columns.sort();
            columns
        })
        .collect();
    sorted.sort();

    sorted.windows(2).any(|pair| pair[0] != pair[1])
}

/// Unifies per-shard change sets into one relay-side change set per batch, so
/// slaves see a single consolidated database.
///
/// Before merging anything, every shard's captured field lists must agree;
/// merging mismatched schemas would silently corrupt data, so drift aborts the
/// whole batch and reverts the shard-side batch state for a clean retry.
#[derive(Debug)]
pub struct ShardConsolidator<S, C> {
    store: S,
    copier: C,
    pool: WorkerPool,
    config: Arc<ShardConfig>,
}

impl<S, C> ShardConsolidator<S, C>
where
    S: LedgerStore + Database + Send + Sync,
    C: TableCopier + Send + Sync,
{
    pub fn new(config: ShardConfig, store: S, copier: C) -> Self {
        register_metrics();

        let pool = WorkerPool::new(config.max_workers);

        Self {
            store,
            copier,
            pool,
            config: Arc::new(config),
        }
    }

    /// Runs one consolidation pass for the current batch.
    pub async fn run(&self) -> CdcResult<ShardRunOutcome> {
        let relay_db = &self.config.relay_db;

        let Some(batch) = self.store.last_batch(relay_db, &BatchScope::Relay).await? else {
            // Nothing has ever run; open the first batch so shards can start capturing.
            let batch = self.open_next_batch().await?;
            return Ok(ShardRunOutcome::OpenedNextBatch(batch.ctid));
        };

        if batch.stages.contains(Stage::UploadChanges) {
            let next = self.open_next_batch().await?;
            return Ok(ShardRunOutcome::OpenedNextBatch(next.ctid));
        }

        let field_lists = self.field_lists_by_shard(batch.ctid).await?;

        if let Some(position) = field_lists.iter().position(schema_out_of_sync) {
            let table = &self.config.tables[position];
            for shard in &self.config.shard_databases {
                self.store.revert_batch(shard, batch.ctid).await?;
            }
            info!("schemas out of sync, reverted shard batch state for batch {}", batch.ctid);

            bail!(
                ErrorKind::SchemaDrift,
                "shard change table schemas are out of sync",
                table.qualified_name()
            );
        }

        if !self.all_shards_uploaded(batch.ctid).await? {
            info!("not all shards are done yet, waiting until they catch up");
            return Ok(ShardRunOutcome::WaitingForShards);
        }

        info!("all shard masters are done, consolidating batch {}", batch.ctid);

        if !batch.stages.contains(Stage::PublishSchemaChanges) {
            debug!("publishing schema changes");
            let published = self
                .store
                .publish_schema_changes(&self.config.master_shard, relay_db, batch.ctid)
                .await?;
            debug!("published {published} schema change(s)");
            self.store
                .set_stages(
                    relay_db,
                    batch.ctid,
                    StageVector::empty().with(Stage::PublishSchemaChanges),
                    &BatchScope::Relay,
                )
                .await?;
        }

        let merged = self.merge_tables(batch.ctid, &field_lists).await?;

        // Publish the per-table row counts for downstream reconciliation.
        let mut row_counts = HashMap::new();
        for (table, merged_rows) in &merged {
            let rows = self
                .store
                .table_row_count(
                    relay_db,
                    table.schema(),
                    &ChangeTable::batch_name(table.name(), batch.ctid),
                )
                .await?;
            self.store
                .publish_table_info(relay_db, batch.ctid, table, rows)
                .await?;
            info!(
                "table {} holds {} row(s) for batch {} ({} merged from shards)",
                table.qualified_name(),
                rows,
                batch.ctid,
                merged_rows
            );
            row_counts.insert(table.name().to_string(), rows);
        }

        self.store
            .set_stages(
                relay_db,
                batch.ctid,
                StageVector::empty()
                    .with(Stage::CaptureChanges)
                    .with(Stage::UploadChanges),
                &BatchScope::Relay,
            )
            .await?;

        Ok(ShardRunOutcome::Consolidated { row_counts })
    }

    /// Opens the next batch on the relay and a matching row on every shard,
    /// each starting where that shard's previous batch stopped.
    async fn open_next_batch(&self) -> CdcResult<Batch> {
        info!("creating new batch rows for shards");
        let batch = self.store.open_batch(&self.config.relay_db, 0, 0).await?;

        for shard in &self.config.shard_databases {
            let last = self.store.last_batch(shard, &BatchScope::Relay).await?;
            let start_version = last.map(|b| b.sync_stop_version).unwrap_or(0);
            let shard_batch = Batch::new(batch.ctid, start_version, 0, batch.start_time);
            self.store
                .create_batch(shard, &shard_batch, &BatchScope::Relay)
                .await?;
        }

        info!(
            "created batch {} on {}",
            batch.ctid,
            self.config.shard_databases.join(",")
        );

        Ok(batch)
    }

    /// Returns `true` once every shard's batch has its changes uploaded.
    async fn all_shards_uploaded(&self, ctid: BatchId) -> CdcResult<bool> {
        for shard in &self.config.shard_databases {
            let Some(batch) = self.store.batch(shard, ctid, &BatchScope::Relay).await? else {
                return Ok(false);
            };
            if !batch.stages.contains(Stage::UploadChanges) {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Collects each table's captured field list per shard, aligned with the
    /// configured table list.
    ///
    /// A shard with no change table for a table captured no changes there;
    /// it is simply absent from that table's map.
    async fn field_lists_by_shard(
        &self,
        ctid: BatchId,
    ) -> CdcResult<Vec<HashMap<String, Vec<Column>>>> {
        let mut field_lists = Vec::with_capacity(self.config.tables.len());

        for table in &self.config.tables {
            let ct_name = ChangeTable::batch_name(&table.name, ctid);
            let mut by_shard = HashMap::new();
            for shard in &self.config.shard_databases {
                let columns = self.store.column_list(shard, &table.schema, &ct_name).await?;
                if !columns.is_empty() {
                    by_shard.insert(shard.clone(), columns);
                }
            }
            field_lists.push(by_shard);
        }

        Ok(field_lists)
    }

    /// Merges every changed table's rows from all shards into the relay-side
    /// per-batch table, with bounded parallelism.
    ///
    /// A failure here is an infrastructure failure (server down, timeout), not
    /// a table-specific one, and aborts the whole run.
    async fn merge_tables(
        &self,
        ctid: BatchId,
        field_lists: &[HashMap<String, Vec<Column>>],
    ) -> CdcResult<Vec<(ResolvedTable, u64)>> {
        let units: Vec<_> = self
            .config
            .tables
            .iter()
            .zip(field_lists)
            .filter_map(|(config_table, shards)| {
                let first = self
                    .config
                    .shard_databases
                    .iter()
                    .find(|shard| shards.contains_key(*shard));
                match first {
                    Some(first) => Some((config_table, shards, first)),
                    None => {
                        debug!("no shard has changes for table {}", config_table.qualified_name());
                        None
                    }
                }
            })
            .map(|(config_table, shards, first)| async move {
                let mut table = ResolvedTable::new(config_table.clone());
                table.set_field_list(shards[first].clone());

                let ct_name = ChangeTable::batch_name(table.name(), ctid);
                debug!("merging table {}", table.qualified_name());

                // The first shard with changes defines the relay-side structure.
                self.copier
                    .copy_table_definition(
                        first,
                        table.schema(),
                        &ct_name,
                        &self.config.relay_db,
                        &ct_name,
                    )
                    .await?;

                let mut merged = 0;
                for shard in &self.config.shard_databases {
                    if !shards.contains_key(shard) {
                        // No changes in this shard for this table.
                        continue;
                    }
                    merged += self
                        .store
                        .merge_shard_table(&table, &self.config.relay_db, shard, ctid)
                        .await?;
                }

                Ok((table, merged))
            })
            .collect();

        info!("parallel merge of {} table(s)", units.len());
        collect_results(self.pool.run(units).await)
    }
}
