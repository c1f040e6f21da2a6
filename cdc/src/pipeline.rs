//! Slave-tier pipeline orchestration.
//!
//! Contains the [`SlavePipeline`] that drives one run of a slave agent:
//! batch discovery, the single-batch and consolidated multi-batch paths, and
//! the durable stage bookkeeping that makes every run crash-resumable.

use cdc_config::shared::ReplicationConfig;
use chrono::Utc;
use metrics::histogram;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, trace};

use crate::concurrency::pool::WorkerPool;
use crate::error::{CdcResult, ErrorKind};
use crate::metrics::{CDC_STAGE_DURATION_SECONDS, STAGE, register_metrics};
use crate::replication::{
    BatchConsolidator, BatchDiscoverer, ChangeApplier, HistorySyncer, SchemaChangePropagator,
    resolve_field_lists,
};
use crate::store::copy::TableCopier;
use crate::store::database::Database;
use crate::store::ledger::LedgerStore;
use crate::types::{Batch, BatchId, BatchScope, ChangeTable, ResolvedTable, Stage, StageVector};

/// Records how long one pipeline stage took.
fn observe_stage(stage: Stage, started: Instant) {
    histogram!(CDC_STAGE_DURATION_SECONDS, STAGE => stage.as_str())
        .record(started.elapsed().as_secs_f64());
}

/// One run of a slave replication agent.
///
/// The pipeline discovers the batches its scope still owes work on, then
/// drives each stage gated on the batch's durable stage vector: a stage runs
/// only while its bit is unset and setting the bit is the stage's completion.
/// Because of that, a crashed run resumes at the first unset stage with no
/// operator action; every stage's external side effect is safe to re-execute
/// wholesale.
///
/// When the backlog reaches the configured consolidation threshold, all
/// pending batches are folded into one logical batch and applied together.
#[derive(Debug)]
pub struct SlavePipeline<S, C> {
    config: Arc<ReplicationConfig>,
    store: S,
    copier: C,
    pool: WorkerPool,
    scope: BatchScope,
}

impl<S, C> SlavePipeline<S, C>
where
    S: LedgerStore + Database + Clone + Send + Sync,
    C: TableCopier + Clone + Send + Sync,
{
    /// Creates a pipeline from its configuration and collaborators.
    ///
    /// The store covers both the batch ledger and destination data access;
    /// the copier is the bulk table-copy collaborator used for downloads.
    pub fn new(config: ReplicationConfig, store: S, copier: C) -> Self {
        // Register metrics here during pipeline creation so users of the crate
        // don't have to call it explicitly; repeated calls are safe.
        register_metrics();

        let pool = WorkerPool::new(config.max_workers);
        let scope = BatchScope::slave(config.slave_name.clone());

        Self {
            config: Arc::new(config),
            store,
            copier,
            pool,
            scope,
        }
    }

    /// Runs the agent once: discovers pending batches and processes them.
    pub async fn run(&self) -> CdcResult<()> {
        trace!("initializing batches");
        let discoverer = BatchDiscoverer::new(
            self.store.clone(),
            self.config.relay_db.clone(),
            self.scope.clone(),
        );
        let batches = discoverer.discover().await?;
        if batches.is_empty() {
            info!("no pending batches, nothing to do");
            return Ok(());
        }

        let threshold = self.config.batch_consolidation_threshold;
        if threshold == 0 || batches.len() < threshold {
            for batch in batches {
                self.run_single_batch(batch).await?;
            }
        } else {
            self.run_multi_batch(batches).await?;
        }

        info!("slave agent work complete");

        Ok(())
    }

    /// Runs one batch through download, schema changes, apply and history sync.
    async fn run_single_batch(&self, batch: Batch) -> CdcResult<()> {
        let ctid = batch.ctid;
        let mut stages = batch.stages;
        info!("running batch {} with completed stages {}", ctid, stages);

        let tables =
            resolve_field_lists(&self.store, &self.config.slave_db, &self.config.tables).await?;

        let change_tables = if !stages.contains(Stage::DownloadChanges) {
            let started = Instant::now();
            let change_tables = self.download_change_tables(&tables, ctid).await?;
            observe_stage(Stage::DownloadChanges, started);

            // A single batch needs no consolidation; the bit is set anyway so
            // every completed batch carries the same final vector.
            self.complete_stages(
                ctid,
                &mut stages,
                StageVector::empty()
                    .with(Stage::DownloadChanges)
                    .with(Stage::ConsolidateBatches),
            )
            .await?;

            change_tables
        } else {
            // The download already ran in a previous attempt; the change
            // tables are probed on the slave instead of copied again.
            self.populate_change_tables(&tables, &self.config.slave_ct_db, ctid)
                .await?
        };

        if !stages.contains(Stage::ApplySchemaChanges) {
            let started = Instant::now();
            let propagator = SchemaChangePropagator::new(
                self.store.clone(),
                self.store.clone(),
                self.pool.clone(),
                self.config.relay_db.clone(),
                self.config.slave_db.clone(),
            );
            propagator.apply(&tables, ctid).await?;
            observe_stage(Stage::ApplySchemaChanges, started);

            self.complete_stages(
                ctid,
                &mut stages,
                StageVector::empty()
                    .with(Stage::ApplySchemaChanges)
                    .with(Stage::ConsolidateBatches),
            )
            .await?;
        }

        if !stages.contains(Stage::ApplyChanges) {
            let started = Instant::now();
            let applier = ChangeApplier::new(
                self.store.clone(),
                self.store.clone(),
                self.pool.clone(),
                self.config.relay_db.clone(),
                self.config.slave_db.clone(),
                self.config.slave_ct_db.clone(),
                self.config.apply_timeout(),
            );
            applier.apply(&tables, &change_tables, ctid).await?;
            observe_stage(Stage::ApplyChanges, started);

            self.complete_stages(ctid, &mut stages, StageVector::empty().with(Stage::ApplyChanges))
                .await?;
        }

        if !stages.contains(Stage::SyncHistoryTables) {
            let started = Instant::now();
            let syncer = HistorySyncer::new(
                self.store.clone(),
                self.pool.clone(),
                self.config.slave_ct_db.clone(),
                self.config.slave_db.clone(),
            );
            syncer.sync(&tables, &change_tables, ctid).await?;
            observe_stage(Stage::SyncHistoryTables, started);

            self.complete_stages(
                ctid,
                &mut stages,
                StageVector::empty().with(Stage::SyncHistoryTables),
            )
            .await?;
        }

        self.store
            .mark_batch_complete(&self.config.relay_db, ctid, Utc::now(), &self.scope)
            .await?;
        info!("batch {ctid} complete");

        Ok(())
    }

    /// Folds all pending batches into one consolidated run.
    ///
    /// From consolidation onward every gate uses the last batch's vector,
    /// since the stages operate on the whole set of batches at once; schema
    /// changes remain gated per batch so they apply in batch order. Earlier
    /// batches are superseded by the last batch's completion instead of being
    /// completed separately.
    async fn run_multi_batch(&self, batches: Vec<Batch>) -> CdcResult<()> {
        let Some(end) = batches.last().cloned() else {
            return Ok(());
        };
        let mut end_stages = end.stages;
        info!("consolidating {} batches into batch {}", batches.len(), end.ctid);

        let tables =
            resolve_field_lists(&self.store, &self.config.slave_db, &self.config.tables).await?;

        // Which change tables exist, per batch, on the relay.
        let mut change_tables = Vec::new();
        for batch in &batches {
            debug!("populating change table list for batch {}", batch.ctid);
            change_tables.extend(
                self.populate_change_tables(&tables, &self.config.relay_db, batch.ctid)
                    .await?,
            );
        }

        if !end_stages.contains(Stage::ConsolidateBatches) {
            trace!("consolidating batches");
            let started = Instant::now();
            let consolidator = BatchConsolidator::new(
                self.store.clone(),
                self.copier.clone(),
                self.pool.clone(),
                self.config.relay_db.clone(),
            );
            consolidator.consolidate(&tables, &change_tables).await?;
            observe_stage(Stage::ConsolidateBatches, started);

            self.complete_stages(
                end.ctid,
                &mut end_stages,
                StageVector::empty().with(Stage::ConsolidateBatches),
            )
            .await?;
        }

        // One logical change table per changed table name, owned by the end batch.
        let changed_tables: Vec<&ResolvedTable> = tables
            .iter()
            .filter(|table| {
                change_tables
                    .iter()
                    .any(|change_table| change_table.table == table.name())
            })
            .collect();
        let consolidated: Vec<ChangeTable> = changed_tables
            .iter()
            .map(|table| table.change_table(end.ctid, &self.config.slave_name))
            .collect();

        if !end_stages.contains(Stage::DownloadChanges) {
            debug!("downloading consolidated change tables");
            let started = Instant::now();
            self.download_consolidated(&changed_tables, end.ctid).await?;
            observe_stage(Stage::DownloadChanges, started);
            debug!("changes downloaded successfully");

            self.complete_stages(
                end.ctid,
                &mut end_stages,
                StageVector::empty().with(Stage::DownloadChanges),
            )
            .await?;
        }

        // Schema changes stay gated per batch and run in ascending batch order.
        for batch in &batches {
            if !batch.stages.contains(Stage::ApplySchemaChanges) {
                debug!("applying schema changes for batch {}", batch.ctid);
                let propagator = SchemaChangePropagator::new(
                    self.store.clone(),
                    self.store.clone(),
                    self.pool.clone(),
                    self.config.relay_db.clone(),
                    self.config.slave_db.clone(),
                );
                propagator.apply(&tables, batch.ctid).await?;

                self.store
                    .set_stages(
                        &self.config.relay_db,
                        batch.ctid,
                        StageVector::empty().with(Stage::ApplySchemaChanges),
                        &self.scope,
                    )
                    .await?;
            }
        }

        if !end_stages.contains(Stage::ApplyChanges) {
            let started = Instant::now();
            let applier = ChangeApplier::new(
                self.store.clone(),
                self.store.clone(),
                self.pool.clone(),
                self.config.relay_db.clone(),
                self.config.slave_db.clone(),
                self.config.slave_ct_db.clone(),
                self.config.apply_timeout(),
            );
            applier.apply(&tables, &consolidated, end.ctid).await?;
            observe_stage(Stage::ApplyChanges, started);

            self.complete_stages(
                end.ctid,
                &mut end_stages,
                StageVector::empty().with(Stage::ApplyChanges),
            )
            .await?;
        }

        if !end_stages.contains(Stage::SyncHistoryTables) {
            let started = Instant::now();
            let syncer = HistorySyncer::new(
                self.store.clone(),
                self.pool.clone(),
                self.config.slave_ct_db.clone(),
                self.config.slave_db.clone(),
            );
            syncer.sync(&tables, &consolidated, end.ctid).await?;
            observe_stage(Stage::SyncHistoryTables, started);

            self.complete_stages(
                end.ctid,
                &mut end_stages,
                StageVector::empty().with(Stage::SyncHistoryTables),
            )
            .await?;
        }

        // The end batch's completion stands for the whole set.
        for batch in &batches {
            if batch.ctid != end.ctid {
                self.store
                    .supersede_batch(&self.config.relay_db, batch.ctid, end.ctid, &self.scope)
                    .await?;
            }
        }
        self.store
            .mark_batch_complete(&self.config.relay_db, end.ctid, Utc::now(), &self.scope)
            .await?;
        info!("batch {} complete, superseding {} earlier batches", end.ctid, batches.len() - 1);

        Ok(())
    }

    /// Durably records completed stages and mirrors them into the local copy.
    async fn complete_stages(
        &self,
        ctid: BatchId,
        stages: &mut StageVector,
        completed: StageVector,
    ) -> CdcResult<()> {
        self.store
            .set_stages(&self.config.relay_db, ctid, completed, &self.scope)
            .await?;
        *stages = stages.union(completed);

        Ok(())
    }

    /// Copies each table's batch-scoped change table from the relay down to
    /// the slave, probing existence by copying: a missing source is the normal
    /// "no changes this batch" condition.
    async fn download_change_tables(
        &self,
        tables: &[ResolvedTable],
        ctid: BatchId,
    ) -> CdcResult<Vec<ChangeTable>> {
        let mut found = Vec::new();

        for table in tables {
            let change_table = table.change_table(ctid, &self.config.slave_name);
            let name = change_table.batch_scoped_name();

            let copied = self
                .copier
                .copy_table(
                    &self.config.relay_db,
                    table.schema(),
                    &name,
                    &self.config.slave_ct_db,
                    &name,
                    self.config.copy_timeout(),
                )
                .await;

            match copied {
                Ok(rows) => {
                    trace!("copied {} row(s) of table {}.{} to slave", rows, table.schema(), name);
                    found.push(change_table);
                }
                Err(err) if err.kind() == ErrorKind::ChangeTableMissing => {
                    debug!(
                        "no changes to pull for table {} because {} does not exist",
                        table.qualified_name(),
                        name
                    );
                }
                Err(err) if !table.config.stop_on_error => {
                    error!(
                        "copying change data for table {} failed with error: {}",
                        table.qualified_name(),
                        err
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Ok(found)
    }

    /// Downloads the consolidated change tables, renaming each to the end
    /// batch's batch-scoped name on the slave so the apply path is identical
    /// to the single-batch one.
    async fn download_consolidated(
        &self,
        tables: &[&ResolvedTable],
        ctid: BatchId,
    ) -> CdcResult<()> {
        for table in tables {
            let change_table = table.change_table(ctid, &self.config.slave_name);
            let source = change_table.consolidated_name();
            let dest = change_table.batch_scoped_name();

            let copied = self
                .copier
                .copy_table(
                    &self.config.relay_db,
                    table.schema(),
                    &source,
                    &self.config.slave_ct_db,
                    &dest,
                    self.config.copy_timeout(),
                )
                .await;

            match copied {
                Ok(rows) => {
                    trace!("copied {} row(s) of table {}.{} to slave", rows, table.schema(), source);
                }
                Err(err) if err.kind() == ErrorKind::ChangeTableMissing => {
                    debug!(
                        "no consolidated changes for table {} because {} does not exist",
                        table.qualified_name(),
                        source
                    );
                }
                Err(err) if !table.config.stop_on_error => {
                    error!(
                        "copying consolidated changes for table {} failed with error: {}",
                        table.qualified_name(),
                        err
                    );
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// Probes which change tables exist for a batch without copying anything.
    async fn populate_change_tables(
        &self,
        tables: &[ResolvedTable],
        db: &str,
        ctid: BatchId,
    ) -> CdcResult<Vec<ChangeTable>> {
        let mut found = Vec::new();

        for table in tables {
            let change_table = table.change_table(ctid, &self.config.slave_name);
            let name = change_table.batch_scoped_name();
            if self.store.table_exists(db, table.schema(), &name).await? {
                found.push(change_table);
            } else {
                debug!("did not find change table {name}");
            }
        }

        Ok(found)
    }
}
