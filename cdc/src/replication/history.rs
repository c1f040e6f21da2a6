use std::collections::HashSet;
use tracing::{debug, error};

use crate::concurrency::pool::{WorkerPool, collect_results};
use crate::error::CdcResult;
use crate::store::database::Database;
use crate::types::{BatchId, ChangeTable, ResolvedTable};

/// Appends applied changes into append-only history tables.
///
/// Only tables configured with history retention take part; everything else is
/// skipped silently. Per-table failures are isolated exactly like in the
/// change applier.
#[derive(Debug)]
pub struct HistorySyncer<D> {
    database: D,
    pool: WorkerPool,
    ct_db: String,
    dest_db: String,
}

impl<D> HistorySyncer<D>
where
    D: Database + Send + Sync,
{
    pub fn new(
        database: D,
        pool: WorkerPool,
        ct_db: impl Into<String>,
        dest_db: impl Into<String>,
    ) -> Self {
        Self {
            database,
            pool,
            ct_db: ct_db.into(),
            dest_db: dest_db.into(),
        }
    }

    /// Appends the batch's changes to every history-retaining table that has
    /// any, returning the total number of rows appended.
    pub async fn sync(
        &self,
        tables: &[ResolvedTable],
        change_tables: &[ChangeTable],
        ctid: BatchId,
    ) -> CdcResult<u64> {
        let changed: HashSet<&str> = change_tables
            .iter()
            .map(|change_table| change_table.table.as_str())
            .collect();

        let units: Vec<_> = tables
            .iter()
            .filter(|table| table.config.record_history && changed.contains(table.name()))
            .map(|table| async move {
                match self
                    .database
                    .append_to_history(table, &self.ct_db, &self.dest_db, ctid)
                    .await
                {
                    Ok(appended) => {
                        debug!(
                            "appended {} row(s) to history table {}",
                            appended,
                            table.history_table_name()
                        );

                        Ok(appended)
                    }
                    Err(err) if !table.config.stop_on_error => {
                        error!(
                            "syncing history for table {} failed, it will be retried next run: {}",
                            table.qualified_name(),
                            err
                        );

                        Ok(0)
                    }
                    Err(err) => Err(err),
                }
            })
            .collect();

        if units.is_empty() {
            debug!("no history-retaining tables with changes in batch {ctid}");
            return Ok(0);
        }

        let appended = collect_results(self.pool.run(units).await)?;

        Ok(appended.into_iter().sum())
    }
}
