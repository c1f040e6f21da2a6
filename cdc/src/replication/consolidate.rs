use metrics::counter;
use std::collections::HashMap;
use tracing::{debug, error, info};

use crate::concurrency::pool::{WorkerPool, collect_results};
use crate::error::{CdcError, CdcResult, ErrorKind};
use crate::metrics::CDC_ROWS_CONSOLIDATED_TOTAL;
use crate::store::copy::TableCopier;
use crate::store::database::Database;
use crate::bail;
use crate::types::{ChangeTable, ResolvedTable};

/// Folds multiple pending batches' change tables into one consolidated change
/// table per table name.
///
/// Each table group is unioned from the highest batch id to the lowest, so the
/// de-duplication pass keeps the first-seen (most recent) row per primary key;
/// an older row for the same key is a superseded intermediate state.
#[derive(Debug)]
pub struct BatchConsolidator<D, C> {
    database: D,
    copier: C,
    pool: WorkerPool,
    relay_db: String,
}

impl<D, C> BatchConsolidator<D, C>
where
    D: Database + Send + Sync,
    C: TableCopier + Send + Sync,
{
    pub fn new(database: D, copier: C, pool: WorkerPool, relay_db: impl Into<String>) -> Self {
        Self {
            database,
            copier,
            pool,
            relay_db: relay_db.into(),
        }
    }

    /// Consolidates all change tables, one bounded-parallel unit per table
    /// name. A failing table is skipped unless it is marked stop-on-error;
    /// stop-on-error failures abort the run after all units have finished.
    pub async fn consolidate(
        &self,
        tables: &[ResolvedTable],
        change_tables: &[ChangeTable],
    ) -> CdcResult<()> {
        let mut groups: HashMap<&str, Vec<&ChangeTable>> = HashMap::new();
        for change_table in change_tables {
            groups
                .entry(change_table.table.as_str())
                .or_default()
                .push(change_table);
        }

        let units: Vec<_> = tables
            .iter()
            .filter_map(|table| {
                groups
                    .get(table.name())
                    .map(|group| (table, group.clone()))
            })
            .map(|(table, mut group)| async move {
                // Later batches' rows must win, so union newest first.
                group.sort_by(|a, b| b.ctid.cmp(&a.ctid));

                match self.consolidate_table(table, &group).await {
                    Ok(rows) => {
                        debug!(
                            "consolidated {} row(s) for table {}",
                            rows,
                            table.qualified_name()
                        );
                        counter!(CDC_ROWS_CONSOLIDATED_TOTAL).increment(rows);

                        Ok(())
                    }
                    Err(err) if !table.config.stop_on_error => {
                        error!(
                            "consolidating table {} failed, skipping it this run: {}",
                            table.qualified_name(),
                            err
                        );

                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            })
            .collect();

        info!("consolidating {} table group(s)", units.len());
        collect_results(self.pool.run(units).await).map(|_| ())
    }

    /// Consolidates one table group into its scope-scoped table.
    ///
    /// `group` must be ordered from highest to lowest batch id.
    async fn consolidate_table(
        &self,
        table: &ResolvedTable,
        group: &[&ChangeTable],
    ) -> CdcResult<u64> {
        let Some(newest) = group.first() else {
            bail!(
                ErrorKind::InvalidData,
                "cannot consolidate an empty change table group",
                table.qualified_name()
            );
        };
        let consolidated = newest.consolidated_name();

        // The highest-id change table defines the consolidated structure.
        self.copier
            .copy_table_definition(
                &self.relay_db,
                table.schema(),
                &newest.batch_scoped_name(),
                &self.relay_db,
                &consolidated,
            )
            .await?;

        let mut unioned = 0;
        for change_table in group {
            unioned += self
                .database
                .union_changes(
                    &self.relay_db,
                    table.schema(),
                    &change_table.batch_scoped_name(),
                    &consolidated,
                )
                .await?;
        }

        let removed = self
            .database
            .remove_duplicate_changes(table, &self.relay_db, table.schema(), &consolidated)
            .await?;

        Ok(unioned - removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::test_utils::{change_row, resolved_table, table_config};
    use crate::types::{BatchId, Cell, ChangeOperation, Column};

    const RELAY_DB: &str = "Relay";

    async fn seed_change_table(store: &MemoryStore, name: &str, rows: Vec<crate::types::ChangeRow>) {
        store
            .create_table(
                RELAY_DB,
                "dbo",
                name,
                vec![Column::new("id", true), Column::new("name", false)],
            )
            .await;
        store.insert_rows(RELAY_DB, "dbo", name, rows).await.unwrap();
    }

    #[tokio::test]
    async fn test_consolidation_keeps_most_recent_row_per_key() {
        let store = MemoryStore::new();

        // Batch 6: insert key 1 and key 2.
        seed_change_table(&store, "tblCTOrder_6", vec![
            change_row(ChangeOperation::Insert, 60, &[("id", Cell::I64(1)), ("name", Cell::String("v6".into()))]),
            change_row(ChangeOperation::Insert, 61, &[("id", Cell::I64(2)), ("name", Cell::String("v6".into()))]),
        ])
        .await;
        // Batch 7: update key 1.
        seed_change_table(&store, "tblCTOrder_7", vec![
            change_row(ChangeOperation::Update, 70, &[("id", Cell::I64(1)), ("name", Cell::String("v7".into()))]),
        ])
        .await;
        // Batch 8: delete key 2, reinsert key 3.
        seed_change_table(&store, "tblCTOrder_8", vec![
            change_row(ChangeOperation::Delete, 80, &[("id", Cell::I64(2))]),
            change_row(ChangeOperation::Insert, 81, &[("id", Cell::I64(3)), ("name", Cell::String("v8".into()))]),
        ])
        .await;

        let table = resolved_table(table_config("Order"), &[("id", true), ("name", false)]);
        let change_tables: Vec<ChangeTable> = [6, 7, 8]
            .into_iter()
            .map(|ctid| ChangeTable::new("Order", "dbo", BatchId(ctid), "slave01"))
            .collect();

        let consolidator = BatchConsolidator::new(
            store.clone(),
            store.clone(),
            WorkerPool::new(2),
            RELAY_DB,
        );
        consolidator
            .consolidate(std::slice::from_ref(&table), &change_tables)
            .await
            .unwrap();

        let rows = store.rows(RELAY_DB, "dbo", "tblCTOrder_slave01").await;
        // Exactly one row per primary key survives.
        assert_eq!(rows.len(), 3);

        let pk = vec!["id".to_string()];
        let by_key: std::collections::HashMap<String, &crate::types::ChangeRow> =
            rows.iter().map(|r| (r.key(&pk), r)).collect();

        // Key 1 resolves to the batch-7 update, not the batch-6 insert.
        assert_eq!(by_key["1"].version, 70);
        // Key 2 resolves to the batch-8 delete, superseding the batch-6 insert.
        assert!(by_key["2"].operation.is_delete());
        assert_eq!(by_key["3"].version, 81);
    }

    #[tokio::test]
    async fn test_failing_table_is_skipped_without_aborting_siblings() {
        let store = MemoryStore::new();

        seed_change_table(&store, "tblCTOrder_6", vec![
            change_row(ChangeOperation::Insert, 60, &[("id", Cell::I64(1)), ("name", Cell::String("v6".into()))]),
        ])
        .await;

        let healthy = resolved_table(table_config("Order"), &[("id", true), ("name", false)]);
        let broken = resolved_table(table_config("Ghost"), &[("id", true)]);

        // Ghost has a change table entry in the list but no physical table,
        // so its unit fails; with a lenient policy the run still succeeds.
        let change_tables = vec![
            ChangeTable::new("Order", "dbo", BatchId(6), "slave01"),
            ChangeTable::new("Ghost", "dbo", BatchId(6), "slave01"),
        ];

        let consolidator = BatchConsolidator::new(
            store.clone(),
            store.clone(),
            WorkerPool::new(2),
            RELAY_DB,
        );
        consolidator
            .consolidate(&[healthy, broken], &change_tables)
            .await
            .unwrap();

        assert_eq!(store.rows(RELAY_DB, "dbo", "tblCTOrder_slave01").await.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_on_error_table_aborts_the_run() {
        let store = MemoryStore::new();

        let mut config = table_config("Ghost");
        config.stop_on_error = true;
        let broken = resolved_table(config, &[("id", true)]);

        let change_tables = vec![ChangeTable::new("Ghost", "dbo", BatchId(6), "slave01")];

        let consolidator = BatchConsolidator::new(
            store.clone(),
            store.clone(),
            WorkerPool::new(2),
            RELAY_DB,
        );
        let err = consolidator
            .consolidate(&[broken], &change_tables)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ChangeTableMissing);
    }
}
