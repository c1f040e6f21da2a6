use metrics::{counter, gauge};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::concurrency::pool::{WorkerPool, collect_results};
use crate::error::CdcResult;
use crate::metrics::{CDC_ROW_COUNT_MISMATCH_PCT, CDC_ROWS_APPLIED_TOTAL};
use crate::store::database::{ApplyCounts, Database};
use crate::store::ledger::LedgerStore;
use crate::types::{BatchId, ChangeTable, ResolvedTable};

/// One apply unit: a table, optionally paired with its archive twin.
///
/// A table is paired to at most one archive partner; once paired, neither
/// member is independently re-queued.
#[derive(Debug)]
struct ApplyUnit<'a> {
    table: &'a ResolvedTable,
    archive: Option<&'a ResolvedTable>,
}

impl ApplyUnit<'_> {
    fn stop_on_error(&self) -> bool {
        self.table.config.stop_on_error
            || self
                .archive
                .map(|archive| archive.config.stop_on_error)
                .unwrap_or(false)
    }

    fn describe(&self) -> String {
        match self.archive {
            Some(archive) => format!(
                "{} with archive {}",
                self.table.qualified_name(),
                archive.qualified_name()
            ),
            None => self.table.qualified_name(),
        }
    }
}

/// Builds the apply units for the tables that have captured changes.
///
/// A table whose name ends in `Archive` is paired with its base table when the
/// base also has changes this batch; each pair is applied as one atomic unit.
/// Everything else, including an archive without a changed base and a table
/// literally named `Archive`, is applied standalone.
fn pair_archive_units<'a>(
    tables: &'a [ResolvedTable],
    changed: &HashSet<&str>,
) -> Vec<ApplyUnit<'a>> {
    let mut paired: HashSet<&str> = HashSet::new();
    let mut units = Vec::new();

    for table in tables {
        if !changed.contains(table.name()) {
            continue;
        }

        if let Some(base) = table.archive_base_name()
            && changed.contains(base)
            && let Some(base_table) = tables.iter().find(|t| t.name() == base)
        {
            units.push(ApplyUnit {
                table: base_table,
                archive: Some(table),
            });
            paired.insert(base_table.name());
            paired.insert(table.name());
        }
    }

    for table in tables {
        if changed.contains(table.name()) && !paired.contains(table.name()) {
            units.push(ApplyUnit {
                table,
                archive: None,
            });
        }
    }

    units
}

/// Applies a batch's captured row changes to the destination tables with
/// bounded parallelism and per-unit failure isolation.
#[derive(Debug)]
pub struct ChangeApplier<L, D> {
    ledger: L,
    database: D,
    pool: WorkerPool,
    relay_db: String,
    dest_db: String,
    ct_db: String,
    apply_timeout: Duration,
}

impl<L, D> ChangeApplier<L, D>
where
    L: LedgerStore + Send + Sync,
    D: Database + Send + Sync,
{
    pub fn new(
        ledger: L,
        database: D,
        pool: WorkerPool,
        relay_db: impl Into<String>,
        dest_db: impl Into<String>,
        ct_db: impl Into<String>,
        apply_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            database,
            pool,
            relay_db: relay_db.into(),
            dest_db: dest_db.into(),
            ct_db: ct_db.into(),
            apply_timeout,
        }
    }

    /// Applies the batch's changes and returns the aggregate row counts of the
    /// units that succeeded.
    ///
    /// A failing unit with a lenient policy is excluded from the aggregate and
    /// retried on the next run; a stop-on-error unit aborts the run once all
    /// units have finished.
    pub async fn apply(
        &self,
        tables: &[ResolvedTable],
        change_tables: &[ChangeTable],
        ctid: BatchId,
    ) -> CdcResult<ApplyCounts> {
        let changed: HashSet<&str> = change_tables
            .iter()
            .map(|change_table| change_table.table.as_str())
            .collect();
        let units = pair_archive_units(tables, &changed);

        info!("applying changes for {} unit(s) in batch {}", units.len(), ctid);

        let futures: Vec<_> = units
            .into_iter()
            .map(|unit| async move {
                let result = self
                    .database
                    .apply_table_changes(
                        unit.table,
                        unit.archive,
                        &self.dest_db,
                        &self.ct_db,
                        ctid,
                        self.apply_timeout,
                    )
                    .await;

                match result {
                    Ok(counts) => {
                        debug!(
                            "applied {} upsert(s) and {} delete(s) to {}",
                            counts.inserted,
                            counts.deleted,
                            unit.describe()
                        );
                        counter!(CDC_ROWS_APPLIED_TOTAL)
                            .increment(counts.inserted + counts.deleted);

                        Ok(counts)
                    }
                    Err(err) if !unit.stop_on_error() => {
                        error!(
                            "applying changes to {} failed, it will be retried next run: {}",
                            unit.describe(),
                            err
                        );

                        Ok(ApplyCounts::default())
                    }
                    Err(err) => Err(err),
                }
            })
            .collect();

        let unit_counts = collect_results(self.pool.run(futures).await)?;
        let mut total = ApplyCounts::default();
        for counts in unit_counts {
            total.merge(counts);
        }

        self.reconcile(&changed, ctid, total).await;

        Ok(total)
    }

    /// Compares the aggregate applied count against the expected counts
    /// recorded upstream and reports the mismatch percentage.
    ///
    /// This is an observability signal only: reading the expected counts can
    /// fail without failing the run, and a batch with no recorded expectation
    /// produces no signal at all.
    async fn reconcile(&self, changed: &HashSet<&str>, ctid: BatchId, counts: ApplyCounts) {
        let expected = match self.ledger.expected_row_counts(&self.relay_db, ctid).await {
            Ok(expected) => expected,
            Err(err) => {
                warn!("could not read expected row counts for batch {ctid}: {err}");
                return;
            }
        };

        let expected_total: u64 = expected
            .iter()
            .filter(|(table, _)| changed.contains(table.as_str()))
            .map(|(_, rows)| rows)
            .sum();
        if expected_total == 0 {
            debug!("no expected row counts recorded for batch {ctid}");
            return;
        }

        let applied = counts.inserted as f64;
        let mismatch = (applied - expected_total as f64).abs() / expected_total as f64 * 100.0;
        gauge!(CDC_ROW_COUNT_MISMATCH_PCT).set(mismatch);
        info!(
            "applied {} row(s) against {} expected for batch {} ({:.2}% mismatch)",
            counts.inserted, expected_total, ctid, mismatch
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::test_utils::{change_row, resolved_table, table_config};
    use crate::types::{Cell, ChangeOperation, Column};

    fn changed<'a>(names: &[&'a str]) -> HashSet<&'a str> {
        names.iter().copied().collect()
    }

    fn order_tables() -> Vec<ResolvedTable> {
        vec![
            resolved_table(table_config("Order"), &[("id", true)]),
            resolved_table(table_config("OrderArchive"), &[("id", true)]),
        ]
    }

    #[test]
    fn test_table_and_archive_pair_into_one_unit() {
        let tables = order_tables();
        let units = pair_archive_units(&tables, &changed(&["Order", "OrderArchive"]));

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].table.name(), "Order");
        assert_eq!(units[0].archive.unwrap().name(), "OrderArchive");
    }

    #[test]
    fn test_archive_without_changed_base_is_standalone() {
        let tables = order_tables();
        let units = pair_archive_units(&tables, &changed(&["OrderArchive"]));

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].table.name(), "OrderArchive");
        assert!(units[0].archive.is_none());
    }

    #[test]
    fn test_table_literally_named_archive_is_never_paired() {
        let tables = vec![resolved_table(table_config("Archive"), &[("id", true)])];
        let units = pair_archive_units(&tables, &changed(&["Archive"]));

        assert_eq!(units.len(), 1);
        assert_eq!(units[0].table.name(), "Archive");
        assert!(units[0].archive.is_none());
    }

    #[tokio::test]
    async fn test_apply_aggregates_counts_across_units() {
        let store = MemoryStore::new();
        let columns = vec![Column::new("id", true), Column::new("name", false)];

        store.create_table("Slave", "dbo", "Customer", columns.clone()).await;
        store.create_table("SlaveCT", "dbo", "tblCTCustomer_5", columns.clone()).await;
        store
            .insert_rows("SlaveCT", "dbo", "tblCTCustomer_5", vec![
                change_row(ChangeOperation::Insert, 50, &[("id", Cell::I64(1)), ("name", Cell::String("a".into()))]),
                change_row(ChangeOperation::Insert, 50, &[("id", Cell::I64(2)), ("name", Cell::String("b".into()))]),
            ])
            .await
            .unwrap();

        let tables = vec![resolved_table(table_config("Customer"), &[("id", true), ("name", false)])];
        let change_tables = vec![ChangeTable::new("Customer", "dbo", BatchId(5), "slave01")];

        let applier = ChangeApplier::new(
            store.clone(),
            store.clone(),
            WorkerPool::new(2),
            "Relay",
            "Slave",
            "SlaveCT",
            Duration::from_secs(60),
        );
        let counts = applier.apply(&tables, &change_tables, BatchId(5)).await.unwrap();

        assert_eq!(counts, ApplyCounts { inserted: 2, deleted: 0 });
        assert_eq!(store.rows("Slave", "dbo", "Customer").await.len(), 2);
    }

    #[tokio::test]
    async fn test_failing_unit_is_excluded_from_the_aggregate() {
        let store = MemoryStore::new();
        let columns = vec![Column::new("id", true)];

        store.create_table("Slave", "dbo", "Customer", columns.clone()).await;
        store.create_table("SlaveCT", "dbo", "tblCTCustomer_5", columns.clone()).await;
        store
            .insert_rows("SlaveCT", "dbo", "tblCTCustomer_5", vec![
                change_row(ChangeOperation::Insert, 50, &[("id", Cell::I64(1))]),
            ])
            .await
            .unwrap();

        // Ghost's change table exists but its destination table does not, so
        // that unit fails while Customer still applies.
        store.create_table("SlaveCT", "dbo", "tblCTGhost_5", columns.clone()).await;

        let tables = vec![
            resolved_table(table_config("Customer"), &[("id", true)]),
            resolved_table(table_config("Ghost"), &[("id", true)]),
        ];
        let change_tables = vec![
            ChangeTable::new("Customer", "dbo", BatchId(5), "slave01"),
            ChangeTable::new("Ghost", "dbo", BatchId(5), "slave01"),
        ];

        let applier = ChangeApplier::new(
            store.clone(),
            store.clone(),
            WorkerPool::new(2),
            "Relay",
            "Slave",
            "SlaveCT",
            Duration::from_secs(60),
        );
        let counts = applier.apply(&tables, &change_tables, BatchId(5)).await.unwrap();

        assert_eq!(counts, ApplyCounts { inserted: 1, deleted: 0 });
    }
}
