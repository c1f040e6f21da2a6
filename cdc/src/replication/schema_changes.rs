use std::collections::HashMap;
use tracing::{debug, error, info};

use crate::concurrency::pool::{WorkerPool, collect_results};
use crate::error::{CdcError, CdcResult, ErrorKind};
use crate::schema::{SchemaChangeEvent, SchemaOp};
use crate::store::database::Database;
use crate::store::ledger::LedgerStore;
use crate::types::{BatchId, ResolvedTable};
use crate::{bail, cdc_error};

/// Applies the DDL events recorded for a batch to the destination, before any
/// data changes for that batch are applied.
///
/// Events for the same table are applied strictly in ascending event id order;
/// different tables' events run as independent bounded-parallel units. Events
/// for untracked tables, or for columns excluded by a table's allow-list, are
/// skipped with a log line.
#[derive(Debug)]
pub struct SchemaChangePropagator<L, D> {
    ledger: L,
    database: D,
    pool: WorkerPool,
    relay_db: String,
    dest_db: String,
}

impl<L, D> SchemaChangePropagator<L, D>
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
    ) -> Self {
        Self {
            ledger,
            database,
            pool,
            relay_db: relay_db.into(),
            dest_db: dest_db.into(),
        }
    }

    /// Applies every schema change recorded for `ctid`.
    pub async fn apply(&self, tables: &[ResolvedTable], ctid: BatchId) -> CdcResult<()> {
        let mut events = self.ledger.schema_changes(&self.relay_db, ctid).await?;
        if events.is_empty() {
            debug!("no schema changes recorded for batch {ctid}");
            return Ok(());
        }

        // Per-table order matters, cross-table order does not: sort the whole
        // set once, then bucket per table.
        events.sort_by_key(|event| event.id);

        let mut per_table: HashMap<usize, Vec<SchemaChangeEvent>> = HashMap::new();
        for event in events {
            let Some(index) = tables
                .iter()
                .position(|t| t.name().eq_ignore_ascii_case(&event.table))
            else {
                debug!(
                    "ignoring schema change for table {} because it isn't in config",
                    event.table
                );
                continue;
            };

            if !tables[index].config.includes_column(&event.column) {
                info!(
                    "skipped schema change {} because the column it impacts is not in our list",
                    event.id
                );
                continue;
            }

            per_table.entry(index).or_default().push(event);
        }

        let units: Vec<_> = per_table
            .into_iter()
            .map(|(index, table_events)| {
                let table = &tables[index];
                async move {
                    match self.apply_table_events(table, &table_events).await {
                        Err(err) if !table.config.stop_on_error => {
                            error!(
                                "applying schema changes to table {} failed, skipping it this run: {}",
                                table.qualified_name(),
                                err
                            );

                            Ok(())
                        }
                        other => other,
                    }
                }
            })
            .collect();

        collect_results(self.pool.run(units).await).map(|_| ())
    }

    /// Applies one table's events in ascending event id order, stopping at the
    /// first failure since later events may depend on earlier ones.
    async fn apply_table_events(
        &self,
        table: &ResolvedTable,
        events: &[SchemaChangeEvent],
    ) -> CdcResult<()> {
        for event in events {
            info!(
                "processing schema change {} of type {} for table {}",
                event.id,
                event.op,
                table.qualified_name()
            );

            self.apply_event(table, event).await.map_err(|err| {
                cdc_error!(
                    ErrorKind::SchemaChangeFailed,
                    "failed to apply schema change",
                    format!("{}: {}", event.describe(), err)
                )
            })?;
        }

        Ok(())
    }

    async fn apply_event(&self, table: &ResolvedTable, event: &SchemaChangeEvent) -> CdcResult<()> {
        match event.op {
            SchemaOp::Rename => {
                let Some(new_name) = &event.new_name else {
                    bail!(
                        ErrorKind::InvalidData,
                        "rename event carries no new column name"
                    );
                };
                debug!("renaming column {} to {}", event.column, new_name);

                self.database
                    .rename_column(table, &self.dest_db, &event.column, new_name)
                    .await
            }
            SchemaOp::Modify => {
                let Some(new_type) = &event.new_type else {
                    bail!(ErrorKind::InvalidData, "modify event carries no data type");
                };
                debug!("changing data type on column {} to {}", event.column, new_type);

                self.database
                    .modify_column(table, &self.dest_db, &event.column, new_type)
                    .await
            }
            SchemaOp::Add => {
                let Some(new_type) = &event.new_type else {
                    bail!(ErrorKind::InvalidData, "add event carries no data type");
                };
                debug!("adding column {} as {}", event.column, new_type);

                self.database
                    .add_column(table, &self.dest_db, &event.column, new_type)
                    .await
            }
            SchemaOp::Drop => {
                debug!("dropping column {}", event.column);

                self.database
                    .drop_column(table, &self.dest_db, &event.column)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::test_utils::{resolved_table, table_config};
    use crate::types::{Column, ColumnType};

    const RELAY_DB: &str = "Relay";
    const DEST_DB: &str = "Slave";

    fn propagator(store: &MemoryStore) -> SchemaChangePropagator<MemoryStore, MemoryStore> {
        SchemaChangePropagator::new(
            store.clone(),
            store.clone(),
            WorkerPool::new(2),
            RELAY_DB,
            DEST_DB,
        )
    }

    #[tokio::test]
    async fn test_events_apply_in_ascending_id_order() {
        let store = MemoryStore::new();
        store
            .create_table(DEST_DB, "dbo", "Customer", vec![
                Column::new("id", true),
                Column::new("name", false),
            ])
            .await;

        // Recorded out of order: 3, 1, 2. Each rename only works if the
        // previous one already ran, so success proves the order 1, 2, 3.
        store
            .record_schema_change(
                RELAY_DB,
                BatchId(5),
                SchemaChangeEvent::rename(3, "dbo", "Customer", "name_v2", "name_v3"),
            )
            .await;
        store
            .record_schema_change(
                RELAY_DB,
                BatchId(5),
                SchemaChangeEvent::rename(1, "dbo", "Customer", "name", "name_v1"),
            )
            .await;
        store
            .record_schema_change(
                RELAY_DB,
                BatchId(5),
                SchemaChangeEvent::rename(2, "dbo", "Customer", "name_v1", "name_v2"),
            )
            .await;

        let table = resolved_table(table_config("Customer"), &[("id", true), ("name", false)]);
        propagator(&store).apply(&[table], BatchId(5)).await.unwrap();

        let columns = store.column_list(DEST_DB, "dbo", "Customer").await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name_v3"]);
    }

    #[tokio::test]
    async fn test_untracked_table_and_excluded_column_are_skipped() {
        let store = MemoryStore::new();
        store
            .create_table(DEST_DB, "dbo", "Customer", vec![
                Column::new("id", true),
                Column::new("name", false),
            ])
            .await;

        store
            .record_schema_change(
                RELAY_DB,
                BatchId(5),
                SchemaChangeEvent::drop(1, "dbo", "Elsewhere", "anything"),
            )
            .await;
        store
            .record_schema_change(
                RELAY_DB,
                BatchId(5),
                SchemaChangeEvent::drop(2, "dbo", "Customer", "name"),
            )
            .await;

        let mut config = table_config("Customer");
        config.column_list = Some(vec!["id".to_string()]);
        let table = resolved_table(config, &[("id", true)]);

        propagator(&store).apply(&[table], BatchId(5)).await.unwrap();

        // The drop targeted a column outside the allow-list, so it is untouched.
        let columns = store.column_list(DEST_DB, "dbo", "Customer").await.unwrap();
        assert_eq!(columns.len(), 2);
    }

    #[tokio::test]
    async fn test_add_column_is_mirrored_to_history_twin() {
        let store = MemoryStore::new();
        store
            .create_table(DEST_DB, "dbo", "Customer", vec![Column::new("id", true)])
            .await;
        store
            .create_table(DEST_DB, "dbo", "Customer_History", vec![Column::new("id", true)])
            .await;

        store
            .record_schema_change(
                RELAY_DB,
                BatchId(5),
                SchemaChangeEvent::add(1, "dbo", "Customer", "email", ColumnType::new("varchar").with_length(200)),
            )
            .await;

        let mut config = table_config("Customer");
        config.record_history = true;
        let table = resolved_table(config, &[("id", true)]);

        propagator(&store).apply(&[table], BatchId(5)).await.unwrap();

        assert_eq!(store.column_list(DEST_DB, "dbo", "Customer").await.unwrap().len(), 2);
        assert_eq!(
            store.column_list(DEST_DB, "dbo", "Customer_History").await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_history_twin_without_the_column_is_a_no_op() {
        let store = MemoryStore::new();
        store
            .create_table(DEST_DB, "dbo", "Customer", vec![
                Column::new("id", true),
                Column::new("name", false),
            ])
            .await;
        // The twin drifted: it never had the column being dropped.
        store
            .create_table(DEST_DB, "dbo", "Customer_History", vec![Column::new("id", true)])
            .await;

        store
            .record_schema_change(
                RELAY_DB,
                BatchId(5),
                SchemaChangeEvent::drop(1, "dbo", "Customer", "name"),
            )
            .await;

        let mut config = table_config("Customer");
        config.record_history = true;
        let table = resolved_table(config, &[("id", true), ("name", false)]);

        propagator(&store).apply(&[table], BatchId(5)).await.unwrap();

        assert_eq!(store.column_list(DEST_DB, "dbo", "Customer").await.unwrap().len(), 1);
        assert_eq!(
            store.column_list(DEST_DB, "dbo", "Customer_History").await.unwrap().len(),
            1
        );
    }
}
