use cdc_config::shared::TableConfig;
use tracing::{error, trace};

use crate::error::CdcResult;
use crate::store::database::Database;
use crate::types::ResolvedTable;

/// Fetches the live column list for every configured table from the
/// destination, producing the per-run field-list cache.
///
/// A table whose column list cannot be fetched is kept with an empty field
/// list when its policy allows it, so sibling tables still run; stages that
/// need the field list will fail for just that table and it is retried on the
/// next run.
pub async fn resolve_field_lists<D>(
    database: &D,
    db: &str,
    tables: &[TableConfig],
) -> CdcResult<Vec<ResolvedTable>>
where
    D: Database + Send + Sync,
{
    let mut resolved = Vec::with_capacity(tables.len());

    for config in tables {
        let mut table = ResolvedTable::new(config.clone());
        match database.column_list(db, &config.schema, &config.name).await {
            Ok(columns) => {
                table.set_field_list(columns);
                trace!(
                    "resolved {} column(s) for table {}",
                    table.columns().len(),
                    table.qualified_name()
                );
            }
            Err(err) if !config.stop_on_error => {
                error!(
                    "error setting field list for table {}: {}",
                    config.qualified_name(),
                    err
                );
            }
            Err(err) => return Err(err),
        }
        resolved.push(table);
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::test_utils::table_config;
    use crate::types::Column;

    #[tokio::test]
    async fn test_resolves_columns_for_existing_tables() {
        let store = MemoryStore::new();
        store
            .create_table(
                "Slave",
                "dbo",
                "Customer",
                vec![Column::new("id", true), Column::new("name", false)],
            )
            .await;

        let configs = vec![table_config("Customer"), table_config("Unseen")];
        let resolved = resolve_field_lists(&store, "Slave", &configs).await.unwrap();

        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].primary_keys(), vec!["id".to_string()]);
        // A missing destination table resolves to an empty field list.
        assert!(resolved[1].columns().is_empty());
    }
}
