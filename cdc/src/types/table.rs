use cdc_config::shared::TableConfig;

use crate::types::batch::BatchId;
use crate::types::change_table::ChangeTable;
use crate::types::column::Column;

/// Suffix pairing a table with its archive twin.
const ARCHIVE_SUFFIX: &str = "Archive";

/// Suffix of the append-only history twin of a destination table.
const HISTORY_SUFFIX: &str = "_History";

/// A configured table together with the live column list fetched from the
/// destination for this run.
///
/// The configuration part is read-only; the column list is the per-run
/// computed field-list cache, already filtered through the configured
/// column allow-list.
#[derive(Debug, Clone)]
pub struct ResolvedTable {
    pub config: TableConfig,
    columns: Vec<Column>,
}

impl ResolvedTable {
    /// Creates a resolved table with an empty field list.
    pub fn new(config: TableConfig) -> Self {
        Self {
            config,
            columns: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn schema(&self) -> &str {
        &self.config.schema
    }

    /// Schema-qualified table name, used for log output.
    pub fn qualified_name(&self) -> String {
        self.config.qualified_name()
    }

    /// Installs the live column list, honoring the configured allow-list.
    pub fn set_field_list(&mut self, fields: Vec<Column>) {
        self.columns = fields
            .into_iter()
            .filter(|column| self.config.includes_column(&column.name))
            .collect();
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Names of the primary-key columns in the resolved field list.
    pub fn primary_keys(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|column| column.primary_key)
            .map(|column| column.name.clone())
            .collect()
    }

    /// Name of this table's append-only history twin.
    pub fn history_table_name(&self) -> String {
        format!("{}{}", self.config.name, HISTORY_SUFFIX)
    }

    /// Base table name when this is an archive table.
    ///
    /// Returns `None` for non-archive tables and for a table literally named
    /// `Archive`, which is treated as an ordinary standalone table.
    pub fn archive_base_name(&self) -> Option<&str> {
        let base = self.config.name.strip_suffix(ARCHIVE_SUFFIX)?;
        if base.is_empty() {
            return None;
        }

        Some(base)
    }

    /// The change table holding this table's captured changes for a batch.
    pub fn change_table(&self, ctid: BatchId, scope: &str) -> ChangeTable {
        ChangeTable::new(&self.config.name, &self.config.schema, ctid, scope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::table_config;

    #[test]
    fn test_archive_base_name() {
        let order = ResolvedTable::new(table_config("Order"));
        let order_archive = ResolvedTable::new(table_config("OrderArchive"));
        let bare_archive = ResolvedTable::new(table_config("Archive"));

        assert_eq!(order.archive_base_name(), None);
        assert_eq!(order_archive.archive_base_name(), Some("Order"));
        assert_eq!(bare_archive.archive_base_name(), None);
    }

    #[test]
    fn test_history_table_name() {
        let table = ResolvedTable::new(table_config("Customer"));

        assert_eq!(table.history_table_name(), "Customer_History");
    }

    #[test]
    fn test_set_field_list_honors_allow_list() {
        let mut config = table_config("Customer");
        config.column_list = Some(vec!["id".to_string(), "name".to_string()]);
        let mut table = ResolvedTable::new(config);

        table.set_field_list(vec![
            Column::new("id", true),
            Column::new("name", false),
            Column::new("email", false),
        ]);

        assert_eq!(table.columns().len(), 2);
        assert_eq!(table.primary_keys(), vec!["id".to_string()]);
    }
}
