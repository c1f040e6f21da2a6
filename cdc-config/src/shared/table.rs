use serde::{Deserialize, Serialize};

/// Static per-table replication configuration.
///
/// The column list, when present, acts as an allow-list: captured changes and
/// schema changes for columns outside of it are skipped. When absent, all
/// columns of the destination table are replicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TableConfig {
    /// Destination table name.
    pub name: String,
    /// Schema the table lives in.
    pub schema: String,
    /// Explicit column allow-list; `None` means all columns.
    #[serde(default)]
    pub column_list: Option<Vec<String>>,
    /// Whether a failure on this table aborts the whole run instead of being
    /// logged and retried on the next run.
    #[serde(default)]
    pub stop_on_error: bool,
    /// Whether applied changes are also appended to this table's history twin.
    #[serde(default)]
    pub record_history: bool,
}

impl TableConfig {
    /// Returns `true` if the given column is replicated for this table.
    ///
    /// Column names are compared case-insensitively, matching how the
    /// destination database resolves identifiers.
    pub fn includes_column(&self, column: &str) -> bool {
        match &self.column_list {
            None => true,
            Some(list) => list.iter().any(|c| c.eq_ignore_ascii_case(column)),
        }
    }

    /// Schema-qualified table name, used for log output.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with_columns(columns: &[&str]) -> TableConfig {
        TableConfig {
            name: "Customer".to_string(),
            schema: "dbo".to_string(),
            column_list: Some(columns.iter().map(|c| c.to_string()).collect()),
            stop_on_error: false,
            record_history: false,
        }
    }

    #[test]
    fn test_includes_column_without_list() {
        let table = TableConfig {
            column_list: None,
            ..table_with_columns(&[])
        };

        assert!(table.includes_column("anything"));
    }

    #[test]
    fn test_includes_column_is_case_insensitive() {
        let table = table_with_columns(&["Id", "Name"]);

        assert!(table.includes_column("id"));
        assert!(table.includes_column("NAME"));
        assert!(!table.includes_column("Email"));
    }
}
