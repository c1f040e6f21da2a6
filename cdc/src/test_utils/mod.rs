//! Builders shared by unit and scenario tests.

use cdc_config::shared::TableConfig;

use crate::types::{Cell, ChangeOperation, ChangeRow, Column, ResolvedTable};

/// A table config in the default schema with no allow-list and lenient error policy.
pub fn table_config(name: &str) -> TableConfig {
    TableConfig {
        name: name.to_string(),
        schema: "dbo".to_string(),
        column_list: None,
        stop_on_error: false,
        record_history: false,
    }
}

/// A resolved table with the given `(column, primary_key)` field list installed.
pub fn resolved_table(config: TableConfig, columns: &[(&str, bool)]) -> ResolvedTable {
    let mut table = ResolvedTable::new(config);
    table.set_field_list(
        columns
            .iter()
            .map(|(name, primary_key)| Column::new(*name, *primary_key))
            .collect(),
    );

    table
}

/// A captured row with the given values.
pub fn change_row(operation: ChangeOperation, version: i64, values: &[(&str, Cell)]) -> ChangeRow {
    let mut row = ChangeRow::new(operation, version);
    for (column, value) in values {
        row.values.insert(column.to_string(), value.clone());
    }

    row
}
