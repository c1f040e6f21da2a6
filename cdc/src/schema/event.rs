use std::fmt;

use crate::types::ColumnType;

/// Kind of DDL event captured on the master.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SchemaOp {
    Rename,
    Modify,
    Add,
    Drop,
}

impl fmt::Display for SchemaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaOp::Rename => f.write_str("rename"),
            SchemaOp::Modify => f.write_str("modify"),
            SchemaOp::Add => f.write_str("add"),
            SchemaOp::Drop => f.write_str("drop"),
        }
    }
}

/// One captured DDL event.
///
/// Events are ordered by the id assigned at capture time and must be applied
/// strictly in ascending id order per table, even when different tables'
/// events interleave freely.
#[derive(Debug, Clone)]
pub struct SchemaChangeEvent {
    pub id: i64,
    pub op: SchemaOp,
    pub schema: String,
    pub table: String,
    pub column: String,
    /// New column name; only meaningful for [`SchemaOp::Rename`].
    pub new_name: Option<String>,
    /// New declared type; only meaningful for [`SchemaOp::Add`] and [`SchemaOp::Modify`].
    pub new_type: Option<ColumnType>,
}

impl SchemaChangeEvent {
    pub fn rename(
        id: i64,
        schema: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            op: SchemaOp::Rename,
            schema: schema.into(),
            table: table.into(),
            column: column.into(),
            new_name: Some(new_name.into()),
            new_type: None,
        }
    }

    pub fn modify(
        id: i64,
        schema: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        new_type: ColumnType,
    ) -> Self {
        Self {
            id,
            op: SchemaOp::Modify,
            schema: schema.into(),
            table: table.into(),
            column: column.into(),
            new_name: None,
            new_type: Some(new_type),
        }
    }

    pub fn add(
        id: i64,
        schema: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
        new_type: ColumnType,
    ) -> Self {
        Self {
            id,
            op: SchemaOp::Add,
            schema: schema.into(),
            table: table.into(),
            column: column.into(),
            new_name: None,
            new_type: Some(new_type),
        }
    }

    pub fn drop(
        id: i64,
        schema: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        Self {
            id,
            op: SchemaOp::Drop,
            schema: schema.into(),
            table: table.into(),
            column: column.into(),
            new_name: None,
            new_type: None,
        }
    }

    /// Short description used when wrapping application failures.
    pub fn describe(&self) -> String {
        format!(
            "{} column {}.{}.{}",
            self.op, self.schema, self.table, self.column
        )
    }
}
