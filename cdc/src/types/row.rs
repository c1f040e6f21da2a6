use std::collections::BTreeMap;
use std::fmt;

/// Minimal cell model for captured rows.
///
/// The core never interprets destination data beyond primary-key matching, so
/// only the handful of variants the in-memory collaborators and tests need are
/// modeled here; the real data plane stays behind the collaborator traits.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Null => f.write_str("NULL"),
            Cell::Bool(value) => value.fmt(f),
            Cell::I64(value) => value.fmt(f),
            Cell::F64(value) => value.fmt(f),
            Cell::String(value) => value.fmt(f),
        }
    }
}

/// Operation a captured row represents.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

impl ChangeOperation {
    pub fn is_delete(&self) -> bool {
        matches!(self, ChangeOperation::Delete)
    }
}

/// One captured row change together with the change-tracking version that
/// produced it.
#[derive(Debug, Clone)]
pub struct ChangeRow {
    pub operation: ChangeOperation,
    pub version: i64,
    /// Column values keyed by column name.
    pub values: BTreeMap<String, Cell>,
}

impl ChangeRow {
    pub fn new(operation: ChangeOperation, version: i64) -> Self {
        Self {
            operation,
            version,
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, column: impl Into<String>, value: Cell) -> Self {
        self.values.insert(column.into(), value);
        self
    }

    pub fn value(&self, column: &str) -> Option<&Cell> {
        self.values.get(column)
    }

    /// Composite key of this row over the given primary-key columns.
    ///
    /// Missing values render as `NULL`, so two rows missing the same key
    /// column compare equal, matching how the merge joins on the key.
    pub fn key(&self, primary_keys: &[String]) -> String {
        primary_keys
            .iter()
            .map(|pk| {
                self.values
                    .get(pk)
                    .map(|cell| cell.to_string())
                    .unwrap_or_else(|| Cell::Null.to_string())
            })
            .collect::<Vec<_>>()
            .join("|")
    }
}
