use crate::types::batch::BatchId;

/// One table's captured changes for one batch.
///
/// Change tables are discovered by probing which physical tables exist for a
/// batch; absence is the normal "no changes this batch" condition. A change
/// table stops being tracked once it has been folded into the scope-scoped
/// consolidated table.
#[derive(Debug, Clone)]
pub struct ChangeTable {
    /// Source table name.
    pub table: String,
    /// Schema of the source table.
    pub schema: String,
    /// Batch that captured these changes.
    pub ctid: BatchId,
    /// Consolidation scope, usually the slave identifier.
    pub scope: String,
}

impl ChangeTable {
    pub fn new(
        table: impl Into<String>,
        schema: impl Into<String>,
        ctid: BatchId,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            schema: schema.into(),
            ctid,
            scope: scope.into(),
        }
    }

    /// Physical name of the batch-scoped captured-change table.
    pub fn batch_scoped_name(&self) -> String {
        Self::batch_name(&self.table, self.ctid)
    }

    /// Physical name of the scope-scoped consolidated table, the same for
    /// every batch consolidated under this scope.
    pub fn consolidated_name(&self) -> String {
        format!("tblCT{}_{}", self.table, self.scope)
    }

    /// Batch-scoped change table name for an arbitrary table and batch.
    pub fn batch_name(table: &str, ctid: BatchId) -> String {
        format!("tblCT{table}_{ctid}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_names() {
        let ct = ChangeTable::new("Order", "dbo", BatchId(101), "slave01");

        assert_eq!(ct.batch_scoped_name(), "tblCTOrder_101");
        assert_eq!(ct.consolidated_name(), "tblCTOrder_slave01");
    }
}
