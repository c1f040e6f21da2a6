use std::future::Future;
use std::time::Duration;

use crate::error::CdcResult;

/// Trait for the bulk inter-server table-copy collaborator.
///
/// A missing source table is signalled with
/// [`crate::error::ErrorKind::ChangeTableMissing`] so callers can distinguish
/// the expected "no changes this batch" condition from a real failure.
pub trait TableCopier {
    /// Copies a table's definition and rows, replacing the destination table
    /// if it already exists. Returns the number of rows copied.
    fn copy_table(
        &self,
        source_db: &str,
        schema: &str,
        source_table: &str,
        dest_db: &str,
        dest_table: &str,
        timeout: Duration,
    ) -> impl Future<Output = CdcResult<u64>> + Send;

    /// Copies only a table's definition, dropping and recreating the
    /// destination table empty.
    fn copy_table_definition(
        &self,
        source_db: &str,
        schema: &str,
        source_table: &str,
        dest_db: &str,
        dest_table: &str,
    ) -> impl Future<Output = CdcResult<()>> + Send;
}
