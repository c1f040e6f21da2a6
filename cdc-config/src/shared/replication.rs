use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::{ServerConnectionConfig, TableConfig, ValidationError};

/// Configuration for a slave replication agent.
///
/// Contains everything one slave needs to pull batches from its relay and
/// apply them: connection settings, database names, the batch consolidation
/// threshold, worker limits and the table list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ReplicationConfig {
    /// Identifier of this slave, used to scope its rows in the batch ledger.
    pub slave_name: String,
    /// Connection settings for the relay server.
    pub relay: ServerConnectionConfig,
    /// Connection settings for the slave server.
    pub slave: ServerConnectionConfig,
    /// Name of the relay database holding the batch ledger and uploaded change tables.
    pub relay_db: String,
    /// Name of the destination database on the slave.
    pub slave_db: String,
    /// Name of the database on the slave holding downloaded change tables.
    pub slave_ct_db: String,
    /// Number of pending batches at which they are folded into one consolidated
    /// run. Zero disables consolidation.
    #[serde(default)]
    pub batch_consolidation_threshold: usize,
    /// Maximum number of concurrent workers for per-table fan-out stages.
    pub max_workers: u16,
    /// Timeout in seconds for one bulk table copy.
    pub copy_timeout_secs: u64,
    /// Timeout in seconds for one table's change application.
    pub apply_timeout_secs: u64,
    /// Tables replicated to this slave.
    pub tables: Vec<TableConfig>,
}

impl ReplicationConfig {
    /// Validates the slave agent configuration.
    ///
    /// Checks connection settings, the slave identifier, worker count and
    /// that at least one table is configured.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.relay.validate()?;
        self.slave.validate()?;

        if self.slave_name.is_empty() {
            return Err(ValidationError::MissingSlaveName);
        }

        if self.max_workers == 0 {
            return Err(ValidationError::MaxWorkersZero);
        }

        if self.tables.is_empty() {
            return Err(ValidationError::NoTables);
        }

        Ok(())
    }

    /// Timeout applied to one bulk table copy.
    pub fn copy_timeout(&self) -> Duration {
        Duration::from_secs(self.copy_timeout_secs)
    }

    /// Timeout applied to one table's change application.
    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }
}
