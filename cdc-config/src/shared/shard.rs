use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::{ServerConnectionConfig, TableConfig, ValidationError};

/// Configuration for the relay-tier shard consolidator.
///
/// In a multi-shard deployment each shard captures changes into its own
/// database on the relay server; the consolidator merges them into one
/// relay-side change set per batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ShardConfig {
    /// Connection settings for the relay server.
    pub relay: ServerConnectionConfig,
    /// Name of the relay database that slaves consume from.
    pub relay_db: String,
    /// Databases holding each shard's captured changes.
    pub shard_databases: Vec<String>,
    /// The shard whose schema-change set is published to the relay database.
    pub master_shard: String,
    /// Maximum number of concurrent workers for per-table merges.
    pub max_workers: u16,
    /// Timeout in seconds for one bulk table copy.
    pub copy_timeout_secs: u64,
    /// Tables captured across shards.
    pub tables: Vec<TableConfig>,
}

impl ShardConfig {
    /// Validates the shard consolidator configuration.
    ///
    /// Checks the relay connection, the shard list and that the master shard
    /// is one of the configured shard databases.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.relay.validate()?;

        if self.shard_databases.is_empty() {
            return Err(ValidationError::NoShardDatabases);
        }

        if !self.shard_databases.contains(&self.master_shard) {
            return Err(ValidationError::MasterShardNotListed(
                self.master_shard.clone(),
            ));
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
}
