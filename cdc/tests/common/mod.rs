//! Shared fixtures for the scenario tests.
#![allow(dead_code)]

use cdc::types::{Cell, ChangeOperation, ChangeRow, Column};
use cdc_config::shared::{ReplicationConfig, ServerConnectionConfig, ShardConfig, TableConfig};

pub const RELAY_DB: &str = "Relay";
pub const SLAVE_DB: &str = "SlaveDB";
pub const SLAVE_CT_DB: &str = "SlaveCT";
pub const SLAVE_NAME: &str = "slave01";

pub fn connection(host: &str) -> ServerConnectionConfig {
    ServerConnectionConfig {
        host: host.to_string(),
        port: 1433,
        username: "replication".to_string(),
        password: None,
    }
}

pub fn table_config(name: &str) -> TableConfig {
    TableConfig {
        name: name.to_string(),
        schema: "dbo".to_string(),
        column_list: None,
        stop_on_error: false,
        record_history: false,
    }
}

pub fn replication_config(threshold: usize, tables: Vec<TableConfig>) -> ReplicationConfig {
    ReplicationConfig {
        slave_name: SLAVE_NAME.to_string(),
        relay: connection("relay01"),
        slave: connection("slave01"),
        relay_db: RELAY_DB.to_string(),
        slave_db: SLAVE_DB.to_string(),
        slave_ct_db: SLAVE_CT_DB.to_string(),
        batch_consolidation_threshold: threshold,
        max_workers: 4,
        copy_timeout_secs: 3600,
        apply_timeout_secs: 600,
        tables,
    }
}

pub fn shard_config(shards: &[&str], tables: Vec<TableConfig>) -> ShardConfig {
    ShardConfig {
        relay: connection("relay01"),
        relay_db: RELAY_DB.to_string(),
        shard_databases: shards.iter().map(|s| s.to_string()).collect(),
        master_shard: shards[0].to_string(),
        max_workers: 2,
        copy_timeout_secs: 3600,
        tables,
    }
}

pub fn columns(names: &[(&str, bool)]) -> Vec<Column> {
    names
        .iter()
        .map(|(name, primary_key)| Column::new(*name, *primary_key))
        .collect()
}

pub fn change_row(operation: ChangeOperation, version: i64, values: &[(&str, Cell)]) -> ChangeRow {
    let mut row = ChangeRow::new(operation, version);
    for (column, value) in values {
        row.values.insert(column.to_string(), value.clone());
    }

    row
}
