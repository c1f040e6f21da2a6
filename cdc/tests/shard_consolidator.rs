mod common;

use cdc::error::ErrorKind;
use cdc::replication::{ShardConsolidator, ShardRunOutcome};
use cdc::schema::SchemaChangeEvent;
use cdc::store::ledger::LedgerStore;
use cdc::store::memory::MemoryStore;
use cdc::types::{Batch, BatchId, BatchScope, Cell, ChangeOperation, ColumnType, Stage, StageVector};
use cdc_telemetry::tracing::init_test_tracing;
use chrono::Utc;

use crate::common::{RELAY_DB, change_row, columns, shard_config, table_config};

const SHARD_A: &str = "ShardA";
const SHARD_B: &str = "ShardB";

async fn create_batch(store: &MemoryStore, db: &str, ctid: i64, stages: StageVector) {
    let mut batch = Batch::new(BatchId(ctid), 0, 50, Utc::now());
    batch.stages = stages;
    store
        .create_batch(db, &batch, &BatchScope::Relay)
        .await
        .unwrap();
}

fn uploaded() -> StageVector {
    StageVector::empty()
        .with(Stage::CaptureChanges)
        .with(Stage::UploadChanges)
}

#[tokio::test]
async fn mismatched_shard_schemas_abort_and_revert_shard_state() {
    init_test_tracing();

    let store = MemoryStore::new();
    create_batch(&store, RELAY_DB, 5, StageVector::empty()).await;
    create_batch(&store, SHARD_A, 5, uploaded()).await;
    create_batch(&store, SHARD_B, 5, uploaded()).await;

    // Shard A captured {id, name}; shard B captured {id, name, email}.
    store
        .create_table(SHARD_A, "dbo", "tblCTCustomer_5", columns(&[("id", true), ("name", false)]))
        .await;
    store
        .create_table(
            SHARD_B,
            "dbo",
            "tblCTCustomer_5",
            columns(&[("id", true), ("name", false), ("email", false)]),
        )
        .await;

    let config = shard_config(&[SHARD_A, SHARD_B], vec![table_config("Customer")]);
    let consolidator = ShardConsolidator::new(config, store.clone(), store.clone());

    let err = consolidator.run().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SchemaDrift);

    // Both shards' batch state for the id was reverted for a clean retry.
    for shard in [SHARD_A, SHARD_B] {
        assert!(
            store
                .batch(shard, BatchId(5), &BatchScope::Relay)
                .await
                .unwrap()
                .is_none()
        );
    }

    // No relay-side merge happened.
    let merged = store.rows(RELAY_DB, "dbo", "tblCTCustomer_5").await;
    assert!(merged.is_empty());
}

#[tokio::test]
async fn agreeing_shards_are_merged_and_published() {
    init_test_tracing();

    let store = MemoryStore::new();
    create_batch(&store, RELAY_DB, 5, StageVector::empty()).await;
    create_batch(&store, SHARD_A, 5, uploaded()).await;
    create_batch(&store, SHARD_B, 5, uploaded()).await;

    let customer_columns = columns(&[("id", true), ("name", false)]);
    store
        .create_table(SHARD_A, "dbo", "tblCTCustomer_5", customer_columns.clone())
        .await;
    store
        .insert_rows(SHARD_A, "dbo", "tblCTCustomer_5", vec![
            change_row(ChangeOperation::Insert, 51, &[("id", Cell::I64(1)), ("name", Cell::String("a".into()))]),
        ])
        .await
        .unwrap();
    store
        .create_table(SHARD_B, "dbo", "tblCTCustomer_5", customer_columns)
        .await;
    store
        .insert_rows(SHARD_B, "dbo", "tblCTCustomer_5", vec![
            change_row(ChangeOperation::Insert, 52, &[("id", Cell::I64(2)), ("name", Cell::String("b".into()))]),
        ])
        .await
        .unwrap();

    // The master shard recorded one DDL event for the batch.
    store
        .record_schema_change(
            SHARD_A,
            BatchId(5),
            SchemaChangeEvent::add(1, "dbo", "Customer", "email", ColumnType::new("varchar").with_length(100)),
        )
        .await;

    let config = shard_config(&[SHARD_A, SHARD_B], vec![table_config("Customer")]);
    let consolidator = ShardConsolidator::new(config, store.clone(), store.clone());

    let outcome = consolidator.run().await.unwrap();
    let ShardRunOutcome::Consolidated { row_counts } = outcome else {
        panic!("expected a consolidated outcome, got {outcome:?}");
    };
    assert_eq!(row_counts.get("Customer"), Some(&2));

    // Both shards' rows landed in the relay-side per-batch table.
    assert_eq!(store.rows(RELAY_DB, "dbo", "tblCTCustomer_5").await.len(), 2);

    // Schema changes were published once from the master shard.
    let events = store.schema_changes(RELAY_DB, BatchId(5)).await.unwrap();
    assert_eq!(events.len(), 1);

    // Expected counts were recorded for downstream reconciliation.
    let expected = store.expected_row_counts(RELAY_DB, BatchId(5)).await.unwrap();
    assert_eq!(expected.get("Customer"), Some(&2));

    // The relay batch now advertises captured and uploaded changes.
    let batch = store
        .batch(RELAY_DB, BatchId(5), &BatchScope::Relay)
        .await
        .unwrap()
        .unwrap();
    assert!(batch.stages.contains(Stage::CaptureChanges));
    assert!(batch.stages.contains(Stage::UploadChanges));
    assert!(batch.stages.contains(Stage::PublishSchemaChanges));
}

#[tokio::test]
async fn a_lagging_shard_defers_consolidation() {
    init_test_tracing();

    let store = MemoryStore::new();
    create_batch(&store, RELAY_DB, 5, StageVector::empty()).await;
    create_batch(&store, SHARD_A, 5, uploaded()).await;
    // Shard B exists but has not uploaded yet.
    create_batch(&store, SHARD_B, 5, StageVector::empty()).await;

    let config = shard_config(&[SHARD_A, SHARD_B], vec![table_config("Customer")]);
    let consolidator = ShardConsolidator::new(config, store.clone(), store.clone());

    let outcome = consolidator.run().await.unwrap();
    assert_eq!(outcome, ShardRunOutcome::WaitingForShards);
}

#[tokio::test]
async fn an_uploaded_batch_opens_the_next_one_for_all_shards() {
    init_test_tracing();

    let store = MemoryStore::new();
    create_batch(&store, RELAY_DB, 5, uploaded()).await;

    let mut shard_batch = Batch::new(BatchId(5), 10, 60, Utc::now());
    shard_batch.stages = uploaded();
    store
        .create_batch(SHARD_A, &shard_batch, &BatchScope::Relay)
        .await
        .unwrap();

    let config = shard_config(&[SHARD_A], vec![table_config("Customer")]);
    let consolidator = ShardConsolidator::new(config, store.clone(), store.clone());

    let outcome = consolidator.run().await.unwrap();
    assert_eq!(outcome, ShardRunOutcome::OpenedNextBatch(BatchId(6)));

    // The shard's new batch starts where its previous one stopped.
    let opened = store
        .batch(SHARD_A, BatchId(6), &BatchScope::Relay)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(opened.sync_start_version, 60);
    assert!(opened.stages.is_empty());
}
