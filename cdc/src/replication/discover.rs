use tracing::{debug, info, warn};

use crate::error::CdcResult;
use crate::store::ledger::LedgerStore;
use crate::types::{Batch, BatchScope, Stage};

/// Determines the unit(s) of work for one run of a scope.
///
/// The discoverer is retry-before-progress: as long as any batch of the scope
/// is incomplete, exactly those batches are returned and no new ones are
/// pulled. It performs no retries of its own — if the upstream query fails the
/// run aborts, and the next invocation re-derives the same answer from ledger
/// state alone.
#[derive(Debug)]
pub struct BatchDiscoverer<L> {
    ledger: L,
    relay_db: String,
    scope: BatchScope,
}

impl<L> BatchDiscoverer<L>
where
    L: LedgerStore + Send + Sync,
{
    pub fn new(ledger: L, relay_db: impl Into<String>, scope: BatchScope) -> Self {
        Self {
            ledger,
            relay_db: relay_db.into(),
            scope,
        }
    }

    /// Returns the ordered list of batches to process this run.
    pub async fn discover(&self) -> CdcResult<Vec<Batch>> {
        // Retry-before-progress: incomplete batches block pulling new ones.
        let incomplete = self
            .ledger
            .incomplete_batches(&self.relay_db, &self.scope)
            .await?;
        if !incomplete.is_empty() {
            if let [batch] = incomplete.as_slice() {
                warn!(
                    "last batch did not complete, retrying batch {} with stages {}",
                    batch.ctid, batch.stages
                );
            } else {
                info!("resuming {} incomplete batches", incomplete.len());
            }

            return Ok(incomplete);
        }

        debug!(
            "retrieving information on the last run for scope {}",
            self.scope
        );
        let Some(last) = self.ledger.last_batch(&self.relay_db, &self.scope).await? else {
            // This scope has never processed a batch; synthesize the first one.
            let batch = Batch::bootstrap();
            info!("no batch history for scope {}, starting batch {}", self.scope, batch.ctid);
            self.ledger
                .create_batch(&self.relay_db, &batch, &self.scope)
                .await?;

            return Ok(vec![batch]);
        };

        debug!("last batch was successful, checking for new batches");
        let pending = self
            .ledger
            .pending_batches_after(&self.relay_db, last.ctid, Stage::UploadChanges)
            .await?;
        debug!("retrieved {} pending batch(es) to work on", pending.len());

        let mut batches = Vec::with_capacity(pending.len());
        for upstream in pending {
            // The scope gets its own ledger row, starting from an empty vector.
            let batch = Batch::new(
                upstream.ctid,
                upstream.sync_start_version,
                upstream.sync_stop_version,
                upstream.start_time,
            );
            self.ledger
                .create_batch(&self.relay_db, &batch, &self.scope)
                .await?;
            batches.push(batch);
        }

        Ok(batches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ledger::LedgerStore;
    use crate::store::memory::MemoryStore;
    use crate::types::{BatchId, StageVector};
    use chrono::Utc;

    const RELAY_DB: &str = "Relay";

    fn slave_scope() -> BatchScope {
        BatchScope::slave("slave01")
    }

    async fn relay_batch_with_upload(store: &MemoryStore, ctid: i64) {
        let mut batch = Batch::new(BatchId(ctid), 0, 10, Utc::now());
        batch.stages.insert(Stage::UploadChanges);
        store
            .create_batch(RELAY_DB, &batch, &BatchScope::Relay)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_on_empty_ledger() {
        let store = MemoryStore::new();
        let discoverer = BatchDiscoverer::new(store.clone(), RELAY_DB, slave_scope());

        let batches = discoverer.discover().await.unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].ctid, BatchId::FIRST);
        assert!(batches[0].stages.is_empty());

        // The synthesized batch is persisted so stage writes can find it.
        let stored = store
            .batch(RELAY_DB, BatchId::FIRST, &slave_scope())
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_incomplete_batch_is_retried_before_pulling_new_ones() {
        let store = MemoryStore::new();

        let mut failed = Batch::new(BatchId(4), 0, 10, Utc::now());
        failed.stages.insert(Stage::DownloadChanges);
        store
            .create_batch(RELAY_DB, &failed, &slave_scope())
            .await
            .unwrap();

        // A newer uploaded batch exists upstream but must not be pulled yet.
        relay_batch_with_upload(&store, 5).await;

        let discoverer = BatchDiscoverer::new(store.clone(), RELAY_DB, slave_scope());
        let batches = discoverer.discover().await.unwrap();

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].ctid, BatchId(4));
        assert!(batches[0].stages.contains(Stage::DownloadChanges));
    }

    #[tokio::test]
    async fn test_new_batches_are_pulled_after_a_complete_run() {
        let store = MemoryStore::new();
        let scope = slave_scope();

        let mut done = Batch::new(BatchId(4), 0, 10, Utc::now());
        done.stages = StageVector::complete();
        store.create_batch(RELAY_DB, &done, &scope).await.unwrap();

        relay_batch_with_upload(&store, 5).await;
        relay_batch_with_upload(&store, 6).await;

        let discoverer = BatchDiscoverer::new(store.clone(), RELAY_DB, scope.clone());
        let batches = discoverer.discover().await.unwrap();

        let ids: Vec<BatchId> = batches.iter().map(|b| b.ctid).collect();
        assert_eq!(ids, vec![BatchId(5), BatchId(6)]);

        // Every pulled batch got its own scope-scoped row with an empty vector.
        for id in ids {
            let stored = store.batch(RELAY_DB, id, &scope).await.unwrap().unwrap();
            assert!(stored.stages.is_empty());
        }
    }

    #[tokio::test]
    async fn test_resumption_returns_exactly_the_unfinished_batches() {
        let store = MemoryStore::new();
        let scope = slave_scope();

        let mut done = Batch::new(BatchId(7), 0, 10, Utc::now());
        done.stages = StageVector::complete();
        store.create_batch(RELAY_DB, &done, &scope).await.unwrap();

        let mut half_done = Batch::new(BatchId(8), 10, 20, Utc::now());
        half_done.stages.insert(Stage::DownloadChanges);
        half_done.stages.insert(Stage::ApplySchemaChanges);
        store
            .create_batch(RELAY_DB, &half_done, &scope)
            .await
            .unwrap();

        let untouched = Batch::new(BatchId(9), 20, 30, Utc::now());
        store
            .create_batch(RELAY_DB, &untouched, &scope)
            .await
            .unwrap();

        let discoverer = BatchDiscoverer::new(store.clone(), RELAY_DB, scope);
        let batches = discoverer.discover().await.unwrap();

        let ids: Vec<BatchId> = batches.iter().map(|b| b.ctid).collect();
        assert_eq!(ids, vec![BatchId(8), BatchId(9)]);
    }
}
