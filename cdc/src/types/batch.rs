use chrono::{DateTime, Utc};
use std::fmt;

use crate::types::stage::StageVector;

/// Identifier of one change-tracking batch.
///
/// Ids are assigned by the upstream tier, are totally ordered and immutable
/// once assigned, and are never reused.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct BatchId(pub i64);

impl BatchId {
    /// Id of the synthesized first batch for a scope with no history.
    pub const FIRST: BatchId = BatchId(1);

    pub fn next(self) -> BatchId {
        BatchId(self.0 + 1)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Scope a ledger row belongs to.
///
/// The relay tier tracks one row per batch; every slave additionally tracks
/// its own row per batch, so the same batch id can be at different stages for
/// different consumers.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum BatchScope {
    /// The relay-global row, written by the master or shard coordinator.
    Relay,
    /// A per-slave row, keyed by the slave identifier.
    Slave(String),
}

impl BatchScope {
    pub fn slave(name: impl Into<String>) -> Self {
        Self::Slave(name.into())
    }
}

impl fmt::Display for BatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchScope::Relay => f.write_str("relay"),
            BatchScope::Slave(name) => f.write_str(name),
        }
    }
}

/// One unit of replicated change, tracked per scope in the batch ledger.
///
/// A batch is created with an empty stage vector and is only ever mutated by
/// setting stage bits and by the one-time completion timestamp.
#[derive(Debug, Clone)]
pub struct Batch {
    pub ctid: BatchId,
    /// Change-tracking version the batch starts at.
    pub sync_start_version: i64,
    /// Change-tracking version the batch ends at.
    pub sync_stop_version: i64,
    pub start_time: DateTime<Utc>,
    /// Set exactly once, at final completion.
    pub stop_time: Option<DateTime<Utc>>,
    pub stages: StageVector,
}

impl Batch {
    pub fn new(
        ctid: BatchId,
        sync_start_version: i64,
        sync_stop_version: i64,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            ctid,
            sync_start_version,
            sync_stop_version,
            start_time,
            stop_time: None,
            stages: StageVector::empty(),
        }
    }

    /// Synthesizes the first batch for a scope that has never processed one.
    pub fn bootstrap() -> Self {
        Self::new(BatchId::FIRST, 0, 0, Utc::now())
    }

    pub fn is_complete(&self) -> bool {
        self.stages.is_complete()
    }
}
