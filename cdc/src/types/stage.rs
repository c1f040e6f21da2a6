use std::fmt;

/// One stage of the batch replication pipeline.
///
/// Stages are tracked per batch and per scope as bits in a [`StageVector`];
/// every stage is attempted only while its bit is unset, and durably setting
/// the bit is what "completing" a stage means.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Stage {
    CaptureChanges,
    PublishSchemaChanges,
    UploadChanges,
    DownloadChanges,
    ApplySchemaChanges,
    ConsolidateBatches,
    ApplyChanges,
    SyncHistoryTables,
}

impl Stage {
    /// All stages, in pipeline order.
    pub const ALL: [Stage; 8] = [
        Stage::CaptureChanges,
        Stage::PublishSchemaChanges,
        Stage::UploadChanges,
        Stage::DownloadChanges,
        Stage::ApplySchemaChanges,
        Stage::ConsolidateBatches,
        Stage::ApplyChanges,
        Stage::SyncHistoryTables,
    ];

    const fn bit(self) -> u16 {
        match self {
            Stage::CaptureChanges => 1 << 0,
            Stage::PublishSchemaChanges => 1 << 1,
            Stage::UploadChanges => 1 << 2,
            Stage::DownloadChanges => 1 << 3,
            Stage::ApplySchemaChanges => 1 << 4,
            Stage::ConsolidateBatches => 1 << 5,
            Stage::ApplyChanges => 1 << 6,
            Stage::SyncHistoryTables => 1 << 7,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CaptureChanges => "capture_changes",
            Stage::PublishSchemaChanges => "publish_schema_changes",
            Stage::UploadChanges => "upload_changes",
            Stage::DownloadChanges => "download_changes",
            Stage::ApplySchemaChanges => "apply_schema_changes",
            Stage::ConsolidateBatches => "consolidate_batches",
            Stage::ApplyChanges => "apply_changes",
            Stage::SyncHistoryTables => "sync_history_tables",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of completed stages for one batch in one scope.
///
/// Bits are only ever set, never cleared: a batch is complete exactly when the
/// vector equals the union of all stage bits. All resumption decisions are
/// derived from which bits are still unset, so the vector must only change
/// through [`StageVector::insert`] (a guarded bitwise OR).
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct StageVector(u16);

impl StageVector {
    /// The vector of a freshly created batch: no stage has run yet.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// The vector of a fully processed batch: the union of all stage bits.
    pub const fn complete() -> Self {
        Self(
            Stage::CaptureChanges.bit()
                | Stage::PublishSchemaChanges.bit()
                | Stage::UploadChanges.bit()
                | Stage::DownloadChanges.bit()
                | Stage::ApplySchemaChanges.bit()
                | Stage::ConsolidateBatches.bit()
                | Stage::ApplyChanges.bit()
                | Stage::SyncHistoryTables.bit(),
        )
    }

    /// Sets the bit for `stage`, returning `true` if it was newly set.
    pub fn insert(&mut self, stage: Stage) -> bool {
        let newly_set = !self.contains(stage);
        self.0 |= stage.bit();

        newly_set
    }

    /// Returns a copy of this vector with the bit for `stage` set.
    pub fn with(mut self, stage: Stage) -> Self {
        self.insert(stage);
        self
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.0 & stage.bit() != 0
    }

    /// Returns `true` if every bit set in `other` is also set in `self`.
    pub fn contains_all(&self, other: StageVector) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns the union of this vector and `other`.
    pub fn union(self, other: StageVector) -> Self {
        Self(self.0 | other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn is_complete(&self) -> bool {
        *self == Self::complete()
    }
}

impl FromIterator<Stage> for StageVector {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        let mut vector = Self::empty();
        for stage in iter {
            vector.insert(stage);
        }

        vector
    }
}

impl fmt::Display for StageVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }

        let mut first = true;
        for stage in Stage::ALL {
            if self.contains(stage) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(stage.as_str())?;
                first = false;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_monotonic() {
        let mut vector = StageVector::empty();

        assert!(vector.insert(Stage::DownloadChanges));
        assert!(vector.contains(Stage::DownloadChanges));

        // Setting a bit twice reports that nothing changed and clears nothing.
        assert!(!vector.insert(Stage::DownloadChanges));
        assert!(vector.contains(Stage::DownloadChanges));
    }

    #[test]
    fn test_complete_is_union_of_all_stages() {
        let vector: StageVector = Stage::ALL.into_iter().collect();

        assert!(vector.is_complete());
        assert_eq!(vector, StageVector::complete());
    }

    #[test]
    fn test_missing_stage_means_incomplete() {
        let vector = StageVector::complete();
        let vector_without_apply: StageVector = Stage::ALL
            .into_iter()
            .filter(|s| *s != Stage::ApplyChanges)
            .collect();

        assert!(!vector_without_apply.is_complete());
        assert!(vector.contains_all(vector_without_apply));
        assert!(!vector_without_apply.contains(Stage::ApplyChanges));
    }

    #[test]
    fn test_display() {
        assert_eq!(StageVector::empty().to_string(), "none");

        let vector = StageVector::empty()
            .with(Stage::DownloadChanges)
            .with(Stage::ApplyChanges);
        assert_eq!(vector.to_string(), "download_changes|apply_changes");
    }
}
