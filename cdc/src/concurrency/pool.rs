use futures::{StreamExt, stream};
use std::future::Future;

use crate::error::{CdcError, CdcResult};

/// Bounded fan-out used by the per-table stages.
///
/// At most `max_workers` units run at the same time; submitting more queues
/// them rather than spawning unbounded concurrency. All units run to
/// completion before results are handed back, so one failing unit never
/// cancels or starves its siblings.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    max_workers: usize,
}

impl WorkerPool {
    /// Creates a pool allowing up to `max_workers` concurrent units.
    ///
    /// A value of zero is treated as one, the pool is never empty.
    pub fn new(max_workers: u16) -> Self {
        Self {
            max_workers: (max_workers as usize).max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Runs every unit with bounded concurrency and returns each unit's
    /// result, in submission order, once all of them have finished.
    pub async fn run<T, F>(&self, units: Vec<F>) -> Vec<CdcResult<T>>
    where
        F: Future<Output = CdcResult<T>> + Send,
        T: Send,
    {
        stream::iter(units)
            .buffered(self.max_workers)
            .collect()
            .await
    }
}

/// Collapses fan-out results into one aggregate error.
///
/// Errors are collected only after every unit has finished and are re-raised
/// together, so the caller sees every failure of the fan-out, not just the
/// first one.
pub fn collect_results<T>(results: Vec<CdcResult<T>>) -> CdcResult<Vec<T>> {
    let mut values = Vec::with_capacity(results.len());
    let mut errors = Vec::new();

    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(err) => errors.push(err),
        }
    }

    if !errors.is_empty() {
        return Err(CdcError::many(errors));
    }

    Ok(values)
}
