//! Batch Scheduler
//!
//! Splits a followee list into fixed-size batches and keeps a bounded number
//! of them in flight. A new batch starts as soon as any running one finishes.

use std::future::Future;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use relaycover_core::{CoverageConfig, Identity};

/// Split `ids` into consecutive batches of at most `batch_size`, keeping order.
pub fn partition(ids: &[Identity], batch_size: usize) -> Vec<Vec<Identity>> {
    ids.chunks(batch_size.max(1)).map(<[Identity]>::to_vec).collect()
}

/// Summary returned once every batch has finished or the run was cancelled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub batches: usize,
    pub finished: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchScheduler {
    batch_size: usize,
    max_concurrent: usize,
}

impl BatchScheduler {
    pub fn new(batch_size: usize, max_concurrent: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    pub fn from_config(config: &CoverageConfig) -> Self {
        Self::new(config.batch_size, config.max_concurrent_batches)
    }

    /// Run every batch through `run_batch`.
    ///
    /// `run_batch` is invoked lazily, when a slot frees up, so it marks the
    /// start of a batch. Cancellation drops in-flight batches and starts no
    /// new ones. Returns exactly once.
    pub async fn run<F, Fut>(
        &self,
        ids: &[Identity],
        cancel: &CancellationToken,
        mut run_batch: F,
    ) -> BatchReport
    where
        F: FnMut(usize, Vec<Identity>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let batches = partition(ids, self.batch_size);
        let total = batches.len();
        debug!(
            "Scheduling {} identities in {} batches ({} concurrent)",
            ids.len(),
            total,
            self.max_concurrent
        );

        let finished = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| run_batch(index, batch))
            .buffer_unordered(self.max_concurrent)
            .take_until(cancel.cancelled())
            .fold(0usize, |n, ()| async move { n + 1 })
            .await;

        BatchReport {
            batches: total,
            finished,
            cancelled: finished < total && cancel.is_cancelled(),
        }
    }
}
