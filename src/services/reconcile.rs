use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use crate::db::{JobStore, StoreError};
use crate::models::job::WorkItem;
use crate::services::queue::WorkQueue;

/// Re-enqueues jobs that were recorded but whose work item never reached the queue.
pub struct Reconciler {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    staleness: Duration,
    batch_limit: i64,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        staleness: Duration,
        batch_limit: i64,
    ) -> Self {
        Self {
            store,
            queue,
            staleness,
            batch_limit,
        }
    }

    /// Enqueue up to `batch_limit` stale unenqueued jobs. Returns how many were enqueued.
    pub async fn sweep(&self) -> Result<usize, StoreError> {
        let staleness = chrono::Duration::from_std(self.staleness)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - staleness;
        let orphans = self.store.unenqueued_before(cutoff, self.batch_limit).await?;

        let mut enqueued = 0;
        for job in &orphans {
            if let Err(e) = self.queue.send(&WorkItem::from(job)).await {
                tracing::warn!(job_id = %job.job_id, error = %e, "Re-enqueue failed, will retry next sweep");
                continue;
            }
            self.store.mark_enqueued(job.job_id).await?;
            tracing::info!(job_id = %job.job_id, "Re-enqueued orphaned job");
            enqueued += 1;
        }

        if !orphans.is_empty() {
            tracing::info!(found = orphans.len(), enqueued, "Reconciliation sweep finished");
        }
        Ok(enqueued)
    }
}
