use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::db::{JobStore, StoreError, UpdateOutcome};
use crate::services::classifier::Classifier;
use crate::services::queue::{Delivery, QueueError, WorkQueue};

/// Tunables for how the worker settles failed deliveries.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Visibility applied to a message whose classification failed.
    pub failure_visibility: Duration,
    /// Deliveries after which a failing job is marked `failed`. Zero disables.
    pub max_receive_count: u32,
    /// Visibility renewed on the rest of a batch before each item is classified.
    pub lease: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            failure_visibility: Duration::from_secs(3600),
            max_receive_count: 5,
            lease: Duration::from_secs(3600),
        }
    }
}

/// What happened to a single delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Verdict stored and message deleted.
    Completed,
    /// Classification failed; message hidden for later redelivery.
    Deferred,
    /// Classification failed too many times; job marked failed and message deleted.
    DeadLettered,
    /// Message could not be decoded or had no job; deleted.
    Discarded,
}

/// Per-batch tally returned by [`Worker::handle_batch`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub completed: usize,
    pub deferred: usize,
    pub dead_lettered: usize,
    pub discarded: usize,
    /// Items whose store or queue call failed; left for visibility expiry.
    pub faulted: usize,
}

impl BatchReport {
    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Completed => self.completed += 1,
            ItemOutcome::Deferred => self.deferred += 1,
            ItemOutcome::DeadLettered => self.dead_lettered += 1,
            ItemOutcome::Discarded => self.discarded += 1,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// Drives delivered work items through classification and settles them in the
/// store and queue.
pub struct Worker {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
    classifier: Arc<Classifier>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn WorkQueue>,
        classifier: Arc<Classifier>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            store,
            queue,
            classifier,
            settings,
        }
    }

    /// Process a batch sequentially. A fault on one item is logged and counted;
    /// it does not stop the rest of the batch.
    ///
    /// Before each item after the first, the lease on every message not yet
    /// processed is renewed, so waiting items stay hidden however long the
    /// earlier ones took.
    pub async fn handle_batch(&self, deliveries: Vec<Delivery>) -> BatchReport {
        let mut report = BatchReport::default();
        for (index, delivery) in deliveries.iter().enumerate() {
            if index > 0 {
                self.renew_leases(&deliveries[index..]).await;
            }
            match self.handle_delivery(delivery).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    tracing::error!(
                        receipt = %delivery.receipt,
                        error = %e,
                        "Failed to settle delivery, leaving it for redelivery"
                    );
                    report.faulted += 1;
                }
            }
        }
        report
    }

    async fn renew_leases(&self, waiting: &[Delivery]) {
        for delivery in waiting {
            if let Err(e) = self
                .queue
                .change_visibility(&delivery.receipt, self.settings.lease)
                .await
            {
                tracing::warn!(receipt = %delivery.receipt, error = %e, "Failed to renew message lease");
            }
        }
    }

    /// Classify one delivery and settle it.
    ///
    /// On success the store is updated before the message is deleted, so a
    /// crash in between causes a redelivery that the idempotent update absorbs.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> Result<ItemOutcome, WorkerError> {
        let item = match delivery.decode() {
            Ok(item) => item,
            Err(e) => {
                tracing::error!(receipt = %delivery.receipt, error = %e, "Discarding undecodable message");
                self.queue.delete(&delivery.receipt).await?;
                return Ok(ItemOutcome::Discarded);
            }
        };

        tracing::info!(
            job_id = %item.job_id,
            receive_count = delivery.receive_count,
            "Processing moderation job"
        );

        let start = Instant::now();
        match self.classifier.classify(&item.comment).await {
            Ok(result) => {
                let decision = result.decision;
                let outcome = self.store.complete(item.job_id, &result).await?;
                self.queue.delete(&delivery.receipt).await?;
                metrics::histogram!("moderation_processing_seconds")
                    .record(start.elapsed().as_secs_f64());

                match outcome {
                    UpdateOutcome::Applied => {
                        metrics::counter!("moderation_jobs_completed_total").increment(1);
                        tracing::info!(job_id = %item.job_id, decision = ?decision, "Job completed");
                    }
                    UpdateOutcome::AlreadyApplied => {
                        tracing::info!(job_id = %item.job_id, "Duplicate delivery, result already stored");
                    }
                    UpdateOutcome::Conflict(status) => {
                        tracing::warn!(
                            job_id = %item.job_id,
                            status = %status,
                            "Job already settled with a different outcome, keeping stored state"
                        );
                    }
                    UpdateOutcome::NotFound => {
                        tracing::warn!(job_id = %item.job_id, "No job record for delivered message");
                        return Ok(ItemOutcome::Discarded);
                    }
                }
                Ok(ItemOutcome::Completed)
            }
            Err(failure) => {
                let max = self.settings.max_receive_count;
                if max > 0 && delivery.receive_count >= max {
                    let descriptor = format!(
                        "Classification failed after {} deliveries: {failure}",
                        delivery.receive_count
                    );
                    let outcome = self.store.fail(item.job_id, &descriptor).await?;
                    self.queue.delete(&delivery.receipt).await?;

                    return Ok(match outcome {
                        UpdateOutcome::Applied => {
                            metrics::counter!("moderation_jobs_failed_total").increment(1);
                            tracing::warn!(job_id = %item.job_id, error = %failure, "Job failed permanently");
                            ItemOutcome::DeadLettered
                        }
                        UpdateOutcome::AlreadyApplied => {
                            tracing::info!(job_id = %item.job_id, "Duplicate delivery, job already failed");
                            ItemOutcome::DeadLettered
                        }
                        UpdateOutcome::Conflict(status) => {
                            tracing::warn!(
                                job_id = %item.job_id,
                                status = %status,
                                "Job already settled, dropping failed redelivery"
                            );
                            ItemOutcome::Discarded
                        }
                        UpdateOutcome::NotFound => {
                            tracing::warn!(job_id = %item.job_id, "No job record for delivered message");
                            ItemOutcome::Discarded
                        }
                    });
                }

                self.queue
                    .change_visibility(&delivery.receipt, self.settings.failure_visibility)
                    .await?;
                metrics::counter!("moderation_jobs_retried_total").increment(1);
                tracing::warn!(
                    job_id = %item.job_id,
                    error = %failure,
                    retry_in_secs = self.settings.failure_visibility.as_secs(),
                    "Classification failed, message will reappear after visibility timeout"
                );
                Ok(ItemOutcome::Deferred)
            }
        }
    }
}
