use std::sync::Arc;
use uuid::Uuid;

use crate::db::JobStore;
use crate::models::job::{ModerationJob, WorkItem};
use crate::models::submission::SubmitRequest;
use crate::services::queue::WorkQueue;

/// Accepts comments, records them as pending jobs and queues them for the worker.
#[derive(Clone)]
pub struct IntakeService {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn WorkQueue>,
}

impl IntakeService {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn WorkQueue>) -> Self {
        Self { store, queue }
    }

    /// Validate a raw request body and submit its comment.
    pub async fn submit(&self, body: &[u8]) -> Result<Uuid, IntakeError> {
        let comment = parse_submission(body)?;
        self.submit_comment(comment).await
    }

    /// Record a pending job, then enqueue its work item.
    ///
    /// If the enqueue fails the job stays pending without an `enqueued_at`
    /// marker and the reconciler re-enqueues it later.
    pub async fn submit_comment(&self, comment: String) -> Result<Uuid, IntakeError> {
        let job = ModerationJob::new(comment);
        let job_id = job.job_id;

        self.store.create(&job).await.map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "Failed to persist job");
            IntakeError::Internal(e.to_string())
        })?;

        self.queue.send(&WorkItem::from(&job)).await.map_err(|e| {
            tracing::error!(job_id = %job_id, error = %e, "Failed to enqueue job, left for reconciliation");
            IntakeError::Internal(e.to_string())
        })?;

        if let Err(e) = self.store.mark_enqueued(job_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "Job enqueued but marker not recorded");
        }

        metrics::counter!("moderation_jobs_submitted_total").increment(1);
        tracing::info!(job_id = %job_id, "Moderation job submitted");
        Ok(job_id)
    }
}

/// Extract the comment from a JSON request body.
pub fn parse_submission(body: &[u8]) -> Result<String, IntakeError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|_| IntakeError::Validation("Invalid JSON in request body".to_string()))?;

    if value.get("comment").is_none() {
        return Err(IntakeError::Validation(
            "Missing comment in request body".to_string(),
        ));
    }

    let request: SubmitRequest = serde_json::from_value(value)
        .map_err(|_| IntakeError::Validation("Field comment must be a string".to_string()))?;
    Ok(request.comment)
}

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Internal(String),
}
