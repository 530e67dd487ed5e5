use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{JobStatus, ModerationJob};
use crate::models::moderation::ClassificationResult;

/// Body of `POST /api/v1/moderate`.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub comment: String,
}

/// Response after submitting a comment.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
}

/// Response for querying job status.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub result: Option<ClassificationResult>,
    pub error: Option<String>,
}

impl From<ModerationJob> for JobStatusResponse {
    fn from(job: ModerationJob) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            created_at: job.created_at,
            result: job.result,
            error: job.error,
        }
    }
}

/// Error body returned for any non-success response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
