use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::moderation::ClassificationResult;

/// Status of a moderation job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Completed,
    Failed,
}

/// A moderation job tracked from intake to verdict.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModerationJob {
    pub job_id: Uuid,
    pub comment: String,
    pub status: JobStatus,
    pub result: Option<ClassificationResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set once the work item for this job has been accepted by the queue.
    pub enqueued_at: Option<DateTime<Utc>>,
}

impl ModerationJob {
    /// A fresh pending job with a newly generated id.
    pub fn new(comment: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            comment: comment.into(),
            status: JobStatus::Pending,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            enqueued_at: None,
        }
    }
}

/// Queue message body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkItem {
    pub job_id: Uuid,
    pub comment: String,
}

impl From<&ModerationJob> for WorkItem {
    fn from(job: &ModerationJob) -> Self {
        Self {
            job_id: job.job_id,
            comment: job.comment.clone(),
        }
    }
}
