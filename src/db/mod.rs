use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{JobStatus, ModerationJob};
use crate::models::moderation::ClassificationResult;

pub mod queries;

/// Initialize PostgreSQL connection pool
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
}

/// Run database migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

/// Result of a conditional state transition on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The job was pending and now holds the new state.
    Applied,
    /// The job already held exactly this state (duplicate delivery).
    AlreadyApplied,
    /// The job already reached a different terminal state; nothing was written.
    Conflict(JobStatus),
    NotFound,
}

impl UpdateOutcome {
    /// Outcome of completing `existing` with `result` when the conditional write did not apply.
    pub fn for_completed(existing: &ModerationJob, result: &ClassificationResult) -> Self {
        match existing.status {
            JobStatus::Completed if existing.result.as_ref() == Some(result) => {
                UpdateOutcome::AlreadyApplied
            }
            status => UpdateOutcome::Conflict(status),
        }
    }

    /// Outcome of failing `existing` when the conditional write did not apply.
    pub fn for_failed(existing: &ModerationJob) -> Self {
        match existing.status {
            JobStatus::Failed => UpdateOutcome::AlreadyApplied,
            status => UpdateOutcome::Conflict(status),
        }
    }
}

/// Durable job records keyed by `job_id`.
///
/// `complete` and `fail` only transition jobs out of `pending`, so replaying the
/// same update is harmless and a stored result is never replaced.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &ModerationJob) -> Result<(), StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<ModerationJob>, StoreError>;

    async fn complete(
        &self,
        job_id: Uuid,
        result: &ClassificationResult,
    ) -> Result<UpdateOutcome, StoreError>;

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<UpdateOutcome, StoreError>;

    /// Record that the job's work item reached the queue.
    async fn mark_enqueued(&self, job_id: Uuid) -> Result<(), StoreError>;

    /// Pending jobs created before `before` whose work item never reached the queue.
    async fn unenqueued_before(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ModerationJob>, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// PostgreSQL-backed [`JobStore`].
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: &ModerationJob) -> Result<(), StoreError> {
        queries::create_job(&self.pool, job)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db) = &e {
                    if db.is_unique_violation() {
                        return StoreError::Duplicate(job.job_id);
                    }
                }
                StoreError::Database(e)
            })
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<ModerationJob>, StoreError> {
        Ok(queries::get_job(&self.pool, job_id).await?)
    }

    async fn complete(
        &self,
        job_id: Uuid,
        result: &ClassificationResult,
    ) -> Result<UpdateOutcome, StoreError> {
        if queries::complete_job(&self.pool, job_id, result).await? {
            return Ok(UpdateOutcome::Applied);
        }
        Ok(match queries::get_job(&self.pool, job_id).await? {
            Some(existing) => UpdateOutcome::for_completed(&existing, result),
            None => UpdateOutcome::NotFound,
        })
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<UpdateOutcome, StoreError> {
        if queries::fail_job(&self.pool, job_id, error).await? {
            return Ok(UpdateOutcome::Applied);
        }
        Ok(match queries::get_job(&self.pool, job_id).await? {
            Some(existing) => UpdateOutcome::for_failed(&existing),
            None => UpdateOutcome::NotFound,
        })
    }

    async fn mark_enqueued(&self, job_id: Uuid) -> Result<(), StoreError> {
        queries::mark_enqueued(&self.pool, job_id).await?;
        Ok(())
    }

    async fn unenqueued_before(
        &self,
        before: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ModerationJob>, StoreError> {
        Ok(queries::get_unenqueued_jobs(&self.pool, before, limit).await?)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job {0} already exists")]
    Duplicate(Uuid),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::moderation::Decision;

    fn completed(result: ClassificationResult) -> ModerationJob {
        let mut job = ModerationJob::new("text");
        job.status = JobStatus::Completed;
        job.result = Some(result);
        job
    }

    #[test]
    fn test_same_result_is_already_applied() {
        let result = ClassificationResult::blocked();
        let job = completed(result.clone());
        assert_eq!(
            UpdateOutcome::for_completed(&job, &result),
            UpdateOutcome::AlreadyApplied
        );
    }

    #[test]
    fn test_different_result_conflicts() {
        let job = completed(ClassificationResult::blocked());
        let other = ClassificationResult {
            decision: Decision::Allow,
            categories: vec![],
        };
        assert_eq!(
            UpdateOutcome::for_completed(&job, &other),
            UpdateOutcome::Conflict(JobStatus::Completed)
        );
    }

    #[test]
    fn test_fail_after_complete_conflicts() {
        let job = completed(ClassificationResult::blocked());
        assert_eq!(
            UpdateOutcome::for_failed(&job),
            UpdateOutcome::Conflict(JobStatus::Completed)
        );
    }
}
