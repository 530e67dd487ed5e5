use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::models::job::{JobStatus, ModerationJob};
use crate::models::moderation::ClassificationResult;

const JOB_COLUMNS: &str =
    "job_id, comment, status, result, error, created_at, updated_at, enqueued_at";

fn job_from_row(row: &PgRow) -> Result<ModerationJob, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status_str).map_err(|e| sqlx::Error::ColumnDecode {
        index: "status".to_string(),
        source: Box::new(e),
    })?;
    let result: Option<Json<ClassificationResult>> = row.try_get("result")?;

    Ok(ModerationJob {
        job_id: row.try_get("job_id")?,
        comment: row.try_get("comment")?,
        status,
        result: result.map(|Json(r)| r),
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        enqueued_at: row.try_get("enqueued_at")?,
    })
}

/// Insert a new moderation job
pub async fn create_job(pool: &PgPool, job: &ModerationJob) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO moderation_jobs
            (job_id, comment, status, result, error, created_at, updated_at, enqueued_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(job.job_id)
    .bind(&job.comment)
    .bind(job.status.to_string())
    .bind(job.result.as_ref().map(Json))
    .bind(&job.error)
    .bind(job.created_at)
    .bind(job.updated_at)
    .bind(job.enqueued_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<ModerationJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM moderation_jobs WHERE job_id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Move a pending job to `completed` with its verdict.
/// Returns false if the job was not pending (or does not exist).
pub async fn complete_job(
    pool: &PgPool,
    job_id: Uuid,
    result: &ClassificationResult,
) -> Result<bool, sqlx::Error> {
    let done = sqlx::query(
        r#"
        UPDATE moderation_jobs
        SET status = 'completed',
            result = $2,
            updated_at = NOW()
        WHERE job_id = $1 AND status = 'pending'
        "#,
    )
    .bind(job_id)
    .bind(Json(result))
    .execute(pool)
    .await?;

    Ok(done.rows_affected() == 1)
}

/// Move a pending job to `failed` with an error descriptor.
pub async fn fail_job(pool: &PgPool, job_id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
    let done = sqlx::query(
        r#"
        UPDATE moderation_jobs
        SET status = 'failed',
            error = $2,
            updated_at = NOW()
        WHERE job_id = $1 AND status = 'pending'
        "#,
    )
    .bind(job_id)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(done.rows_affected() == 1)
}

/// Stamp the outbox marker once the work item is on the queue
pub async fn mark_enqueued(pool: &PgPool, job_id: Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE moderation_jobs
        SET enqueued_at = COALESCE(enqueued_at, NOW())
        WHERE job_id = $1
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get pending jobs that never reached the queue (for the reconciliation sweep)
pub async fn get_unenqueued_jobs(
    pool: &PgPool,
    created_before: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<ModerationJob>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM moderation_jobs
        WHERE status = 'pending'
          AND enqueued_at IS NULL
          AND created_at < $1
        ORDER BY created_at ASC
        LIMIT $2
        "#
    ))
    .bind(created_before)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}
