use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::submission::{ErrorResponse, JobStatusResponse, SubmitResponse};
use crate::services::intake::IntakeError;

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let status = match &self {
            IntakeError::Validation(_) => StatusCode::BAD_REQUEST,
            IntakeError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// POST /api/v1/moderate: submit a comment for moderation.
pub async fn submit_comment(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<SubmitResponse>, IntakeError> {
    let job_id = state.intake.submit(&body).await?;
    Ok(Json(SubmitResponse { job_id }))
}

/// GET /api/v1/moderate/{job_id}: check moderation job status.
pub async fn get_job_status(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    let Ok(job_id) = Uuid::parse_str(&job_id) else {
        return error(StatusCode::BAD_REQUEST, "Invalid job id");
    };

    match state.store.get(job_id).await {
        Ok(Some(job)) => Json(JobStatusResponse::from(job)).into_response(),
        Ok(None) => error(StatusCode::NOT_FOUND, format!("Job {job_id} not found")),
        Err(e) => {
            tracing::error!(job_id = %job_id, error = %e, "Failed to load job");
            error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
