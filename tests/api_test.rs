//! HTTP surface of the intake service, served from in-memory backends.

mod helpers;

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use helpers::*;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower::ServiceExt;

use moderation_queue::app_state::AppState;
use moderation_queue::models::job::JobStatus;
use moderation_queue::models::moderation::ClassificationResult;
use moderation_queue::models::submission::{ErrorResponse, JobStatusResponse, SubmitResponse};
use moderation_queue::routes;

fn app() -> (Router, Arc<MemoryJobStore>, Arc<MemoryWorkQueue>) {
    let store = MemoryJobStore::new();
    let queue = MemoryWorkQueue::new();
    let state = AppState::new(store.clone(), queue.clone());
    (routes::api_router(state), store, queue)
}

async fn post(app: Router, body: &str) -> (StatusCode, Bytes) {
    let response = app
        .oneshot(
            Request::post("/api/v1/moderate")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, to_bytes(response.into_body(), usize::MAX).await.unwrap())
}

async fn get(app: Router, uri: &str) -> (StatusCode, Bytes) {
    let response = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, to_bytes(response.into_body(), usize::MAX).await.unwrap())
}

#[tokio::test]
async fn test_submit_returns_job_id() {
    let (app, store, queue) = app();

    let (status, body) = post(app, r#"{"comment": "Hello world"}"#).await;

    assert_eq!(status, StatusCode::OK);
    let response: SubmitResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(store.job(response.job_id).unwrap().status, JobStatus::Pending);
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_invalid_json_is_bad_request() {
    let (app, store, _) = app();

    let (status, body) = post(app, "{comment: oops").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error, "Invalid JSON in request body");
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_missing_comment_is_bad_request() {
    let (app, _, queue) = app();

    let (status, body) = post(app, r#"{"message": "hi"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(error.error, "Missing comment in request body");
    assert_eq!(queue.len(), 0);
}

#[tokio::test]
async fn test_store_outage_is_server_error() {
    let (app, store, queue) = app();
    store.fail_creates.store(true, Ordering::SeqCst);

    let (status, body) = post(app, r#"{"comment": "Hello"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let error: ErrorResponse = serde_json::from_slice(&body).unwrap();
    assert!(!error.error.is_empty());
    assert_eq!(queue.len(), 0);
}

#[tokio::test]
async fn test_job_status_lookup() {
    let (app, store, _) = app();
    let job = moderation_queue::models::job::ModerationJob::new("Hello");
    let job_id = job.job_id;
    store.insert(job);

    let (status, body) = get(app.clone(), &format!("/api/v1/moderate/{job_id}")).await;
    assert_eq!(status, StatusCode::OK);
    let view: JobStatusResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(view.status, JobStatus::Pending);
    assert!(view.result.is_none());

    use moderation_queue::db::JobStore;
    store
        .complete(job_id, &ClassificationResult::blocked())
        .await
        .unwrap();
    let (_, body) = get(app, &format!("/api/v1/moderate/{job_id}")).await;
    let view: JobStatusResponse = serde_json::from_slice(&body).unwrap();
    assert_eq!(view.status, JobStatus::Completed);
    assert_eq!(view.result, Some(ClassificationResult::blocked()));
}

#[tokio::test]
async fn test_unknown_and_malformed_job_ids() {
    let (app, _, _) = app();

    let (status, _) = get(app.clone(), &format!("/api/v1/moderate/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(app, "/api/v1/moderate/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_reports_ok() {
    let (app, _, _) = app();

    let (status, body) = get(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["status"], "ok");
    assert_eq!(value["checks"]["database"]["status"], "ok");
}
