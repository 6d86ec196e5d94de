// src/handlers/runs.rs
//! Run execution and polling endpoints.
//!
//! A run can legitimately hold the pipeline open for minutes (the render
//! poll alone is bounded at five), so POST dispatches the orchestration to
//! a background task and returns the run id for polling. Pre-flight
//! failures are still returned synchronously.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::WorkflowError;
use crate::models::{Run, WorkflowPlan};
use crate::services::pricing;
use crate::AppState;

#[derive(Deserialize)]
pub struct ExecuteRequest {
    pub user_id: String,
    pub plan: WorkflowPlan,
}

/// POST /api/runs - admit a plan and execute it in the background
pub async fn create_run(
    Extension(state): Extension<Arc<AppState>>,
    Json(request): Json<ExecuteRequest>,
) -> impl IntoResponse {
    match state
        .orchestrator
        .submit(request.plan, &request.user_id)
        .await
    {
        Ok(run_id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "run_id": run_id, "status": "running" })),
        )
            .into_response(),
        Err(e) => workflow_error_response(e),
    }
}

/// GET /api/runs/:run_id - run status document for progress polling
pub async fn get_run(
    Path(run_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    match state.tracker.get_run(run_id).await {
        Some(run) => (StatusCode::OK, Json(run_document(&run))).into_response(),
        None => (StatusCode::NOT_FOUND, "Run not found").into_response(),
    }
}

/// GET /api/runs/:run_id/jobs - per-unit-of-work progress
pub async fn get_run_jobs(
    Path(run_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    if state.tracker.get_run(run_id).await.is_none() {
        return (StatusCode::NOT_FOUND, "Run not found").into_response();
    }
    let jobs = state.tracker.run_jobs(run_id).await;
    let response = json!({
        "run_id": run_id,
        "job_count": jobs.len(),
        "jobs": jobs.iter().map(|job| json!({
            "id": job.id,
            "node_id": job.node_id,
            "node_type": job.node_type,
            "adapter": job.adapter,
            "status": job.status,
            "credits_used": pricing::units_to_credits(job.credits_used),
            "error_message": job.error_message,
            "started_at": job.started_at,
            "completed_at": job.completed_at,
        })).collect::<Vec<_>>()
    });
    (StatusCode::OK, Json(response)).into_response()
}

/// GET /api/runs/:run_id/artifacts - media produced by completed jobs
pub async fn get_run_artifacts(
    Path(run_id): Path<Uuid>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    if state.tracker.get_run(run_id).await.is_none() {
        return (StatusCode::NOT_FOUND, "Run not found").into_response();
    }
    let artifacts = state.tracker.run_artifacts(run_id).await;
    (
        StatusCode::OK,
        Json(json!({ "run_id": run_id, "artifacts": artifacts })),
    )
        .into_response()
}

/// GET /api/users/:user_id/runs - a user's run history, newest last
pub async fn get_user_runs(
    Path(user_id): Path<String>,
    Extension(state): Extension<Arc<AppState>>,
) -> impl IntoResponse {
    let runs = state.tracker.user_runs(&user_id).await;
    let response = json!({
        "user_id": user_id,
        "runs": runs.iter().map(run_document).collect::<Vec<_>>(),
    });
    (StatusCode::OK, Json(response)).into_response()
}

fn run_document(run: &Run) -> serde_json::Value {
    json!({
        "id": run.id,
        "user_id": run.user_id,
        "status": run.status,
        "credits_used": pricing::units_to_credits(run.credits_used),
        "credits_refunded": pricing::units_to_credits(run.credits_refunded),
        "final_video_url": run.final_video_url,
        "error_message": run.error_message,
        "started_at": run.started_at,
        "completed_at": run.completed_at,
        "plan": run.plan_snapshot,
    })
}

fn workflow_error_response(error: WorkflowError) -> axum::response::Response {
    let status = match &error {
        WorkflowError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
        WorkflowError::UnknownModel(_) => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::Internal(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    tracing::warn!("Run submission rejected: {}", error);
    (status, Json(json!({ "error": error.to_string() }))).into_response()
}

/// Routes for run execution and polling
pub fn run_routes() -> Router {
    Router::new()
        .route("/api/runs", post(create_run))
        .route("/api/runs/:run_id", get(get_run))
        .route("/api/runs/:run_id/jobs", get(get_run_jobs))
        .route("/api/runs/:run_id/artifacts", get(get_run_artifacts))
        .route("/api/users/:user_id/runs", get(get_user_runs))
}
