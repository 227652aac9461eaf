// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! REST routes: intake, polling, listing, cancellation.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use super::auth::AuthService;
use super::error::{ApiError, ApiResult};
use super::models::{
    CancelJobResponse, GenerateImageRequest, GenerateImageResponse, HealthResponse,
    JobListResponse, JobResponse,
};
use crate::database::repositories::{CancelOutcome, JobListFilter, JobRepository, NewJob};
use crate::jobs::{GenerationMode, JobStatus};
use crate::queue::JobQueue;

/// Shared state behind every handler.
pub struct AppState {
    /// API-key authentication
    pub auth: AuthService,
    /// Job persistence
    pub jobs: Arc<dyn JobRepository>,
    /// Intake queue
    pub queue: JobQueue,
    /// Attempt ceiling stamped onto new jobs
    pub max_attempts: i32,
    /// Process start, for the health endpoint
    pub started_at: Instant,
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/images/generate", post(create_generation))
        .route("/v1/jobs", get(list_jobs))
        .route("/v1/jobs/:id", get(get_job).delete(cancel_job))
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

async fn create_generation(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<(StatusCode, Json<GenerateImageResponse>)> {
    let tenant = state.auth.authenticate(&headers).await?;

    // Parse by hand so malformed bodies map to INVALID_REQUEST rather
    // than the extractor's default rejection.
    let request: GenerateImageRequest = serde_json::from_str(&body)
        .map_err(|e| ApiError::InvalidRequest(format!("invalid request body: {e}")))?;
    request.validate()?;

    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from);

    let job = state
        .jobs
        .create(NewJob {
            tenant_id: tenant.id,
            idempotency_key,
            mode: request.mode.unwrap_or(GenerationMode::Final),
            prompt: request.prompt,
            input_image: request.input_image,
            resolution: request.resolution,
            aspect_ratio: request.aspect_ratio,
            sample_count: request.sample_count,
            model: None,
            max_attempts: state.max_attempts,
        })
        .await?;

    // Enqueueing is idempotent: re-submitting an existing id only
    // refreshes its readiness time.
    if job.status.is_runnable() {
        state.queue.enqueue(&job.id).await?;
    }

    info!(job_id = %job.id, tenant_id = %tenant.id, "job accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(GenerateImageResponse {
            job_id: job.id,
            status: job.status,
        }),
    ))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobResponse>> {
    let tenant = state.auth.authenticate(&headers).await?;
    let job = state
        .jobs
        .get_for_tenant(tenant.id, &job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job {job_id} not found")))?;
    Ok(Json(job.into()))
}

/// Query parameters for job listing.
#[derive(Debug, Deserialize)]
pub struct ListJobsParams {
    /// Restrict to one status
    pub status: Option<String>,
    /// Page size (1..=100)
    pub limit: Option<i64>,
    /// Cursor from a previous page
    pub cursor: Option<String>,
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListJobsParams>,
) -> ApiResult<Json<JobListResponse>> {
    let tenant = state.auth.authenticate(&headers).await?;

    let status = params
        .status
        .as_deref()
        .map(|s| {
            JobStatus::parse(s)
                .ok_or_else(|| ApiError::InvalidRequest(format!("unknown status: {s}")))
        })
        .transpose()?;

    let page = state
        .jobs
        .list_for_tenant(
            tenant.id,
            JobListFilter {
                status,
                limit: params.limit.unwrap_or(20),
                cursor: params.cursor,
            },
        )
        .await?;

    Ok(Json(JobListResponse {
        items: page.items.into_iter().map(JobResponse::from).collect(),
        next_cursor: page.next_cursor,
        has_more: page.has_more,
    }))
}

async fn cancel_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelJobResponse>> {
    let tenant = state.auth.authenticate(&headers).await?;

    match state.jobs.cancel(tenant.id, &job_id).await? {
        CancelOutcome::Canceled(job) => {
            info!(job_id = %job.id, tenant_id = %tenant.id, "job canceled");
            Ok(Json(CancelJobResponse {
                job_id: job.id,
                status: JobStatus::Canceled,
            }))
        }
        CancelOutcome::InvalidState(status) => Err(ApiError::InvalidState(format!(
            "job {job_id} is {status} and cannot be canceled"
        ))),
        CancelOutcome::NotFound => Err(ApiError::NotFound(format!("job {job_id} not found"))),
    }
}
