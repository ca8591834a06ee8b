//! Operator endpoints over [`QueueService`].
//!
//! | method | path | action |
//! |---|---|---|
//! | GET | `/stats` | counters for every queue |
//! | GET | `/stats/{queue}` | counters for one queue |
//! | GET | `/{queue}/failed?start&end` | failed jobs, newest first |
//! | POST | `/{queue}/jobs/{jobId}/retry` | re-admit a failed job |
//! | POST | `/{queue}/pause` | stop new leases |
//! | POST | `/{queue}/resume` | allow new leases |
//! | DELETE | `/{queue}/clean?grace&limit&type` | purge finished jobs |
//! | GET | `/metrics` | process-local counters |

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use fin_jobs::QueueService;
use fin_queue::{CleanState, CounterSnapshot, JobRecord, QueueStats};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{DashboardError, DashboardState};

/// Default page for failed-job listings
const DEFAULT_FAILED_PAGE: usize = 50;

#[derive(Debug, Default, Deserialize)]
pub struct FailedQuery {
    pub start: Option<usize>,
    pub end: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanQuery {
    /// Milliseconds a job must have been finished for
    pub grace: Option<u64>,
    /// Maximum jobs removed; 0 removes all
    pub limit: Option<usize>,
    #[serde(rename = "type")]
    pub state: Option<String>,
}

pub fn dashboard_router(service: QueueService) -> Router<()> {
    Router::new()
        .route("/stats", get(all_stats))
        .route("/stats/{queue}", get(queue_stats))
        .route("/metrics", get(metrics))
        .route("/{queue}/failed", get(failed_jobs))
        .route("/{queue}/jobs/{job_id}/retry", post(retry_job))
        .route("/{queue}/pause", post(pause_queue))
        .route("/{queue}/resume", post(resume_queue))
        .route("/{queue}/clean", delete(clean_queue))
        .with_state(DashboardState::new(service))
}

fn require_queue(state: &DashboardState, queue: &str) -> Result<(), DashboardError> {
    match state.service.registry().get(queue) {
        Some(_) => Ok(()),
        None => Err(DashboardError::queue_not_found(queue)),
    }
}

async fn all_stats(State(state): State<DashboardState>) -> Result<Json<Vec<QueueStats>>, DashboardError> {
    Ok(Json(state.service.get_all_queue_stats().await?))
}

async fn queue_stats(
    State(state): State<DashboardState>,
    Path(queue): Path<String>,
) -> Result<Json<QueueStats>, DashboardError> {
    state
        .service
        .get_queue_stats(&queue)
        .await?
        .map(Json)
        .ok_or_else(|| DashboardError::queue_not_found(&queue))
}

async fn failed_jobs(
    State(state): State<DashboardState>,
    Path(queue): Path<String>,
    query: Result<Query<FailedQuery>, QueryRejection>,
) -> Result<Json<Vec<JobRecord>>, DashboardError> {
    let Query(query) = query?;
    require_queue(&state, &queue)?;

    let start = query.start.unwrap_or(0);
    let end = query.end.unwrap_or(start.saturating_add(DEFAULT_FAILED_PAGE - 1));
    if end < start {
        return Err(DashboardError::bad_request("end must not be before start"));
    }

    Ok(Json(state.service.get_failed_jobs(&queue, start, end).await?))
}

async fn retry_job(
    State(state): State<DashboardState>,
    Path((queue, job_id)): Path<(String, String)>,
) -> Result<Json<Value>, DashboardError> {
    let record = state.service.retry_failed_job(&queue, &job_id).await?;
    Ok(Json(json!({
        "success": true,
        "queue": queue,
        "jobId": record.id,
        "state": record.state,
    })))
}

async fn pause_queue(
    State(state): State<DashboardState>,
    Path(queue): Path<String>,
) -> Result<Json<Value>, DashboardError> {
    state.service.pause_queue(&queue).await?;
    Ok(Json(json!({ "success": true, "queue": queue, "paused": true })))
}

async fn resume_queue(
    State(state): State<DashboardState>,
    Path(queue): Path<String>,
) -> Result<Json<Value>, DashboardError> {
    state.service.resume_queue(&queue).await?;
    Ok(Json(json!({ "success": true, "queue": queue, "paused": false })))
}

async fn clean_queue(
    State(state): State<DashboardState>,
    Path(queue): Path<String>,
    query: Result<Query<CleanQuery>, QueryRejection>,
) -> Result<Json<Value>, DashboardError> {
    let Query(query) = query?;
    let clean_state = match query.state.as_deref() {
        Some(raw) => raw.parse::<CleanState>().map_err(DashboardError::bad_request)?,
        None => CleanState::default(),
    };
    let grace = Duration::from_millis(query.grace.unwrap_or(0));

    let removed = state
        .service
        .clean_queue(&queue, grace, query.limit.unwrap_or(0), clean_state)
        .await?;

    Ok(Json(json!({
        "success": true,
        "queue": queue,
        "type": clean_state,
        "removed": removed.len(),
        "jobIds": removed,
    })))
}

async fn metrics(State(state): State<DashboardState>) -> Json<BTreeMap<String, CounterSnapshot>> {
    Json(state.service.metrics().snapshot())
}
