//! REST API handlers.
//!
//! Job handlers go through the `Dispatcher`, telemetry handlers through
//! the `TelemetryCollector`. All return JSON in the `ApiResponse` envelope
//! except `/metrics`.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use tracing::debug;

use hivegrid_core::{JobPriority, NodeMetrics, Payload};
use hivegrid_scheduler::SchedulerError;

use crate::ApiState;

const DEFAULT_HISTORY_HOURS: f64 = 1.0;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn scheduler_error(e: &SchedulerError) -> axum::response::Response {
    let status = match e {
        SchedulerError::UnknownJobKind(_) | SchedulerError::MissingField { .. } => {
            StatusCode::BAD_REQUEST
        }
        SchedulerError::JobNotFound(_) => StatusCode::NOT_FOUND,
        SchedulerError::NotRetryable { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status).into_response()
}

// ── Jobs ───────────────────────────────────────────────────────

/// Submit request body.
#[derive(Deserialize)]
pub struct SubmitRequest {
    pub kind: String,
    #[serde(default)]
    pub payload: Payload,
    pub priority: Option<String>,
}

/// POST /api/v1/jobs
pub async fn submit_job(
    State(state): State<ApiState>,
    Json(req): Json<SubmitRequest>,
) -> impl IntoResponse {
    let priority = match req.priority.as_deref().map(str::parse::<JobPriority>) {
        None => JobPriority::default(),
        Some(Ok(p)) => p,
        Some(Err(e)) => return error_response(&e, StatusCode::BAD_REQUEST).into_response(),
    };

    match state.dispatcher.submit_named(&req.kind, req.payload, priority).await {
        Ok(id) => (
            StatusCode::CREATED,
            ApiResponse::ok(serde_json::json!({ "id": id, "priority": priority })),
        )
            .into_response(),
        Err(e) => scheduler_error(&e),
    }
}

/// GET /api/v1/jobs
pub async fn list_jobs(State(state): State<ApiState>) -> impl IntoResponse {
    let d = &state.dispatcher;
    ApiResponse::ok(serde_json::json!({
        "queued": d.queued_jobs().await,
        "active": d.active_jobs().await,
        "completed": d.completed_jobs().await,
        "failed": d.failed_jobs().await,
    }))
}

/// GET /api/v1/jobs/:id
pub async fn get_job(State(state): State<ApiState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.dispatcher.get_job(&id).await {
        Some(job) => ApiResponse::ok(job).into_response(),
        None => error_response("job not found", StatusCode::NOT_FOUND).into_response(),
    }
}

/// POST /api/v1/jobs/:id/resubmit
pub async fn resubmit_job(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.dispatcher.resubmit(&id).await {
        Ok(job) => ApiResponse::ok(job).into_response(),
        Err(e) => scheduler_error(&e),
    }
}

// ── Cluster ────────────────────────────────────────────────────

/// GET /api/v1/status
pub async fn cluster_status(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.dispatcher.get_status().await)
}

#[derive(Deserialize)]
pub struct RankingQuery {
    /// Comma-separated capability tags.
    #[serde(default)]
    pub requirements: String,
}

/// GET /api/v1/nodes/ranking
pub async fn node_ranking(
    State(state): State<ApiState>,
    Query(q): Query<RankingQuery>,
) -> impl IntoResponse {
    let requirements: Vec<String> = q
        .requirements
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    debug!(?requirements, "ranking nodes");
    ApiResponse::ok(state.dispatcher.registry().rank(&requirements).await)
}

// ── Telemetry ──────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub hours: Option<f64>,
}

impl HistoryQuery {
    fn hours(&self) -> f64 {
        self.hours.unwrap_or(DEFAULT_HISTORY_HOURS)
    }
}

/// GET /api/v1/telemetry/summary
///
/// `data` is null until the first sample has been taken.
pub async fn telemetry_summary(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.telemetry.get_cluster_summary().await)
}

/// GET /api/v1/telemetry/efficiency
pub async fn telemetry_efficiency(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(state.telemetry.calculate_cluster_efficiency().await)
}

/// GET /api/v1/telemetry/system
pub async fn system_history(
    State(state): State<ApiState>,
    Query(q): Query<HistoryQuery>,
) -> impl IntoResponse {
    ApiResponse::ok(state.telemetry.get_system_metrics_history(q.hours()).await)
}

/// POST /api/v1/telemetry/nodes
pub async fn record_node_metrics(
    State(state): State<ApiState>,
    Json(sample): Json<NodeMetrics>,
) -> impl IntoResponse {
    let node_id = sample.node_id.clone();
    state.telemetry.record_node_metrics(sample).await;
    (StatusCode::CREATED, ApiResponse::ok(serde_json::json!({ "node_id": node_id })))
}

/// GET /api/v1/telemetry/nodes/:id
pub async fn node_history(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> impl IntoResponse {
    ApiResponse::ok(state.telemetry.get_node_metrics_history(&id, q.hours()).await)
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let summary = state.telemetry.get_cluster_summary().await;
    let efficiency = state.telemetry.calculate_cluster_efficiency().await;

    let body = hivegrid_telemetry::render_prometheus(summary.as_ref(), efficiency.as_ref());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
