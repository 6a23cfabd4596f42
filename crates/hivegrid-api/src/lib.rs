//! hivegrid-api: REST API for a hivegrid cluster.
//!
//! Provides axum route handlers over the dispatcher and the telemetry
//! collector. Every JSON response uses the `{success, data, error}`
//! envelope.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/jobs` | Submit a job |
//! | GET | `/api/v1/jobs` | Queued, active, completed and failed jobs |
//! | GET | `/api/v1/jobs/{id}` | Get one job |
//! | POST | `/api/v1/jobs/{id}/resubmit` | Resubmit a failed job |
//! | GET | `/api/v1/status` | Dispatcher stats and node status |
//! | GET | `/api/v1/nodes/ranking` | Node scores for `?requirements=a,b` |
//! | GET | `/api/v1/telemetry/summary` | Cluster summary |
//! | GET | `/api/v1/telemetry/efficiency` | Cluster efficiency |
//! | GET | `/api/v1/telemetry/system` | System history for `?hours=` |
//! | POST | `/api/v1/telemetry/nodes` | Record a node sample |
//! | GET | `/api/v1/telemetry/nodes/{id}` | Node history for `?hours=` |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use hivegrid_scheduler::Dispatcher;
use hivegrid_telemetry::TelemetryCollector;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Arc<Dispatcher>,
    pub telemetry: Arc<TelemetryCollector>,
}

/// Build the complete API router (REST + metrics).
pub fn build_router(dispatcher: Arc<Dispatcher>, telemetry: Arc<TelemetryCollector>) -> Router {
    let state = ApiState {
        dispatcher,
        telemetry,
    };

    let api_routes = Router::new()
        .route("/jobs", get(handlers::list_jobs).post(handlers::submit_job))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/resubmit", post(handlers::resubmit_job))
        .route("/status", get(handlers::cluster_status))
        .route("/nodes/ranking", get(handlers::node_ranking))
        .route("/telemetry/summary", get(handlers::telemetry_summary))
        .route("/telemetry/efficiency", get(handlers::telemetry_efficiency))
        .route("/telemetry/system", get(handlers::system_history))
        .route("/telemetry/nodes", post(handlers::record_node_metrics))
        .route("/telemetry/nodes/{id}", get(handlers::node_history))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics).with_state(state))
}
