//! HTTP API for the document dispatch service.
//!
//! This module provides the REST API endpoints for:
//! - Health and metrics monitoring
//! - Document upload, listing and download
//! - Task status

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ServiceError;
use crate::service::{DispatchService, QueueHealth};

pub mod documents;
pub mod tasks;
use documents::{
    download_document_handler, get_document_handler, list_documents_handler,
    process_document_handler, upload_document_handler,
};
use tasks::get_task_handler;

/// Multipart framing allowance on top of the document size limit
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state
pub struct AppState {
    pub service: Arc<DispatchService>,
    pub metrics: PrometheusHandle,
    pub start_time: Instant,
}

/// Request body limit for uploads of at most `max_document_size_bytes`
fn upload_body_limit(max_document_size_bytes: u64) -> usize {
    usize::try_from(max_document_size_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES)
}

/// Build the API router
pub fn router(service: Arc<DispatchService>, metrics: PrometheusHandle) -> Router {
    let max_body_size = upload_body_limit(service.config.limits.max_document_size_bytes);

    let state = Arc::new(AppState {
        service,
        metrics,
        start_time: Instant::now(),
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/documents", get(list_documents_handler))
        .route(
            "/documents",
            post(upload_document_handler).layer(DefaultBodyLimit::max(max_body_size)),
        )
        .route("/documents/{id}", get(get_document_handler))
        .route("/documents/{id}/download", get(download_document_handler))
        .route("/documents/{id}/process", post(process_document_handler))
        .route("/tasks/{id}", get(get_task_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// === Health & Metrics ===

async fn health_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, ServiceError> {
    let queue = state.service.queue_health()?;

    Ok(Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        queue,
    }))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_seconds: u64,
    #[serde(flatten)]
    queue: QueueHealth,
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
