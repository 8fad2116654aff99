// HTTP server for the admission API
//
// Routes:
// - POST /v1/admit/{user_id}  one admission decision
// - GET  /v1/quota/{user_id}  stored record
// - GET  /v1/dashboard        summary of every record
// - GET  /health, /metrics    liveness and Prometheus scrape

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::metrics;
use crate::rate_limit::{AdmissionController, QuotaError, UserId};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    controller: AdmissionController,
}

/// Build the API router around `controller`
pub fn router(controller: AdmissionController) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/admit/{user_id}", post(admit_handler))
        .route("/v1/quota/{user_id}", get(quota_handler))
        .route("/v1/dashboard", get(dashboard_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { controller })
}

/// Serve the API on `addr` until `shutdown` resolves
///
/// # Errors
///
/// Returns an error if metrics cannot be registered, the address cannot be
/// bound, or the server fails.
pub async fn serve<F>(addr: SocketAddr, controller: AdmissionController, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    metrics::init().context("Failed to initialize metrics")?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind API server on {}", addr))?;

    info!("Admission API listening on {}", addr);

    axum::serve(listener, router(controller))
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    info!("Admission API stopped");
    Ok(())
}

fn quota_error_response(e: QuotaError) -> Response {
    error!("Quota store failure: {}", e);
    (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response()
}

async fn admit_handler(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.controller.check(&UserId::new(user_id)).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => quota_error_response(e),
    }
}

async fn quota_handler(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    match state.controller.status(&UserId::new(user_id)).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "unknown user").into_response(),
        Err(e) => quota_error_response(e),
    }
}

async fn dashboard_handler(State(state): State<AppState>) -> Response {
    match state.controller.dashboard().await {
        Ok(data) => (StatusCode::OK, Json(data)).into_response(),
        Err(e) => quota_error_response(e),
    }
}

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

async fn health_handler() -> impl IntoResponse {
    StatusCode::OK
}
