use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
}

/// Service description returned by `GET /`.
#[derive(Serialize)]
pub struct ServiceInfo {
    pub service: &'static str,
    pub version: &'static str,
    pub endpoints: Vec<&'static str>,
}

/// GET /health -- process liveness only; see `/api/v1/health` for the
/// workflow server.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET / -- service name and endpoint index.
async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "imgate",
        version: env!("CARGO_PKG_VERSION"),
        endpoints: vec![
            "GET /health",
            "GET /api/v1/health",
            "POST /api/v1/img2img",
            "POST /api/v1/mask-img2img",
            "POST /api/v1/batch-img2img",
            "GET /api/v1/status/{prompt_id}",
        ],
    })
}

/// Mount root-level routes (NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(service_info))
        .route("/health", get(health_check))
}
