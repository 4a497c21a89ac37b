use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use imgate_comfyui::api::ComfyUIApiError;
use serde::Serialize;

use crate::state::AppState;

/// Workflow-server liveness report.
#[derive(Debug, Serialize)]
pub struct ComfyUIHealth {
    /// `healthy`, `unhealthy` (server answered with an error), or `error`
    /// (server unreachable).
    pub status: &'static str,
    pub comfyui_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /api/v1/health -- probes `GET /system_stats` on the workflow server.
///
/// Answers 200 when healthy and 503 otherwise, with the same body shape.
pub async fn comfyui_health(State(state): State<AppState>) -> (StatusCode, Json<ComfyUIHealth>) {
    let api = state.pipeline.api();
    let comfyui_url = api.api_url().to_string();

    match api.system_stats().await {
        Ok(stats) => (
            StatusCode::OK,
            Json(ComfyUIHealth {
                status: "healthy",
                comfyui_url,
                system: stats.get("system").cloned(),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Workflow server health check failed");
            let status = match e {
                ComfyUIApiError::ApiError { .. } => "unhealthy",
                ComfyUIApiError::Request(_) => "error",
            };
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ComfyUIHealth {
                    status,
                    comfyui_url,
                    system: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}
