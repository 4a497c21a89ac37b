pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /health                      workflow-server liveness (GET)
/// /img2img                     single image transform (multipart POST)
/// /mask-img2img                masked edit (multipart POST)
/// /batch-img2img               one prompt over up to 10 images (multipart POST)
/// /status/{prompt_id}          processing / completed (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::comfyui_health))
        .route("/img2img", post(handlers::generation::image_to_image))
        .route("/mask-img2img", post(handlers::generation::masked_edit))
        .route("/batch-img2img", post(handlers::generation::batch_image_to_image))
        .route("/status/{prompt_id}", get(handlers::generation::status))
}
