#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use imgate_api::config::{ComfyUIConfig, ServerConfig};
use imgate_api::router::build_app_router;
use imgate_api::state::AppState;
use imgate_comfyui::api::ComfyUIApi;
use imgate_comfyui::client::ComfyUIClient;
use imgate_pipeline::status::NotFoundPolicy;
use imgate_pipeline::GenerationPipeline;

/// Port nothing listens on, so any remote call fails fast.
pub const UNREACHABLE_COMFYUI: &str = "http://127.0.0.1:1";

pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01";

const BOUNDARY: &str = "imgate-test-boundary";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        max_body_bytes: 10 * 1024 * 1024,
        comfyui: ComfyUIConfig {
            api_url: UNREACHABLE_COMFYUI.to_string(),
            ws_url: None,
            completion_timeout_secs: 5,
            poll_interval_ms: 100,
            not_found_policy: NotFoundPolicy::Processing,
            batch_concurrency: 1,
            batch_timeout_secs: 20,
        },
        storage: None,
        enhancer: None,
    }
}

/// Build the full application router against an unreachable workflow
/// server, through the same [`build_app_router`] that `main.rs` uses.
pub fn build_test_app() -> Router {
    let config = test_config();
    let pipeline = GenerationPipeline::new(
        ComfyUIApi::new(config.comfyui.api_url.clone()),
        ComfyUIClient::from_api_url(&config.comfyui.api_url),
        config.comfyui.pipeline_config(),
    );
    let state = AppState {
        config: Arc::new(config.clone()),
        pipeline: Arc::new(pipeline),
    };
    build_app_router(state, &config)
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// One multipart part: a text field or a file.
pub enum Part<'a> {
    Text(&'a str, &'a str),
    File(&'a str, &'a str, &'a [u8]),
}

pub async fn post_multipart(app: Router, uri: &str, parts: &[Part<'_>]) -> Response<Body> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                        .as_bytes(),
                );
            }
            Part::File(name, filename, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\n\
                         Content-Type: application/octet-stream\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
                body.extend_from_slice(b"\r\n");
            }
        }
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
