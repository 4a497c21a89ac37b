//! Tests for `AppError` → HTTP response mapping.
//!
//! These call `IntoResponse` directly on `AppError` values; no HTTP server
//! is involved.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use imgate_api::error::AppError;
use imgate_comfyui::api::ComfyUIApiError;
use imgate_core::error::CoreError;
use imgate_core::types::AssetKind;
use imgate_pipeline::PipelineError;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

fn api_error() -> ComfyUIApiError {
    ComfyUIApiError::ApiError {
        status: 500,
        body: "boom".into(),
    }
}

// ---------------------------------------------------------------------------
// Test: validation errors map to 400 VALIDATION_ERROR, directly or wrapped
// ---------------------------------------------------------------------------

#[tokio::test]
async fn validation_error_returns_400() {
    let (status, json) =
        error_to_response(AppError::Core(CoreError::Validation("Missing prompt parameter".into()))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(json["error"], "Missing prompt parameter");

    let wrapped = AppError::Pipeline(PipelineError::Core(CoreError::Validation("bad".into())));
    let (status, json) = error_to_response(wrapped).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

// ---------------------------------------------------------------------------
// Test: AppError::BadRequest maps to 400 with BAD_REQUEST code
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bad_request_error_returns_400() {
    let (status, json) = error_to_response(AppError::BadRequest("invalid field value".into())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
    assert_eq!(json["error"], "invalid field value");
}

// ---------------------------------------------------------------------------
// Test: workflow-server failures map to 502 with stage-specific codes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upstream_failures_return_502() {
    let cases = [
        (
            PipelineError::Upload {
                kind: AssetKind::Mask,
                filename: "m.png".into(),
                source: api_error(),
            },
            "UPLOAD_FAILED",
        ),
        (PipelineError::Submission(api_error()), "SUBMISSION_FAILED"),
        (PipelineError::Stream("connection reset".into()), "STREAM_ERROR"),
        (
            PipelineError::ExecutionFailed {
                prompt_id: "p1".into(),
                message: "node 10: boom".into(),
            },
            "EXECUTION_FAILED",
        ),
        (PipelineError::Fetch(api_error()), "FETCH_FAILED"),
    ];

    for (err, code) in cases {
        let (status, json) = error_to_response(AppError::Pipeline(err)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY, "{code}");
        assert_eq!(json["code"], code);
    }
}

// ---------------------------------------------------------------------------
// Test: timeout maps to 504 GENERATION_TIMEOUT
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timeout_returns_504() {
    let err = PipelineError::Timeout {
        prompt_id: "p1".into(),
        waited_secs: 300,
    };

    let (status, json) = error_to_response(AppError::Pipeline(err)).await;

    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json["code"], "GENERATION_TIMEOUT");
    assert_eq!(json["error"], "Generation timed out after 300s (prompt p1)");
}

// ---------------------------------------------------------------------------
// Test: unknown prompt and empty results map to 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_results_return_404() {
    let (status, json) = error_to_response(AppError::Pipeline(PipelineError::NotFound("p1".into()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");

    let (status, json) = error_to_response(AppError::Pipeline(PipelineError::NoImages("p1".into()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NO_IMAGES");
}

// ---------------------------------------------------------------------------
// Test: AppError::InternalError maps to 500 and sanitizes the message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn internal_error_returns_500_with_sanitized_message() {
    let (status, json) =
        error_to_response(AppError::InternalError("secret connection string leaked".into())).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}
