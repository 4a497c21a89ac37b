use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use imgate_core::error::CoreError;
use imgate_pipeline::PipelineError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`PipelineError`] and adds HTTP-specific
/// variants. Implements [`IntoResponse`] to produce consistent JSON error
/// responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `imgate_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A failed generation, status, or liveness call.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

type ErrorParts = (StatusCode, &'static str, String);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core),
            AppError::Pipeline(err) => classify_pipeline_error(err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => internal(msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_core_error(err: &CoreError) -> ErrorParts {
    match err {
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
    }
}

/// Map a pipeline failure to an HTTP status, error code, and message.
///
/// - Remote workflow-server failures map to 502, timeouts to 504.
/// - Unknown prompts and empty results map to 404.
/// - Invalid built workflows are our own bug: 500 with a sanitized message.
fn classify_pipeline_error(err: &PipelineError) -> ErrorParts {
    let upstream = |code: &'static str| {
        tracing::warn!(error = %err, code, "Workflow server call failed");
        (StatusCode::BAD_GATEWAY, code, err.to_string())
    };

    match err {
        PipelineError::Core(core) => classify_core_error(core),
        PipelineError::Upload { .. } => upstream("UPLOAD_FAILED"),
        PipelineError::Submission(_) => upstream("SUBMISSION_FAILED"),
        PipelineError::Stream(_) => upstream("STREAM_ERROR"),
        PipelineError::ExecutionFailed { .. } => upstream("EXECUTION_FAILED"),
        PipelineError::Fetch(_) => upstream("FETCH_FAILED"),
        PipelineError::Timeout { .. } => (
            StatusCode::GATEWAY_TIMEOUT,
            "GENERATION_TIMEOUT",
            err.to_string(),
        ),
        PipelineError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
        PipelineError::NoImages(_) => (StatusCode::NOT_FOUND, "NO_IMAGES", err.to_string()),
        PipelineError::Workflow(e) => internal(&e.to_string()),
    }
}

fn internal(msg: &str) -> ErrorParts {
    tracing::error!(error = %msg, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
