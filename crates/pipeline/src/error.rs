use imgate_comfyui::api::ComfyUIApiError;
use imgate_comfyui::history::FetchError;
use imgate_comfyui::watcher::WatchError;
use imgate_comfyui::workflow::WorkflowError;
use imgate_core::error::CoreError;
use imgate_core::types::AssetKind;

/// Errors that abort a generation run.
///
/// Each variant names the stage that failed; none of them are retried
/// inside the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Input rejected before any remote call.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Failed to upload {kind} '{filename}': {source}")]
    Upload {
        kind: AssetKind,
        filename: String,
        #[source]
        source: ComfyUIApiError,
    },

    #[error("Failed to submit workflow: {0}")]
    Submission(#[source] ComfyUIApiError),

    /// The built graph violated a structural invariant.
    #[error("Invalid workflow: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Generation timed out after {waited_secs}s (prompt {prompt_id})")]
    Timeout { prompt_id: String, waited_secs: u64 },

    #[error("Event stream error: {0}")]
    Stream(String),

    #[error("Generation failed for prompt {prompt_id}: {message}")]
    ExecutionFailed { prompt_id: String, message: String },

    #[error("No history found for prompt {0}")]
    NotFound(String),

    #[error("No images were generated for prompt {0}")]
    NoImages(String),

    /// History lookup failed at the transport or status level.
    #[error("Failed to retrieve results: {0}")]
    Fetch(#[source] ComfyUIApiError),
}

impl From<WatchError> for PipelineError {
    fn from(err: WatchError) -> Self {
        match err {
            WatchError::TimedOut { prompt_id, waited } => PipelineError::Timeout {
                prompt_id,
                waited_secs: waited.as_secs(),
            },
            WatchError::Stream(msg) => PipelineError::Stream(msg),
            WatchError::ExecutionFailed {
                prompt_id,
                node_id,
                message,
            } => PipelineError::ExecutionFailed {
                prompt_id,
                message: format!("node {node_id}: {message}"),
            },
        }
    }
}

impl From<FetchError> for PipelineError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound { prompt_id } => PipelineError::NotFound(prompt_id),
            FetchError::Api(e) => PipelineError::Fetch(e),
        }
    }
}
