//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`ComfyUIMessage`] enum.

use serde::Deserialize;

/// All ComfyUI WebSocket message types the gateway understands.
///
/// Deserialized via the adjacently-tagged `"type"` field with
/// associated `"data"` content.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth, etc.).
    #[serde(rename = "status")]
    Status(StatusData),

    /// A prompt has started executing.
    #[serde(rename = "execution_start")]
    ExecutionStart(PromptData),

    /// Some nodes were skipped because their outputs are cached.
    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Progress update from a long-running node.
    #[serde(rename = "progress")]
    Progress(ProgressData),

    /// A node has finished and produced output.
    #[serde(rename = "executed")]
    Executed(ExecutedData),

    /// Newer servers announce success explicitly after the final `executing`.
    #[serde(rename = "execution_success")]
    ExecutionSuccess(PromptData),

    /// Execution was interrupted by a client.
    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(PromptData),

    /// Execution failed with an error.
    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),
}

/// Queue status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

/// Current queue state.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload carrying only the prompt id.
#[derive(Debug, Clone, Deserialize)]
pub struct PromptData {
    pub prompt_id: String,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, execution of the prompt has completed.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    pub prompt_id: String,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i32,
    /// Total number of steps.
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    /// The node that produced this output.
    pub node: String,
    /// Raw output value (images, filenames, etc.).
    pub output: serde_json::Value,
    pub prompt_id: String,
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: String,
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

impl ComfyUIMessage {
    /// The prompt this message belongs to, if it carries one.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            ComfyUIMessage::Status(_) => None,
            ComfyUIMessage::Progress(data) => data.prompt_id.as_deref(),
            ComfyUIMessage::ExecutionStart(data)
            | ComfyUIMessage::ExecutionSuccess(data)
            | ComfyUIMessage::ExecutionInterrupted(data) => Some(&data.prompt_id),
            ComfyUIMessage::ExecutionCached(data) => Some(&data.prompt_id),
            ComfyUIMessage::Executing(data) => Some(&data.prompt_id),
            ComfyUIMessage::Executed(data) => Some(&data.prompt_id),
            ComfyUIMessage::ExecutionError(data) => Some(&data.prompt_id),
        }
    }

    /// `true` for the terminal `executing` event of `prompt_id`: no node
    /// is executing any more, so the whole graph has finished.
    pub fn is_completion_of(&self, prompt_id: &str) -> bool {
        matches!(
            self,
            ComfyUIMessage::Executing(data) if data.node.is_none() && data.prompt_id == prompt_id
        )
    }
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` for malformed JSON or unknown `type` values.
/// Callers should log unknown types and continue.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}
