//! Job history parsing and artifact retrieval.
//!
//! ComfyUI reports produced files through `GET /history/{prompt_id}` as
//! artifact references (`filename`, `subfolder`, `type`). The bytes
//! themselves are fetched with a separate `GET /view` call per artifact.

use std::collections::{BTreeMap, HashMap};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::api::{ComfyUIApi, ComfyUIApiError};

/// `status_str` reported by ComfyUI for prompts that raised an exception.
pub const HISTORY_STATUS_ERROR: &str = "error";

/// Default artifact folder type when the history omits it.
const DEFAULT_ARTIFACT_KIND: &str = "output";

/// Body of `GET /history/{prompt_id}`: prompt id → history entry.
///
/// An empty map means the prompt is unknown *or* still running; the
/// server does not distinguish the two.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct History {
    entries: HashMap<String, HistoryEntry>,
}

/// History record for a single prompt.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryEntry {
    /// Per-node outputs keyed by node id.
    #[serde(default)]
    pub outputs: BTreeMap<String, NodeOutput>,
    #[serde(default)]
    pub status: Option<HistoryStatus>,
}

/// Execution status summary attached to a history entry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryStatus {
    #[serde(default)]
    pub status_str: String,
    #[serde(default)]
    pub completed: bool,
}

/// Output of one node. Only image outputs are of interest here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ArtifactRef>,
}

/// Pointer to a file stored on the ComfyUI server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    /// Folder type (`output`, `temp`, `input`).
    #[serde(rename = "type", default = "default_artifact_kind")]
    pub kind: String,
}

fn default_artifact_kind() -> String {
    DEFAULT_ARTIFACT_KIND.to_string()
}

/// Bytes of one retrieved artifact.
#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub artifact: ArtifactRef,
    pub data: Vec<u8>,
}

impl GeneratedImage {
    pub fn filename(&self) -> &str {
        &self.artifact.filename
    }

    /// Standard base64 encoding of the image bytes.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.data)
    }
}

/// Errors from the result fetcher.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The prompt id is absent from history (never ran, purged, or not
    /// finished yet).
    #[error("No history for prompt {prompt_id}")]
    NotFound { prompt_id: String },

    /// The history request itself failed.
    #[error(transparent)]
    Api(#[from] ComfyUIApiError),
}

impl History {
    /// Look up the entry for `prompt_id`.
    pub fn entry(&self, prompt_id: &str) -> Option<&HistoryEntry> {
        self.entries.get(prompt_id)
    }

    /// All artifact references for `prompt_id`, in node-id order.
    pub fn artifacts(&self, prompt_id: &str) -> Result<Vec<ArtifactRef>, FetchError> {
        self.entry(prompt_id)
            .map(HistoryEntry::artifacts)
            .ok_or_else(|| FetchError::NotFound {
                prompt_id: prompt_id.to_string(),
            })
    }
}

impl HistoryEntry {
    pub fn artifacts(&self) -> Vec<ArtifactRef> {
        self.outputs
            .values()
            .flat_map(|output| output.images.iter().cloned())
            .collect()
    }

    /// `true` when ComfyUI recorded an execution error for this prompt.
    pub fn is_error(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.status_str == HISTORY_STATUS_ERROR)
    }
}

/// Retrieve every image produced by `prompt_id`.
///
/// Looks the prompt up in history, then downloads each referenced artifact.
/// A failed individual download is logged and skipped; the remaining images
/// are still returned. Returns an empty list when the history entry has no
/// image outputs.
pub async fn fetch_generated_images(
    api: &ComfyUIApi,
    prompt_id: &str,
) -> Result<Vec<GeneratedImage>, FetchError> {
    let history = api.get_history(prompt_id).await?;
    let artifacts = history.artifacts(prompt_id)?;
    Ok(download_artifacts(api, prompt_id, artifacts).await)
}

/// Download each artifact of `prompt_id` with `GET /view`, skipping (and
/// logging) the ones that cannot be retrieved.
pub async fn download_artifacts(
    api: &ComfyUIApi,
    prompt_id: &str,
    artifacts: Vec<ArtifactRef>,
) -> Vec<GeneratedImage> {
    let mut images = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        match api.view(&artifact).await {
            Ok(data) => images.push(GeneratedImage { artifact, data }),
            Err(e) => {
                tracing::warn!(
                    prompt_id,
                    filename = %artifact.filename,
                    error = %e,
                    "Skipping artifact that could not be retrieved",
                );
            }
        }
    }

    tracing::debug!(prompt_id, count = images.len(), "Fetched generated images");
    images
}
