//! Job status probe.

use std::str::FromStr;

use imgate_comfyui::history::{download_artifacts, GeneratedImage};

use crate::error::PipelineError;
use crate::generation::GenerationPipeline;

/// How a prompt id that is absent from history is reported.
///
/// ComfyUI only writes history once a prompt finishes, so "absent" cannot
/// tell a queued prompt from an unknown one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NotFoundPolicy {
    /// Report absent prompts as still processing.
    #[default]
    Processing,
    /// Report absent prompts as not found.
    Error,
}

impl FromStr for NotFoundPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "processing" => Ok(NotFoundPolicy::Processing),
            "error" => Ok(NotFoundPolicy::Error),
            other => Err(format!(
                "unknown not-found policy '{other}' (expected 'processing' or 'error')"
            )),
        }
    }
}

#[derive(Debug)]
pub enum JobStatus {
    Processing,
    Completed(Vec<GeneratedImage>),
    /// ComfyUI recorded an execution error for the prompt.
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed(_) => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl GenerationPipeline {
    /// Report whether `prompt_id` has produced images yet.
    pub async fn status(&self, prompt_id: &str) -> Result<JobStatus, PipelineError> {
        let history = self
            .api
            .get_history(prompt_id)
            .await
            .map_err(PipelineError::Fetch)?;

        let Some(entry) = history.entry(prompt_id) else {
            return match self.config.not_found_policy {
                NotFoundPolicy::Processing => {
                    tracing::debug!(prompt_id, "Prompt not in history yet, reporting processing");
                    Ok(JobStatus::Processing)
                }
                NotFoundPolicy::Error => Err(PipelineError::NotFound(prompt_id.to_string())),
            };
        };

        if entry.is_error() {
            tracing::debug!(prompt_id, "Prompt recorded an execution error");
            return Ok(JobStatus::Failed);
        }

        let images = download_artifacts(&self.api, prompt_id, entry.artifacts()).await;
        if images.is_empty() {
            Ok(JobStatus::Processing)
        } else {
            Ok(JobStatus::Completed(images))
        }
    }
}
