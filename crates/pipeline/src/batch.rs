//! Batch runner: one prompt applied to several images.
//!
//! Each item is an independent pipeline run with its own watcher and
//! correlation id. Item `i` uses seed `base + i`; a failing item is
//! recorded and never aborts its siblings.
//!
//! The whole batch shares one deadline. A running item's completion wait is
//! cut short to meet it, and items that have not started when it passes are
//! recorded as failures without touching the workflow server.

use std::time::Instant;

use futures::stream::{self, StreamExt};
use imgate_comfyui::workflow::GenerationOptions;
use imgate_core::seed::{batch_item_seed, resolve_seed};
use imgate_core::validation::validate_batch_size;
use serde::Serialize;

use crate::error::PipelineError;
use crate::generation::{
    Capabilities, GenerationOutcome, GenerationPipeline, GenerationRequest, InputImage, Operation,
};

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub images: Vec<InputImage>,
    pub prompt: String,
    /// Base seed; random when absent.
    pub seed: Option<i64>,
    pub style: Option<String>,
    pub user_id: String,
    pub options: GenerationOptions,
    pub capabilities: Capabilities,
}

/// Result for one batch item.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Success {
        input_filename: String,
        #[serde(flatten)]
        outcome: GenerationOutcome,
    },
    Failure {
        input_filename: String,
        seed: i64,
        error: String,
    },
}

impl BatchItem {
    pub fn input_filename(&self) -> &str {
        match self {
            BatchItem::Success { input_filename, .. } | BatchItem::Failure { input_filename, .. } => {
                input_filename
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BatchItem::Success { .. })
    }
}

#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub base_seed: i64,
    /// One entry per input, in input order.
    pub batch_results: Vec<BatchItem>,
    pub total_processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl GenerationPipeline {
    /// Run the batch, `batch_concurrency` items at a time.
    ///
    /// Fails as a whole only when the batch size is invalid.
    pub async fn run_batch(&self, request: BatchRequest) -> Result<BatchOutcome, PipelineError> {
        validate_batch_size(request.images.len())?;

        let budget = self.config.batch_deadline;
        let deadline = Instant::now() + budget;
        let base_seed = resolve_seed(request.seed);
        let concurrency = self.config.batch_concurrency.max(1);
        tracing::info!(
            items = request.images.len(),
            base_seed,
            concurrency,
            "Starting batch",
        );

        let BatchRequest {
            images,
            prompt,
            style,
            user_id,
            options,
            capabilities,
            ..
        } = request;

        let batch_results: Vec<BatchItem> = stream::iter(images.into_iter().enumerate())
            .map(|(index, image)| {
                let seed = batch_item_seed(base_seed, index);
                let input_filename = image.filename.clone();
                let item = GenerationRequest {
                    operation: Operation::ImageToImage { image },
                    prompt: prompt.clone(),
                    seed: Some(seed),
                    style: style.clone(),
                    user_id: user_id.clone(),
                    options: options.clone(),
                    capabilities,
                };
                async move {
                    if Instant::now() >= deadline {
                        tracing::warn!(index, input_filename = %input_filename, "Batch deadline passed, skipping item");
                        return BatchItem::Failure {
                            input_filename,
                            seed,
                            error: format!(
                                "Batch deadline of {}s passed before this item started",
                                budget.as_secs()
                            ),
                        };
                    }

                    match self.run_until(item, Some(deadline)).await {
                        Ok(outcome) => BatchItem::Success {
                            input_filename,
                            outcome,
                        },
                        Err(e) => {
                            tracing::warn!(
                                index,
                                input_filename = %input_filename,
                                error = %e,
                                "Batch item failed",
                            );
                            BatchItem::Failure {
                                input_filename,
                                seed,
                                error: e.to_string(),
                            }
                        }
                    }
                }
            })
            .buffered(concurrency)
            .collect()
            .await;

        let succeeded = batch_results.iter().filter(|item| item.is_success()).count();
        let total_processed = batch_results.len();
        tracing::info!(total_processed, succeeded, "Batch finished");

        Ok(BatchOutcome {
            base_seed,
            failed: total_processed - succeeded,
            total_processed,
            succeeded,
            batch_results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_item_serializes_flat() {
        let item = BatchItem::Failure {
            input_filename: "b.png".into(),
            seed: 43,
            error: "upload failed".into(),
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["input_filename"], "b.png");
        assert_eq!(json["error"], "upload failed");
        assert_eq!(json["seed"], 43);
        assert!(!item.is_success());
        assert_eq!(item.input_filename(), "b.png");
    }
}
