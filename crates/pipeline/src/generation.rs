//! The generation pipeline.
//!
//! One run is strictly sequential:
//!
//! ```text
//! validate → [enhance] → upload → build graph → connect watcher
//!          → submit → wait → fetch → [persist] → audit
//! ```
//!
//! The watcher is connected before submission and the prompt is submitted
//! with the watcher's client id, so the completion event is always routed
//! to a live subscription. Failure at any stage aborts the run with a
//! typed [`PipelineError`]; storage and enhancement failures are logged
//! and tolerated.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use imgate_comfyui::api::{AssetHandle, ComfyUIApi};
use imgate_comfyui::client::ComfyUIClient;
use imgate_comfyui::history::{fetch_generated_images, GeneratedImage};
use imgate_comfyui::watcher::{CompletionWatcher, WatchConfig, WatchError};
use imgate_comfyui::workflow::{self, GenerationOptions, WorkflowGraph};
use imgate_core::naming::{object_key, unique_image_name, CATEGORY_INPUTS, CATEGORY_RESULTS};
use imgate_core::seed::resolve_seed;
use imgate_core::types::AssetKind;
use imgate_core::validation::{mime_type_for, validate_image_upload, validate_prompt, validate_size};
use serde::Serialize;
use uuid::Uuid;

use crate::audit::{AuditRecord, AuditSink, AuditStatus, TracingAuditSink};
use crate::enhance::{styled_prompt, PromptEnhancer};
use crate::error::PipelineError;
use crate::status::NotFoundPolicy;
use crate::storage::{ObjectStore, StoredObject, UrlStyle};

/// User id recorded when the caller does not supply one.
pub const DEFAULT_USER_ID: &str = "dev";

/// Default validity of signed storage URLs.
pub const DEFAULT_SIGNED_URL_HOURS: u32 = 24;

/// File label for persisted results.
const RESULT_LABEL: &str = "edited";

/// Default wall-clock budget for a whole batch. Kept below the default HTTP
/// request timeout so a batch always returns its per-item results.
pub const DEFAULT_BATCH_DEADLINE: Duration = Duration::from_secs(330);

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Runtime tunables for a [`GenerationPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    pub watch: WatchConfig,
    /// How the status probe reports a prompt missing from history.
    pub not_found_policy: NotFoundPolicy,
    /// Number of batch items run at once (1 = sequential).
    pub batch_concurrency: usize,
    /// Overall budget for one batch. Items still waiting when it runs out
    /// are timed out; items not yet started are reported as failures.
    pub batch_deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            watch: WatchConfig::default(),
            not_found_policy: NotFoundPolicy::default(),
            batch_concurrency: 1,
            batch_deadline: DEFAULT_BATCH_DEADLINE,
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// An uploaded file as received from the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputImage {
    pub filename: String,
    pub data: Vec<u8>,
}

impl InputImage {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            data,
        }
    }
}

/// Which workflow to run, with the inputs it needs.
#[derive(Debug, Clone)]
pub enum Operation {
    ImageToImage { image: InputImage },
    MaskedEdit { image: InputImage, mask: InputImage },
}

impl Operation {
    /// Service name used in logs and audit records.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::ImageToImage { .. } => "img2img",
            Operation::MaskedEdit { .. } => "mask_img2img",
        }
    }

    /// The primary input image.
    pub fn image(&self) -> &InputImage {
        match self {
            Operation::ImageToImage { image } | Operation::MaskedEdit { image, .. } => image,
        }
    }

    /// Every input with the slot it is uploaded for.
    pub fn inputs(&self) -> Vec<(AssetKind, &InputImage)> {
        match self {
            Operation::ImageToImage { image } => vec![(AssetKind::Image, image)],
            Operation::MaskedEdit { image, mask } => {
                vec![(AssetKind::Image, image), (AssetKind::Mask, mask)]
            }
        }
    }
}

/// Optional behaviours of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Rewrite the prompt with the configured [`PromptEnhancer`].
    pub enhance_prompt: bool,
    /// Write results (and optionally inputs) to the configured store.
    pub persist_to_storage: bool,
    /// Also persist the inputs. Ignored unless `persist_to_storage`.
    pub store_input_image: bool,
    /// Include base64 image data in the outcome.
    pub return_inline: bool,
    pub url_style: UrlStyle,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            enhance_prompt: false,
            persist_to_storage: true,
            store_input_image: true,
            return_inline: true,
            url_style: UrlStyle::signed_for_hours(DEFAULT_SIGNED_URL_HOURS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub operation: Operation,
    pub prompt: String,
    /// Random seed drawn when absent.
    pub seed: Option<i64>,
    pub style: Option<String>,
    pub user_id: String,
    pub options: GenerationOptions,
    pub capabilities: Capabilities,
}

impl GenerationRequest {
    /// Request with default options, capabilities, and user id.
    pub fn new(operation: Operation, prompt: impl Into<String>) -> Self {
        Self {
            operation,
            prompt: prompt.into(),
            seed: None,
            style: None,
            user_id: DEFAULT_USER_ID.to_string(),
            options: GenerationOptions::default(),
            capabilities: Capabilities::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct OutputImage {
    pub filename: String,
    pub size_bytes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StoredObject>,
}

/// Stage timings in seconds, rounded to 10 ms.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Timings {
    pub time_prompt_enhance: Option<f64>,
    pub time_generation: f64,
    pub time_total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub prompt_id: String,
    pub seed: i64,
    pub original_prompt: String,
    pub enhanced_prompt: Option<String>,
    /// The prompt actually submitted (enhanced and styled).
    pub full_prompt: String,
    pub style: Option<String>,
    pub size: String,
    pub images: Vec<OutputImage>,
    pub input_image_url: Option<String>,
    pub mask_image_url: Option<String>,
    pub timings: Timings,
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Shared, immutable pipeline. Built once at startup; every run opens its
/// own event-stream connection.
pub struct GenerationPipeline {
    pub(crate) api: ComfyUIApi,
    pub(crate) client: ComfyUIClient,
    pub(crate) config: PipelineConfig,
    storage: Option<Arc<dyn ObjectStore>>,
    enhancer: Option<Arc<dyn PromptEnhancer>>,
    audit: Arc<dyn AuditSink>,
}

/// What a run had established by the time it ended, for the audit record.
struct RunTrace {
    /// Unique per run; keeps persisted object names from colliding.
    run_id: String,
    seed: i64,
    prompt_id: Option<String>,
    enhanced_prompt: Option<String>,
    time_prompt_enhance: Option<f64>,
    time_image_gen: Option<f64>,
    input_urls: Vec<String>,
}

impl GenerationPipeline {
    /// Pipeline without storage or enhancer, auditing to `tracing`.
    pub fn new(api: ComfyUIApi, client: ComfyUIClient, config: PipelineConfig) -> Self {
        Self {
            api,
            client,
            config,
            storage: None,
            enhancer: None,
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn ObjectStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_enhancer(mut self, enhancer: Arc<dyn PromptEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn has_storage(&self) -> bool {
        self.storage.is_some()
    }

    /// Run one generation end to end. Exactly one audit record is written,
    /// whatever the result.
    pub async fn run(&self, request: GenerationRequest) -> Result<GenerationOutcome, PipelineError> {
        self.run_until(request, None).await
    }

    /// Like [`run`](Self::run), but the completion wait never extends past
    /// `deadline`.
    pub(crate) async fn run_until(
        &self,
        request: GenerationRequest,
        deadline: Option<Instant>,
    ) -> Result<GenerationOutcome, PipelineError> {
        let started = Instant::now();
        let mut trace = RunTrace::new(resolve_seed(request.seed));

        let result = self.execute(&request, &mut trace, started, deadline).await;

        match &result {
            Ok(outcome) => tracing::info!(
                operation = request.operation.name(),
                prompt_id = %outcome.prompt_id,
                images = outcome.images.len(),
                time_total = outcome.timings.time_total,
                "Generation completed",
            ),
            Err(e) => tracing::warn!(
                operation = request.operation.name(),
                prompt_id = trace.prompt_id.as_deref().unwrap_or(""),
                error = %e,
                "Generation failed",
            ),
        }

        let record = trace.into_record(&request, &result, started.elapsed());
        self.audit.record(record).await;
        result
    }

    async fn execute(
        &self,
        request: &GenerationRequest,
        trace: &mut RunTrace,
        started: Instant,
        deadline: Option<Instant>,
    ) -> Result<GenerationOutcome, PipelineError> {
        let prompt = validate_prompt(&request.prompt)?;
        validate_size(&request.options.size)?;
        for (kind, input) in request.operation.inputs() {
            validate_image_upload(kind.as_str(), &input.filename, &input.data)?;
        }

        let caps = request.capabilities;

        let enhanced_prompt = if caps.enhance_prompt {
            let enhance_started = Instant::now();
            let enhanced = self.enhance_prompt(request.operation.image(), prompt).await;
            trace.time_prompt_enhance = Some(round_secs(enhance_started.elapsed()));
            trace.enhanced_prompt = Some(enhanced.clone());
            Some(enhanced)
        } else {
            None
        };
        let full_prompt = styled_prompt(
            enhanced_prompt.as_deref().unwrap_or(prompt),
            request.style.as_deref(),
        );

        let store = self.storage.as_deref().filter(|_| caps.persist_to_storage);

        let mut input_image_url = None;
        let mut mask_image_url = None;
        if let Some(store) = store.filter(|_| caps.store_input_image) {
            for (kind, input) in request.operation.inputs() {
                let label = match kind {
                    AssetKind::Image => "input",
                    AssetKind::Mask => "mask",
                };
                let stored = self
                    .persist(
                        store,
                        &request.user_id,
                        &trace.run_id,
                        CATEGORY_INPUTS,
                        label,
                        0,
                        input.data.clone(),
                        mime_type_for(&input.filename),
                        caps.url_style,
                    )
                    .await;
                if let Some(stored) = stored {
                    trace.input_urls.push(stored.url.clone());
                    match kind {
                        AssetKind::Image => input_image_url = Some(stored.url),
                        AssetKind::Mask => mask_image_url = Some(stored.url),
                    }
                }
            }
        }

        let generation_started = Instant::now();
        let images = self
            .generate(&request.operation, &full_prompt, trace, &request.options, deadline)
            .await?;
        let time_generation = round_secs(generation_started.elapsed());
        trace.time_image_gen = Some(time_generation);

        let mut outputs = Vec::with_capacity(images.len());
        for (index, image) in images.into_iter().enumerate() {
            let storage = match store {
                Some(store) => {
                    self.persist(
                        store,
                        &request.user_id,
                        &trace.run_id,
                        CATEGORY_RESULTS,
                        RESULT_LABEL,
                        index,
                        image.data.clone(),
                        "image/png",
                        caps.url_style,
                    )
                    .await
                }
                None => None,
            };
            outputs.push(OutputImage {
                filename: image.filename().to_string(),
                size_bytes: image.data.len(),
                image_base64: caps.return_inline.then(|| image.to_base64()),
                storage,
            });
        }

        Ok(GenerationOutcome {
            prompt_id: trace.prompt_id.clone().unwrap_or_default(),
            seed: trace.seed,
            original_prompt: prompt.to_string(),
            enhanced_prompt,
            full_prompt,
            style: request.style.clone(),
            size: request.options.size.clone(),
            images: outputs,
            input_image_url,
            mask_image_url,
            timings: Timings {
                time_prompt_enhance: trace.time_prompt_enhance,
                time_generation,
                time_total: round_secs(started.elapsed()),
            },
        })
    }

    /// Upload → build → connect → submit → wait → fetch.
    async fn generate(
        &self,
        operation: &Operation,
        prompt: &str,
        trace: &mut RunTrace,
        options: &GenerationOptions,
        deadline: Option<Instant>,
    ) -> Result<Vec<GeneratedImage>, PipelineError> {
        let graph = self.build_graph(operation, prompt, trace.seed, options).await?;
        graph.validate()?;

        let watch = watch_config(self.config.watch, deadline, Instant::now());
        let watcher = CompletionWatcher::connect(&self.client, watch).await?;

        let submitted = self
            .api
            .submit_workflow(&graph, watcher.client_id())
            .await
            .map_err(PipelineError::Submission)?;
        let prompt_id = submitted.prompt_id;
        trace.prompt_id = Some(prompt_id.clone());

        tracing::info!(
            operation = operation.name(),
            prompt_id = %prompt_id,
            queue_number = submitted.number,
            seed = trace.seed,
            "Workflow submitted",
        );

        if let Err(e) = watcher.wait_for(&prompt_id).await {
            if matches!(e, WatchError::TimedOut { .. }) {
                self.cancel_quietly(&prompt_id).await;
            }
            return Err(e.into());
        }

        let images = fetch_generated_images(&self.api, &prompt_id).await?;
        if images.is_empty() {
            return Err(PipelineError::NoImages(prompt_id));
        }
        Ok(images)
    }

    async fn build_graph(
        &self,
        operation: &Operation,
        prompt: &str,
        seed: i64,
        options: &GenerationOptions,
    ) -> Result<WorkflowGraph, PipelineError> {
        let graph = match operation {
            Operation::ImageToImage { image } => {
                let image = self.upload(AssetKind::Image, image).await?;
                workflow::image_to_image(prompt, &image, Some(seed), options)
            }
            Operation::MaskedEdit { image, mask } => {
                let image = self.upload(AssetKind::Image, image).await?;
                let mask = self.upload(AssetKind::Mask, mask).await?;
                workflow::masked_edit(prompt, &image, &mask, Some(seed), options)
            }
        };
        Ok(graph)
    }

    async fn upload(&self, kind: AssetKind, input: &InputImage) -> Result<AssetHandle, PipelineError> {
        self.api
            .upload_image(input.data.clone(), &input.filename, kind)
            .await
            .map_err(|source| PipelineError::Upload {
                kind,
                filename: input.filename.clone(),
                source,
            })
    }

    /// Delete a timed-out prompt from the remote queue. Failures are logged.
    async fn cancel_quietly(&self, prompt_id: &str) {
        match self.api.cancel_execution(prompt_id).await {
            Ok(()) => tracing::info!(prompt_id, "Cancelled timed-out prompt"),
            Err(e) => tracing::warn!(prompt_id, error = %e, "Failed to cancel timed-out prompt"),
        }
    }

    async fn enhance_prompt(&self, image: &InputImage, prompt: &str) -> String {
        let Some(enhancer) = &self.enhancer else {
            tracing::debug!("Prompt enhancement requested but no enhancer is configured");
            return prompt.to_string();
        };

        match enhancer
            .enhance(&image.data, mime_type_for(&image.filename), prompt)
            .await
        {
            Ok(enhanced) => {
                tracing::debug!(enhanced = %enhanced, "Prompt enhanced");
                enhanced
            }
            Err(e) => {
                tracing::warn!(error = %e, "Prompt enhancement failed, using original prompt");
                prompt.to_string()
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist(
        &self,
        store: &dyn ObjectStore,
        user_id: &str,
        run_id: &str,
        category: &str,
        label: &str,
        index: usize,
        data: Vec<u8>,
        content_type: &str,
        url_style: UrlStyle,
    ) -> Option<StoredObject> {
        let file_name = unique_image_name(user_id, label, Utc::now(), run_id, index);
        let key = object_key(user_id, category, &file_name);

        match store.put(&key, data, content_type, url_style).await {
            Ok(stored) => Some(stored),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to persist image, continuing without it");
                None
            }
        }
    }
}

impl RunTrace {
    fn new(seed: i64) -> Self {
        Self {
            run_id: Uuid::new_v4().simple().to_string(),
            seed,
            prompt_id: None,
            enhanced_prompt: None,
            time_prompt_enhance: None,
            time_image_gen: None,
            input_urls: Vec::new(),
        }
    }

    fn into_record(
        self,
        request: &GenerationRequest,
        result: &Result<GenerationOutcome, PipelineError>,
        elapsed: Duration,
    ) -> AuditRecord {
        let input_images = if self.input_urls.is_empty() {
            request
                .operation
                .inputs()
                .into_iter()
                .map(|(_, input)| input.filename.clone())
                .collect()
        } else {
            self.input_urls
        };

        let (status, error, output_images) = match result {
            Ok(outcome) => (
                AuditStatus::Success,
                None,
                outcome
                    .images
                    .iter()
                    .map(|image| match &image.storage {
                        Some(stored) => stored.url.clone(),
                        None => image.filename.clone(),
                    })
                    .collect(),
            ),
            Err(e) => (AuditStatus::Error, Some(e.to_string()), Vec::new()),
        };

        AuditRecord {
            service: request.operation.name(),
            user_id: request.user_id.clone(),
            prompt: request.prompt.clone(),
            enhanced_prompt: self.enhanced_prompt,
            prompt_id: self.prompt_id,
            seed: self.seed,
            input_images,
            output_images,
            time_prompt_enhance: self.time_prompt_enhance,
            time_image_gen: self.time_image_gen,
            time_total: round_secs(elapsed),
            status,
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Shorten the completion wait so it ends by `deadline`.
fn watch_config(watch: WatchConfig, deadline: Option<Instant>, now: Instant) -> WatchConfig {
    match deadline {
        Some(deadline) => WatchConfig {
            deadline: watch.deadline.min(deadline.saturating_duration_since(now)),
            ..watch
        },
        None => watch,
    }
}

fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}
