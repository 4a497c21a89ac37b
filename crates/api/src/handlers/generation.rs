//! Handlers for the generation endpoints.
//!
//! Each handler parses its multipart form into a pipeline request; the
//! pipeline does all validation, so a rejected request never reaches the
//! workflow server.

use axum::extract::{Multipart, Path, State};
use axum::Json;
use imgate_pipeline::batch::{BatchOutcome, BatchRequest};
use imgate_pipeline::status::JobStatus;
use imgate_pipeline::{GenerationOutcome, GenerationRequest, Operation};
use serde::Serialize;

use crate::error::AppResult;
use crate::handlers::form::GenerationForm;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/img2img
///
/// Fields: `image` (file), `prompt`, optional `seed`, `style`, `size`,
/// `user_id`, and the capability flags.
pub async fn image_to_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<DataResponse<GenerationOutcome>>> {
    let mut form = GenerationForm::parse(multipart).await?;
    let image = form.take_file("image")?;
    let request = build_request(&state, &form, Operation::ImageToImage { image })?;

    let outcome = state.pipeline.run(request).await?;
    Ok(Json(DataResponse { data: outcome }))
}

/// POST /api/v1/mask-img2img
///
/// Like `img2img` plus a required `mask` file.
pub async fn masked_edit(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<DataResponse<GenerationOutcome>>> {
    let mut form = GenerationForm::parse(multipart).await?;
    let image = form.take_file("image")?;
    let mask = form.take_file("mask")?;
    let request = build_request(&state, &form, Operation::MaskedEdit { image, mask })?;

    let outcome = state.pipeline.run(request).await?;
    Ok(Json(DataResponse { data: outcome }))
}

/// POST /api/v1/batch-img2img
///
/// Repeated `images` files share one prompt; item `i` uses seed `seed + i`.
pub async fn batch_image_to_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<DataResponse<BatchOutcome>>> {
    let mut form = GenerationForm::parse(multipart).await?;
    let request = BatchRequest {
        images: form.take_files("images"),
        prompt: form.prompt(),
        seed: form.number("seed")?,
        style: form.style(),
        user_id: form.user_id(),
        options: form.options(),
        capabilities: form.capabilities(state.pipeline.has_storage())?,
    };

    let outcome = state.pipeline.run_batch(request).await?;
    Ok(Json(DataResponse { data: outcome }))
}

#[derive(Debug, Serialize)]
pub struct StatusImage {
    pub filename: String,
    pub size_bytes: usize,
    pub image_base64: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub prompt_id: String,
    pub status: &'static str,
    pub images: Vec<StatusImage>,
}

/// GET /api/v1/status/{prompt_id}
///
/// Reports `processing`, `completed` (with images), or `failed`.
pub async fn status(
    State(state): State<AppState>,
    Path(prompt_id): Path<String>,
) -> AppResult<Json<DataResponse<StatusResponse>>> {
    let status = state.pipeline.status(&prompt_id).await?;
    let label = status.as_str();

    let images = match status {
        JobStatus::Processing | JobStatus::Failed => Vec::new(),
        JobStatus::Completed(images) => images
            .iter()
            .map(|image| StatusImage {
                filename: image.filename().to_string(),
                size_bytes: image.data.len(),
                image_base64: image.to_base64(),
            })
            .collect(),
    };

    Ok(Json(DataResponse {
        data: StatusResponse {
            prompt_id,
            status: label,
            images,
        },
    }))
}

fn build_request(
    state: &AppState,
    form: &GenerationForm,
    operation: Operation,
) -> AppResult<GenerationRequest> {
    Ok(GenerationRequest {
        operation,
        prompt: form.prompt(),
        seed: form.number("seed")?,
        style: form.style(),
        user_id: form.user_id(),
        options: form.options(),
        capabilities: form.capabilities(state.pipeline.has_storage())?,
    })
}
