//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (asset upload, workflow submission, queue
//! deletion, history retrieval, artifact download, liveness) using
//! [`reqwest`].

use imgate_core::types::AssetKind;
use imgate_core::validation::mime_type_for;
use serde::Deserialize;

use crate::history::{ArtifactRef, History};
use crate::workflow::WorkflowGraph;

/// HTTP client for a single ComfyUI instance.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Handle returned by `/upload/image` for a stored input asset.
///
/// Only meaningful to the ComfyUI server that issued it; it is never
/// deleted by this service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssetHandle {
    /// File name assigned by the server (may differ from the uploaded name).
    pub name: String,
    /// Sub-folder inside the server's input directory, usually empty.
    #[serde(default)]
    pub subfolder: String,
}

impl AssetHandle {
    /// The value a `LoadImage` node expects for its `image` input.
    pub fn workflow_reference(&self) -> String {
        if self.subfolder.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.subfolder, self.name)
        }
    }
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i32,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, decoding, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (shares its connection pool).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Base HTTP URL of the instance.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Upload an image or mask to the server's input directory.
    ///
    /// Sends the raw bytes as the multipart field `image` on
    /// `POST /upload/image`, tagged with a MIME type derived from the file
    /// extension. Returns the server-assigned [`AssetHandle`].
    pub async fn upload_image(
        &self,
        data: Vec<u8>,
        filename: &str,
        kind: AssetKind,
    ) -> Result<AssetHandle, ComfyUIApiError> {
        let size_bytes = data.len();
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(filename.to_string())
            .mime_str(mime_type_for(filename))?;
        let form = reqwest::multipart::Form::new().part("image", part);

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .send()
            .await?;

        let handle: AssetHandle = Self::parse_response(response).await?;
        tracing::debug!(
            kind = %kind,
            filename,
            size_bytes,
            asset = %handle.name,
            "Uploaded asset to ComfyUI",
        );
        Ok(handle)
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow graph and
    /// client ID. Events for the prompt are addressed to the WebSocket
    /// connection that registered the same client ID.
    pub async fn submit_workflow(
        &self,
        workflow: &WorkflowGraph,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Cancel a queued execution.
    ///
    /// Sends a `POST /queue` request asking ComfyUI to delete the
    /// specified prompt from the queue.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. The server answers
    /// with an empty object both for unknown prompts and for prompts
    /// that have not finished yet.
    pub async fn get_history(&self, prompt_id: &str) -> Result<History, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download the bytes of one produced artifact via `GET /view`.
    pub async fn view(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/view", self.api_url))
            .query(&[
                ("filename", artifact.filename.as_str()),
                ("subfolder", artifact.subfolder.as_str()),
                ("type", artifact.kind.as_str()),
            ])
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Liveness probe via `GET /system_stats`.
    ///
    /// Returns the raw stats document; any non-2xx status is an error.
    pub async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let api = ComfyUIApi::new("http://host:8188/".into());
        assert_eq!(api.api_url(), "http://host:8188");
    }

    #[test]
    fn handle_reference_includes_subfolder() {
        let plain = AssetHandle {
            name: "a.png".into(),
            subfolder: String::new(),
        };
        let nested = AssetHandle {
            name: "a.png".into(),
            subfolder: "clipspace".into(),
        };
        assert_eq!(plain.workflow_reference(), "a.png");
        assert_eq!(nested.workflow_reference(), "clipspace/a.png");
    }

    #[test]
    fn upload_response_parses_without_subfolder() {
        let handle: AssetHandle = serde_json::from_str(r#"{"name":"cat.png"}"#).unwrap();
        assert_eq!(handle.name, "cat.png");
        assert!(handle.subfolder.is_empty());
    }
}
