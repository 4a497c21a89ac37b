//! Prompt enhancement through a hosted multimodal chat model.
//!
//! The enhancer looks at the input image and rewrites the user's editing
//! prompt with concrete detail. It is an optional collaborator: when it
//! fails, the pipeline carries on with the original prompt.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Default model for [`ChatCompletionsEnhancer`].
pub const DEFAULT_ENHANCER_MODEL: &str = "gpt-4o";

const MAX_ENHANCED_TOKENS: u32 = 300;

#[derive(Debug, thiserror::Error)]
pub enum EnhanceError {
    #[error("Enhancer request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Enhancer API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Enhancer returned no content")]
    Empty,
}

/// Rewrites an editing prompt given the image it will be applied to.
#[async_trait]
pub trait PromptEnhancer: Send + Sync {
    async fn enhance(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<String, EnhanceError>;
}

/// Append the style suffix when a non-blank style is given.
pub fn styled_prompt(prompt: &str, style: Option<&str>) -> String {
    match style.map(str::trim).filter(|s| !s.is_empty()) {
        Some(style) => format!("{prompt} in a {style} style"),
        None => prompt.to_string(),
    }
}

fn enhancement_instruction(prompt: &str) -> String {
    format!(
        "Analyze this image and enhance this editing prompt: '{prompt}'. Provide a detailed, \
         enhanced prompt that includes specific details about the image's style, lighting, \
         composition, colors, and objects. Make the enhanced prompt suitable for image editing. \
         Return only the enhanced prompt without explanations."
    )
}

// --- OpenAI-compatible wire types ---

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// [`PromptEnhancer`] that calls an OpenAI-compatible `/chat/completions`
/// endpoint with the image inlined as a data URL.
pub struct ChatCompletionsEnhancer {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl ChatCompletionsEnhancer {
    /// * `api_url` - Base URL up to (not including) `/chat/completions`,
    ///   e.g. `https://api.openai.com/v1`.
    pub fn new(client: reqwest::Client, api_url: &str, api_key: String, model: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            model,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, image: &[u8], mime_type: &str, prompt: &str) -> ChatRequest<'_> {
        let data_url = format!("data:{mime_type};base64,{}", STANDARD.encode(image));
        ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: serde_json::json!([
                    {"type": "text", "text": enhancement_instruction(prompt)},
                    {"type": "image_url", "image_url": {"url": data_url}}
                ]),
            }],
            max_tokens: MAX_ENHANCED_TOKENS,
        }
    }
}

#[async_trait]
impl PromptEnhancer for ChatCompletionsEnhancer {
    async fn enhance(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
    ) -> Result<String, EnhanceError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&self.build_request(image, mime_type, prompt))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnhanceError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(EnhanceError::Empty)
    }
}
