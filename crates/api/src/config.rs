use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use imgate_comfyui::watcher::WatchConfig;
use imgate_pipeline::enhance::DEFAULT_ENHANCER_MODEL;
use imgate_pipeline::status::NotFoundPolicy;
use imgate_pipeline::PipelineConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development against a
/// ComfyUI instance on `127.0.0.1:8188`. Storage and prompt enhancement are
/// only enabled when their env vars are set.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `360`). Must exceed both
    /// the completion and batch timeouts so the pipeline can report its own
    /// timeouts.
    pub request_timeout_secs: u64,
    /// Maximum request body size in bytes (default: 100 MiB).
    pub max_body_bytes: usize,
    pub comfyui: ComfyUIConfig,
    pub storage: Option<StorageConfig>,
    pub enhancer: Option<EnhancerConfig>,
}

/// Workflow server connection and pipeline tunables.
#[derive(Debug, Clone)]
pub struct ComfyUIConfig {
    /// HTTP base URL, e.g. `http://127.0.0.1:8188`.
    pub api_url: String,
    /// WebSocket base URL. Derived from `api_url` when unset.
    pub ws_url: Option<String>,
    pub completion_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub not_found_policy: NotFoundPolicy,
    pub batch_concurrency: usize,
    /// Overall budget for one batch request.
    pub batch_timeout_secs: u64,
}

/// S3-compatible bucket for persisted inputs and results. Credentials come
/// from the AWS SDK default chain.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub bucket: String,
    pub endpoint_url: Option<String>,
    pub public_base_url: Option<String>,
}

/// OpenAI-compatible chat endpoint used to enhance prompts.
#[derive(Debug, Clone)]
pub struct EnhancerConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                     |
    /// |-----------------------------------|-----------------------------|
    /// | `HOST`                            | `0.0.0.0`                   |
    /// | `PORT`                            | `8000`                      |
    /// | `CORS_ORIGINS`                    | `http://localhost:3000`     |
    /// | `REQUEST_TIMEOUT_SECS`            | `360`                       |
    /// | `MAX_BODY_MB`                     | `100`                       |
    /// | `COMFYUI_API_URL`                 | `http://127.0.0.1:8188`     |
    /// | `COMFYUI_WS_URL`                  | derived from API URL        |
    /// | `COMFYUI_COMPLETION_TIMEOUT_SECS` | `300`                       |
    /// | `COMFYUI_POLL_INTERVAL_MS`        | `1000`                      |
    /// | `COMFYUI_NOT_FOUND_POLICY`        | `processing`                |
    /// | `BATCH_CONCURRENCY`               | `1`                         |
    /// | `BATCH_TIMEOUT_SECS`              | `330`                       |
    /// | `STORAGE_BUCKET`                  | unset (storage disabled)    |
    /// | `STORAGE_ENDPOINT_URL`            | unset (AWS S3)              |
    /// | `STORAGE_PUBLIC_BASE_URL`         | unset                       |
    /// | `ENHANCER_API_KEY`                | unset (enhancer disabled)   |
    /// | `ENHANCER_API_URL`                | `https://api.openai.com/v1` |
    /// | `ENHANCER_MODEL`                  | `gpt-4o`                    |
    ///
    /// Panics on malformed values or inconsistent timeouts.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = parse_var("PORT", "8000");
        let cors_origins =
            split_origins(&std::env::var("CORS_ORIGINS").unwrap_or_else(|_| "http://localhost:3000".into()));
        let request_timeout_secs: u64 = parse_var("REQUEST_TIMEOUT_SECS", "360");
        let max_body_mb: usize = parse_var("MAX_BODY_MB", "100");

        let comfyui = ComfyUIConfig {
            api_url: std::env::var("COMFYUI_API_URL").unwrap_or_else(|_| "http://127.0.0.1:8188".into()),
            ws_url: optional_var("COMFYUI_WS_URL"),
            completion_timeout_secs: parse_var("COMFYUI_COMPLETION_TIMEOUT_SECS", "300"),
            poll_interval_ms: parse_var("COMFYUI_POLL_INTERVAL_MS", "1000"),
            not_found_policy: parse_var("COMFYUI_NOT_FOUND_POLICY", "processing"),
            batch_concurrency: parse_var("BATCH_CONCURRENCY", "1"),
            batch_timeout_secs: parse_var("BATCH_TIMEOUT_SECS", "330"),
        };

        let storage = optional_var("STORAGE_BUCKET").map(|bucket| StorageConfig {
            bucket,
            endpoint_url: optional_var("STORAGE_ENDPOINT_URL"),
            public_base_url: optional_var("STORAGE_PUBLIC_BASE_URL"),
        });

        let enhancer = optional_var("ENHANCER_API_KEY").map(|api_key| EnhancerConfig {
            api_url: std::env::var("ENHANCER_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            api_key,
            model: std::env::var("ENHANCER_MODEL").unwrap_or_else(|_| DEFAULT_ENHANCER_MODEL.into()),
        });

        let config = Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            max_body_bytes: max_body_mb * 1024 * 1024,
            comfyui,
            storage,
            enhancer,
        };
        config
            .validate()
            .unwrap_or_else(|e| panic!("Invalid configuration: {e}"));
        config
    }

    /// Check that the HTTP timeout outlasts every pipeline deadline.
    pub fn validate(&self) -> Result<(), String> {
        let request = self.request_timeout_secs;
        if request <= self.comfyui.completion_timeout_secs {
            return Err(format!(
                "REQUEST_TIMEOUT_SECS ({request}) must be greater than \
                 COMFYUI_COMPLETION_TIMEOUT_SECS ({})",
                self.comfyui.completion_timeout_secs
            ));
        }
        if request <= self.comfyui.batch_timeout_secs {
            return Err(format!(
                "REQUEST_TIMEOUT_SECS ({request}) must be greater than BATCH_TIMEOUT_SECS ({})",
                self.comfyui.batch_timeout_secs
            ));
        }
        Ok(())
    }
}

impl ComfyUIConfig {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            watch: WatchConfig {
                deadline: Duration::from_secs(self.completion_timeout_secs),
                poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            },
            not_found_policy: self.not_found_policy,
            batch_concurrency: self.batch_concurrency.max(1),
            batch_deadline: Duration::from_secs(self.batch_timeout_secs),
        }
    }
}

/// Parse `name`, falling back to `default`. Panics on malformed values so
/// misconfiguration fails at startup.
fn parse_var<T>(name: &str, default: &str) -> T
where
    T: FromStr,
    T::Err: Display,
{
    let raw = std::env::var(name).unwrap_or_else(|_| default.into());
    raw.parse()
        .unwrap_or_else(|e| panic!("{name} has an invalid value '{raw}': {e}"))
}

/// Read `name`, treating an empty value as unset.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
