//! Per-request audit records.

use async_trait::async_trait;
use imgate_core::types::Timestamp;
use serde::Serialize;

/// Tracing target the default sink writes to.
pub const AUDIT_TARGET: &str = "imgate::audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Error,
}

/// One record per pipeline run, written whether the run succeeded or not.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// Operation name, e.g. `img2img`.
    pub service: &'static str,
    pub user_id: String,
    pub prompt: String,
    pub enhanced_prompt: Option<String>,
    pub prompt_id: Option<String>,
    pub seed: i64,
    pub input_images: Vec<String>,
    pub output_images: Vec<String>,
    pub time_prompt_enhance: Option<f64>,
    pub time_image_gen: Option<f64>,
    pub time_total: f64,
    pub status: AuditStatus,
    pub error: Option<String>,
    pub timestamp: Timestamp,
}

/// Destination for audit records.
///
/// Recording is fire-and-forget from the pipeline's point of view: sinks
/// handle their own failures.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord);
}

/// Emits each record as a structured `tracing` event on [`AUDIT_TARGET`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) {
        let details = serde_json::to_string(&record).unwrap_or_default();
        match record.status {
            AuditStatus::Success => tracing::info!(
                target: AUDIT_TARGET,
                service = record.service,
                user_id = %record.user_id,
                prompt_id = record.prompt_id.as_deref().unwrap_or(""),
                time_total = record.time_total,
                record = %details,
                "Request completed",
            ),
            AuditStatus::Error => tracing::warn!(
                target: AUDIT_TARGET,
                service = record.service,
                user_id = %record.user_id,
                prompt_id = record.prompt_id.as_deref().unwrap_or(""),
                error = record.error.as_deref().unwrap_or(""),
                record = %details,
                "Request failed",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: AuditStatus) -> AuditRecord {
        AuditRecord {
            service: "img2img",
            user_id: "dev".into(),
            prompt: "make it blue".into(),
            enhanced_prompt: None,
            prompt_id: Some("p1".into()),
            seed: 42,
            input_images: vec!["in.png".into()],
            output_images: vec![],
            time_prompt_enhance: None,
            time_image_gen: Some(1.5),
            time_total: 2.0,
            status,
            error: None,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_value(record(AuditStatus::Error)).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["service"], "img2img");
        assert_eq!(json["seed"], 42);
    }

    #[tokio::test]
    async fn tracing_sink_accepts_both_outcomes() {
        TracingAuditSink.record(record(AuditStatus::Success)).await;
        TracingAuditSink.record(record(AuditStatus::Error)).await;
    }
}
