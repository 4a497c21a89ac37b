//! ComfyUI WebSocket and REST client library.
//!
//! Implements the job submission and completion protocol against a
//! ComfyUI-compatible workflow server: asset upload, workflow graph
//! construction, prompt submission, completion watching over WebSocket,
//! and artifact retrieval from job history.

pub mod api;
pub mod client;
pub mod history;
pub mod messages;
pub mod watcher;
pub mod workflow;
