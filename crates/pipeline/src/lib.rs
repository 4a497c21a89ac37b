//! Generation pipeline: upload → build workflow → submit → wait → fetch,
//! with optional prompt enhancement, object-storage persistence, and an
//! audit record per run.
//!
//! One [`GenerationPipeline`] is built at startup and shared by every
//! request. Each run uses its own event-stream connection, so concurrent
//! runs never observe each other's events.

pub mod audit;
pub mod batch;
pub mod enhance;
pub mod error;
pub mod generation;
pub mod status;
pub mod storage;

pub use error::PipelineError;
pub use generation::{
    Capabilities, GenerationOutcome, GenerationPipeline, GenerationRequest, InputImage, Operation,
    PipelineConfig,
};
