use std::sync::Arc;

use imgate_pipeline::GenerationPipeline;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: everything is behind `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration, loaded once at startup.
    pub config: Arc<ServerConfig>,
    /// Generation pipeline shared by every request.
    pub pipeline: Arc<GenerationPipeline>,
}
