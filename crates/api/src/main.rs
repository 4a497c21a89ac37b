use std::net::SocketAddr;
use std::sync::Arc;

use imgate_comfyui::api::ComfyUIApi;
use imgate_comfyui::client::ComfyUIClient;
use imgate_pipeline::enhance::ChatCompletionsEnhancer;
use imgate_pipeline::storage::S3ObjectStore;
use imgate_pipeline::GenerationPipeline;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imgate_api::config::ServerConfig;
use imgate_api::router::build_app_router;
use imgate_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "imgate_api=debug,imgate_pipeline=debug,imgate_comfyui=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Workflow server ---
    let http = reqwest::Client::new();
    let api = ComfyUIApi::with_client(http.clone(), config.comfyui.api_url.clone());
    let client = match &config.comfyui.ws_url {
        Some(ws_url) => ComfyUIClient::new(ws_url.clone()),
        None => ComfyUIClient::from_api_url(&config.comfyui.api_url),
    };
    tracing::info!(
        api_url = %api.api_url(),
        ws_url = %client.ws_url(),
        completion_timeout_secs = config.comfyui.completion_timeout_secs,
        "Workflow server configured",
    );

    let mut pipeline = GenerationPipeline::new(api, client, config.comfyui.pipeline_config());

    // --- Object storage ---
    if let Some(storage) = &config.storage {
        let store = S3ObjectStore::from_env(
            storage.bucket.clone(),
            storage.endpoint_url.clone(),
            storage.public_base_url.clone(),
        )
        .await;
        tracing::info!(bucket = %store.bucket(), "Object storage enabled");
        pipeline = pipeline.with_storage(Arc::new(store));
    } else {
        tracing::info!("STORAGE_BUCKET not set, results will not be persisted");
    }

    // --- Prompt enhancer ---
    if let Some(enhancer) = &config.enhancer {
        let enhancer = ChatCompletionsEnhancer::new(
            http,
            &enhancer.api_url,
            enhancer.api_key.clone(),
            enhancer.model.clone(),
        );
        tracing::info!(model = %enhancer.model(), "Prompt enhancement enabled");
        pipeline = pipeline.with_enhancer(Arc::new(enhancer));
    }

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        pipeline: Arc::new(pipeline),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
