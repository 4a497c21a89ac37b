//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the event-stream URL for a single ComfyUI
//! instance. Call [`ComfyUIClient::connect`] to establish a live
//! [`ComfyUIConnection`] over WebSocket.

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The raw WebSocket stream type used for ComfyUI connections.
pub type ComfyUIStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI event stream.
///
/// Stores the WebSocket base URL. Create a [`ComfyUIConnection`] by
/// calling [`connect`](Self::connect).
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Unique client ID sent during the WebSocket handshake. Submitting a
    /// prompt with the same ID routes its events to this connection.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIClient {
    /// Create a new client.
    ///
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8188`.
    pub fn new(ws_url: String) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
        }
    }

    /// Derive the WebSocket base URL from the HTTP API URL
    /// (`http` → `ws`, `https` → `wss`).
    pub fn from_api_url(api_url: &str) -> Self {
        Self::new(ws_url_for(api_url))
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    ///
    /// Generates a unique `client_id` (UUID v4) and appends it as a
    /// query parameter so that ComfyUI can address messages back to
    /// this specific client.
    pub async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let url = format!("{}/ws?clientId={}", self.ws_url, client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::debug!(client_id = %client_id, "Connected to ComfyUI at {}", self.ws_url);

        Ok(ComfyUIConnection {
            client_id,
            ws_stream,
        })
    }
}

/// Map an HTTP base URL onto the matching WebSocket scheme.
pub fn ws_url_for(api_url: &str) -> String {
    let trimmed = api_url.trim_end_matches('/');
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        trimmed.to_string()
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_from_http() {
        assert_eq!(ws_url_for("http://host:8188"), "ws://host:8188");
        assert_eq!(ws_url_for("https://host/"), "wss://host");
        assert_eq!(ws_url_for("ws://already"), "ws://already");
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let client = ComfyUIClient::new("ws://127.0.0.1:1".into());
        let result = client.connect().await;
        assert!(matches!(result, Err(ComfyUIClientError::Connection(_))));
    }
}
