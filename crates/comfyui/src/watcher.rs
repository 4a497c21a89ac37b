//! Completion watcher for a single submitted prompt.
//!
//! ComfyUI signals that a prompt has finished by sending an `executing`
//! message for that prompt with `node: null`. The watcher reads the event
//! stream until it sees that message, a transport failure, or its
//! deadline passes.
//!
//! ```text
//! connect    ──► Waiting ──► Done
//!                   │  ├───► TimedOut     (deadline passed)
//!                   │  ├───► StreamError  (transport failure / close)
//!                   │  └───► Failed       (execution_error for the prompt)
//!                   └─◄ foreign or non-terminal events
//! ```
//!
//! A watcher is single-use: [`CompletionWatcher::wait_for`] consumes it,
//! and the underlying connection is dropped (torn down) on every exit.

use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::client::{ComfyUIClient, ComfyUIStream};
use crate::messages::{parse_message, ComfyUIMessage};

/// Default overall wait for one prompt.
pub const DEFAULT_COMPLETION_TIMEOUT: Duration = Duration::from_secs(300);

/// Default per-message receive window. Expiry only yields to the deadline
/// check; it is not an error.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Timing parameters for a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    /// Wall-clock budget from connect to completion.
    pub deadline: Duration,
    /// Receive window per message.
    pub poll_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_COMPLETION_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Lifecycle of a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Waiting,
    Done,
    TimedOut,
    StreamError,
    Failed,
}

impl WatchState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WatchState::Done | WatchState::TimedOut | WatchState::StreamError | WatchState::Failed
        )
    }
}

/// Terminal failures reported by the watcher. None are retried here.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Timed out after {}s waiting for prompt {prompt_id}", .waited.as_secs())]
    TimedOut { prompt_id: String, waited: Duration },

    #[error("Event stream error: {0}")]
    Stream(String),

    #[error("Prompt {prompt_id} failed on node {node_id}: {message}")]
    ExecutionFailed {
        prompt_id: String,
        node_id: String,
        message: String,
    },
}

/// Watches one prompt's completion over a ComfyUI event stream.
///
/// Generic over the stream so tests can drive it with synthetic events;
/// production code uses [`ComfyUIStream`] via [`CompletionWatcher::connect`].
pub struct CompletionWatcher<S = ComfyUIStream> {
    stream: S,
    client_id: String,
    config: WatchConfig,
    started: Instant,
    state: WatchState,
}

impl CompletionWatcher<ComfyUIStream> {
    /// Open a fresh event-stream connection and arm the deadline.
    ///
    /// The connect itself counts against the deadline. Connect failures are
    /// reported as [`WatchError::Stream`].
    pub async fn connect(client: &ComfyUIClient, config: WatchConfig) -> Result<Self, WatchError> {
        let started = Instant::now();
        let conn = match tokio::time::timeout(config.deadline, client.connect()).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => return Err(WatchError::Stream(e.to_string())),
            Err(_) => {
                return Err(WatchError::Stream(format!(
                    "Timed out connecting to {}",
                    client.ws_url()
                )))
            }
        };

        Ok(Self {
            stream: conn.ws_stream,
            client_id: conn.client_id,
            config,
            started,
            state: WatchState::Waiting,
        })
    }
}

impl<S> CompletionWatcher<S>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    /// Wrap an already-open event stream. The deadline is armed now.
    pub fn from_stream(stream: S, client_id: String, config: WatchConfig) -> Self {
        Self {
            stream,
            client_id,
            config,
            started: Instant::now(),
            state: WatchState::Waiting,
        }
    }

    /// Correlation id this watcher's connection was opened with. Submit the
    /// prompt with the same id so its events are addressed here.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn state(&self) -> WatchState {
        self.state
    }

    /// Wait until `prompt_id` completes.
    ///
    /// Returns `Ok(())` on the terminal `executing` event. Events for other
    /// prompts, progress, previews, and unparseable frames are skipped.
    pub async fn wait_for(mut self, prompt_id: &str) -> Result<(), WatchError> {
        let deadline = self.started + self.config.deadline;

        loop {
            let now = Instant::now();
            if now >= deadline {
                self.state = WatchState::TimedOut;
                tracing::warn!(prompt_id, client_id = %self.client_id, "Completion wait timed out");
                return Err(WatchError::TimedOut {
                    prompt_id: prompt_id.to_string(),
                    waited: self.config.deadline,
                });
            }

            let window = self.config.poll_interval.min(deadline - now);
            let frame = match tokio::time::timeout(window, self.stream.next()).await {
                Err(_) => continue,
                Ok(frame) => frame,
            };

            let message = match frame {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(self.stream_failure(e.to_string())),
                None => return Err(self.stream_failure("event stream ended".into())),
            };

            match message {
                Message::Text(text) => match parse_message(&text) {
                    Ok(parsed) => {
                        if let Some(result) = self.observe(prompt_id, &parsed) {
                            return result;
                        }
                    }
                    Err(e) => {
                        tracing::trace!(error = %e, raw_message = %text, "Skipping unrecognised ComfyUI message");
                    }
                },
                Message::Binary(_) => {
                    // Preview images.
                    tracing::trace!(prompt_id, "Ignoring binary message");
                }
                Message::Close(frame) => {
                    return Err(self.stream_failure(format!("connection closed by server: {frame:?}")));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    /// Apply one parsed event. Returns `Some` once a terminal state is
    /// reached.
    fn observe(
        &mut self,
        prompt_id: &str,
        message: &ComfyUIMessage,
    ) -> Option<Result<(), WatchError>> {
        if self.state.is_terminal() {
            return None;
        }

        if message.is_completion_of(prompt_id) {
            self.state = WatchState::Done;
            tracing::debug!(
                prompt_id,
                elapsed_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Prompt completed",
            );
            return Some(Ok(()));
        }

        match message {
            ComfyUIMessage::ExecutionError(data) if data.prompt_id == prompt_id => {
                self.state = WatchState::Failed;
                tracing::error!(
                    prompt_id,
                    node_id = %data.node_id,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
                Some(Err(WatchError::ExecutionFailed {
                    prompt_id: prompt_id.to_string(),
                    node_id: data.node_id.clone(),
                    message: data.exception_message.clone(),
                }))
            }
            ComfyUIMessage::ExecutionInterrupted(data) if data.prompt_id == prompt_id => {
                self.state = WatchState::Failed;
                Some(Err(WatchError::ExecutionFailed {
                    prompt_id: prompt_id.to_string(),
                    node_id: String::new(),
                    message: "execution interrupted".into(),
                }))
            }
            ComfyUIMessage::Executing(data) if data.prompt_id == prompt_id => {
                tracing::debug!(prompt_id, node = ?data.node, "Executing node");
                None
            }
            ComfyUIMessage::Progress(data) if message.prompt_id() == Some(prompt_id) => {
                tracing::trace!(prompt_id, value = data.value, max = data.max, "Generation progress");
                None
            }
            _ => None,
        }
    }

    fn stream_failure(&mut self, reason: String) -> WatchError {
        self.state = WatchState::StreamError;
        tracing::warn!(client_id = %self.client_id, reason = %reason, "ComfyUI event stream failed");
        WatchError::Stream(reason)
    }
}
