//! Fake ComfyUI server for pipeline integration tests.
//!
//! Serves the HTTP endpoints the pipeline calls and a `/ws` event stream.
//! Events for a submitted prompt are sent only to the socket registered
//! under the `client_id` the prompt was submitted with, like the real
//! server does.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use imgate_comfyui::api::ComfyUIApi;
use imgate_comfyui::client::ComfyUIClient;
use imgate_pipeline::audit::{AuditRecord, AuditSink};
use imgate_pipeline::enhance::{EnhanceError, PromptEnhancer};
use imgate_pipeline::storage::{ObjectStore, StorageError, StoredObject, UrlStyle};
use imgate_pipeline::{GenerationPipeline, InputImage, PipelineConfig};

/// Minimal bytes that sniff as PNG.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR\0\0\0\x01\0\0\0\x01";

/// File name the fake server reports for every generated image.
pub const OUTPUT_FILENAME: &str = "out.png";

/// File name listed in history that `/view` answers with a 404.
pub const MISSING_FILENAME: &str = "missing.png";

/// Upload file names starting with this prefix are rejected with a 500.
pub const REJECTED_UPLOAD_PREFIX: &str = "bad";

pub fn png(name: &str) -> InputImage {
    InputImage::new(name, PNG_BYTES.to_vec())
}

// ---------------------------------------------------------------------------
// Fake server
// ---------------------------------------------------------------------------

/// What the fake server does after a prompt is submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Run the prompt and record one output image.
    Complete,
    /// Report progress but never finish.
    Hang,
    /// Finish with no image outputs.
    NoOutputs,
    /// Finish with two outputs, one of which cannot be downloaded.
    PartialOutputs,
    /// Finish with one output that cannot be downloaded.
    MissingOutputs,
    /// Report an `execution_error` for the prompt.
    Fail,
}

pub struct FakeState {
    pub behaviour: Mutex<Behaviour>,
    /// Bodies posted to `/prompt`, in order.
    pub prompts: Mutex<Vec<Value>>,
    /// File names posted to `/upload/image`.
    pub uploads: Mutex<Vec<String>>,
    /// Prompt ids posted to `/queue` for deletion.
    pub cancelled: Mutex<Vec<String>>,
    history: Mutex<HashMap<String, Value>>,
    sockets: Mutex<HashMap<String, mpsc::UnboundedSender<Message>>>,
    next_id: AtomicU64,
}

pub struct FakeComfy {
    pub addr: SocketAddr,
    pub state: Arc<FakeState>,
}

impl FakeComfy {
    pub async fn spawn(behaviour: Behaviour) -> Self {
        let state = Arc::new(FakeState {
            behaviour: Mutex::new(behaviour),
            prompts: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            history: Mutex::new(HashMap::new()),
            sockets: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        });

        let app = Router::new()
            .route("/upload/image", post(upload_image))
            .route("/prompt", post(submit_prompt))
            .route("/queue", post(delete_from_queue))
            .route("/history/{prompt_id}", get(history))
            .route("/view", get(view))
            .route("/system_stats", get(system_stats))
            .route("/ws", get(event_stream))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn api_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn pipeline(&self, config: PipelineConfig) -> GenerationPipeline {
        let api_url = self.api_url();
        GenerationPipeline::new(
            ComfyUIApi::new(api_url.clone()),
            ComfyUIClient::from_api_url(&api_url),
            config,
        )
    }

    pub fn set_behaviour(&self, behaviour: Behaviour) {
        *self.state.behaviour.lock().unwrap() = behaviour;
    }

    pub fn submitted(&self) -> Vec<Value> {
        self.state.prompts.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.state.uploads.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.state.cancelled.lock().unwrap().clone()
    }

    /// Seed of the `n`th submitted workflow's generation node.
    pub fn submitted_seed(&self, n: usize, node: &str) -> i64 {
        self.submitted()[n]["prompt"][node]["inputs"]["seed"]
            .as_i64()
            .unwrap()
    }
}

fn event(kind: &str, data: Value) -> Message {
    Message::Text(json!({ "type": kind, "data": data }).to_string().into())
}

async fn upload_image(State(state): State<Arc<FakeState>>, mut multipart: Multipart) -> Response {
    while let Ok(Some(field)) = multipart.next_field().await {
        if field.name() != Some("image") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        let _ = field.bytes().await;

        if filename.starts_with(REJECTED_UPLOAD_PREFIX) {
            return (StatusCode::INTERNAL_SERVER_ERROR, "upload rejected").into_response();
        }
        state.uploads.lock().unwrap().push(filename.clone());
        return Json(json!({ "name": filename, "subfolder": "", "type": "input" })).into_response();
    }
    (StatusCode::BAD_REQUEST, "missing image field").into_response()
}

async fn submit_prompt(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Response {
    let client_id = body["client_id"].as_str().unwrap_or_default().to_string();
    let number = state.next_id.fetch_add(1, Ordering::SeqCst);
    let prompt_id = format!("prompt-{number}");
    state.prompts.lock().unwrap().push(body);

    let behaviour = *state.behaviour.lock().unwrap();
    let artifact = |filename: &str| json!({ "filename": filename, "subfolder": "", "type": "output" });
    let outputs = match behaviour {
        Behaviour::NoOutputs | Behaviour::Fail => json!({}),
        Behaviour::PartialOutputs => json!({
            "9": { "images": [artifact(MISSING_FILENAME)] },
            "15": { "images": [artifact(OUTPUT_FILENAME)] }
        }),
        Behaviour::MissingOutputs => json!({ "15": { "images": [artifact(MISSING_FILENAME)] } }),
        Behaviour::Complete | Behaviour::Hang => json!({ "15": { "images": [artifact(OUTPUT_FILENAME)] } }),
    };
    let status = match behaviour {
        Behaviour::Fail => json!({ "status_str": "error", "completed": false }),
        _ => json!({ "status_str": "success", "completed": true }),
    };
    if behaviour != Behaviour::Hang {
        state
            .history
            .lock()
            .unwrap()
            .insert(prompt_id.clone(), json!({ "outputs": outputs, "status": status }));
    }

    let socket = state.sockets.lock().unwrap().get(&client_id).cloned();
    if let Some(tx) = socket {
        let mut events = vec![
            event("execution_start", json!({ "prompt_id": prompt_id })),
            // Another client's prompt finishing must not end this wait.
            event("executing", json!({ "node": null, "prompt_id": "someone-else" })),
            event("executing", json!({ "node": "10", "prompt_id": prompt_id })),
            event("progress", json!({ "value": 1, "max": 2, "prompt_id": prompt_id, "node": "10" })),
            Message::Binary(vec![1u8, 2, 3].into()),
        ];
        match behaviour {
            Behaviour::Complete
            | Behaviour::NoOutputs
            | Behaviour::PartialOutputs
            | Behaviour::MissingOutputs => {
                events.push(event("executing", json!({ "node": null, "prompt_id": prompt_id })));
            }
            Behaviour::Fail => events.push(event(
                "execution_error",
                json!({
                    "prompt_id": prompt_id,
                    "node_id": "10",
                    "exception_message": "content policy violation",
                    "exception_type": "ValueError"
                }),
            )),
            Behaviour::Hang => {}
        }
        for message in events {
            let _ = tx.send(message);
        }
    }

    Json(json!({ "prompt_id": prompt_id, "number": number, "node_errors": {} })).into_response()
}

async fn delete_from_queue(State(state): State<Arc<FakeState>>, Json(body): Json<Value>) -> Json<Value> {
    if let Some(ids) = body["delete"].as_array() {
        let mut cancelled = state.cancelled.lock().unwrap();
        cancelled.extend(ids.iter().filter_map(|id| id.as_str().map(String::from)));
    }
    Json(json!({}))
}

async fn history(State(state): State<Arc<FakeState>>, Path(prompt_id): Path<String>) -> Json<Value> {
    let mut body = serde_json::Map::new();
    if let Some(entry) = state.history.lock().unwrap().get(&prompt_id) {
        body.insert(prompt_id, entry.clone());
    }
    Json(Value::Object(body))
}

async fn view(Query(params): Query<HashMap<String, String>>) -> Response {
    if params.get("filename").map(String::as_str) == Some(OUTPUT_FILENAME) {
        PNG_BYTES.to_vec().into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn system_stats() -> Json<Value> {
    Json(json!({ "system": { "os": "posix", "comfyui_version": "test" }, "devices": [] }))
}

/// Register the socket's sender before the upgrade completes, so a prompt
/// submitted right after the handshake already has somewhere to go.
async fn event_stream(
    State(state): State<Arc<FakeState>>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let client_id = params.get("clientId").cloned().unwrap_or_default();
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(event(
        "status",
        json!({ "status": { "exec_info": { "queue_remaining": 0 } }, "sid": client_id }),
    ));
    state.sockets.lock().unwrap().insert(client_id, tx);
    ws.on_upgrade(move |socket| forward_events(socket, rx))
}

async fn forward_events(mut socket: WebSocket, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        if socket.send(message).await.is_err() {
            break;
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator doubles
// ---------------------------------------------------------------------------

/// In-memory object store.
#[derive(Default)]
pub struct MemoryStore {
    pub objects: Mutex<Vec<(String, usize, String)>>,
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
        url_style: UrlStyle,
    ) -> Result<StoredObject, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .push((key.to_string(), data.len(), content_type.to_string()));
        let url = match url_style {
            UrlStyle::Signed { expires_in } => {
                format!("https://store.test/{key}?expires={}", expires_in.as_secs())
            }
            UrlStyle::Public => format!("https://store.test/{key}"),
        };
        Ok(StoredObject {
            key: key.to_string(),
            url,
        })
    }
}

/// Object store that rejects every write.
pub struct BrokenStore;

#[async_trait]
impl ObjectStore for BrokenStore {
    async fn put(
        &self,
        key: &str,
        _data: Vec<u8>,
        _content_type: &str,
        _url_style: UrlStyle,
    ) -> Result<StoredObject, StorageError> {
        Err(StorageError::Upload {
            key: key.to_string(),
            message: "bucket unavailable".into(),
        })
    }
}

/// Enhancer that prefixes the prompt, or always fails.
pub struct StubEnhancer {
    pub fail: bool,
}

#[async_trait]
impl PromptEnhancer for StubEnhancer {
    async fn enhance(
        &self,
        _image: &[u8],
        _mime_type: &str,
        prompt: &str,
    ) -> Result<String, EnhanceError> {
        if self.fail {
            Err(EnhanceError::Empty)
        } else {
            Ok(format!("detailed {prompt}"))
        }
    }
}

/// Audit sink that keeps every record.
#[derive(Default)]
pub struct RecordingSink {
    pub records: Mutex<Vec<AuditRecord>>,
}

#[async_trait]
impl AuditSink for RecordingSink {
    async fn record(&self, record: AuditRecord) {
        self.records.lock().unwrap().push(record);
    }
}
