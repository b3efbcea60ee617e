//! Shared fixtures for the job integration tests.
//!
//! [`spawn_backend`] starts an in-process axum server that answers the
//! backend's HTTP endpoints, and [`ScriptedSource`] replaces the
//! WebSocket with channels the test pushes frames into.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::channel::mpsc as stream_mpsc;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use comfybot_comfyui::reconnect::ReconnectConfig;
use comfybot_comfyui::{ComfyUIApi, ComfyUIClientError, EventSource, Frame, FrameStream, Transport};
use comfybot_core::progress::ProgressSink;
use comfybot_core::types::BoxError;
use comfybot_jobs::{Dispatcher, JobConfig, JobTracker};

// ---------------------------------------------------------------------------
// HTTP backend double
// ---------------------------------------------------------------------------

/// What the fake backend answers.
pub struct BackendScript {
    pub prompt_id: String,
    /// When set, `POST /prompt` fails with this status and body.
    pub reject: Option<(StatusCode, String)>,
    /// `outputs` object stored in the prompt's history.
    pub outputs: Value,
    /// When false, the history document has no entry for the prompt.
    pub record_history: bool,
    /// Files served by `GET /view`, keyed by filename.
    pub files: HashMap<String, Vec<u8>>,
}

impl BackendScript {
    pub fn new(prompt_id: &str) -> Self {
        Self {
            prompt_id: prompt_id.to_string(),
            reject: None,
            outputs: json!({}),
            record_history: true,
            files: HashMap::new(),
        }
    }

    pub fn outputs(mut self, outputs: Value) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn file(mut self, filename: &str, data: &[u8]) -> Self {
        self.files.insert(filename.to_string(), data.to_vec());
        self
    }

    pub fn reject(mut self, status: StatusCode, body: &str) -> Self {
        self.reject = Some((status, body.to_string()));
        self
    }

    pub fn without_history(mut self) -> Self {
        self.record_history = false;
        self
    }
}

#[derive(Clone)]
struct BackendState {
    script: Arc<BackendScript>,
    submissions: mpsc::UnboundedSender<Value>,
    views: Arc<AtomicUsize>,
}

pub struct MockBackend {
    pub url: String,
    /// Every `POST /prompt` body, in arrival order.
    pub submissions: mpsc::UnboundedReceiver<Value>,
    /// Number of `GET /view` requests served.
    pub views: Arc<AtomicUsize>,
}

async fn submit(State(state): State<BackendState>, Json(body): Json<Value>) -> Response {
    let _ = state.submissions.send(body);
    match &state.script.reject {
        Some((status, message)) => (*status, message.clone()).into_response(),
        None => Json(json!({"prompt_id": state.script.prompt_id, "number": 0})).into_response(),
    }
}

async fn history(State(state): State<BackendState>, Path(prompt_id): Path<String>) -> Json<Value> {
    if state.script.record_history && prompt_id == state.script.prompt_id {
        Json(json!({ prompt_id: {"outputs": state.script.outputs} }))
    } else {
        Json(json!({}))
    }
}

async fn view(
    State(state): State<BackendState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.views.fetch_add(1, Ordering::SeqCst);
    let file = params
        .get("filename")
        .and_then(|name| state.script.files.get(name));
    match file {
        Some(data) => Bytes::from(data.clone()).into_response(),
        None => (StatusCode::NOT_FOUND, "file not found").into_response(),
    }
}

/// Start the fake backend and return its `http://` base URL.
pub async fn spawn_backend(script: BackendScript) -> MockBackend {
    let (tx, rx) = mpsc::unbounded_channel();
    let views = Arc::new(AtomicUsize::new(0));
    let state = BackendState {
        script: Arc::new(script),
        submissions: tx,
        views: Arc::clone(&views),
    };

    let app = Router::new()
        .route("/prompt", post(submit))
        .route("/history/{prompt_id}", get(history))
        .route("/view", get(view))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockBackend {
        url: format!("http://{addr}"),
        submissions: rx,
        views,
    }
}

// ---------------------------------------------------------------------------
// Event stream double
// ---------------------------------------------------------------------------

type SessionItem = Result<Frame, ComfyUIClientError>;

/// Event source whose sessions are fed by the test.
///
/// Each `open` pops the next queued session; with none queued it fails
/// like an unreachable backend.
#[derive(Default)]
pub struct ScriptedSource {
    sessions: Mutex<VecDeque<FrameStream>>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a session and return the handle that feeds it.
    pub fn push_session(&self) -> Session {
        let (tx, rx) = stream_mpsc::unbounded::<SessionItem>();
        self.sessions.lock().unwrap().push_back(rx.boxed());
        Session { tx }
    }
}

#[async_trait::async_trait]
impl EventSource for ScriptedSource {
    fn client_id(&self) -> &str {
        "test-client"
    }

    async fn open(&self) -> Result<FrameStream, ComfyUIClientError> {
        self.sessions
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ComfyUIClientError::Connection("no session scripted".into()))
    }
}

/// Sending half of one scripted session. Dropping it ends the session.
pub struct Session {
    tx: stream_mpsc::UnboundedSender<SessionItem>,
}

impl Session {
    pub fn send(&self, frame: Frame) {
        self.tx.unbounded_send(Ok(frame)).unwrap();
    }

    pub fn execution_start(&self, prompt_id: &str) {
        self.send(frames::execution_start(prompt_id));
    }

    pub fn progress(&self, value: i64, max: i64) {
        self.send(frames::progress(value, max));
    }

    pub fn preview(&self, payload: &[u8]) {
        self.send(frames::preview(payload));
    }

    pub fn finished(&self, prompt_id: &str) {
        self.send(frames::finished(prompt_id));
    }
}

pub mod frames {
    use super::*;

    pub fn text(value: Value) -> Frame {
        Frame::Text(value.to_string())
    }

    pub fn execution_start(prompt_id: &str) -> Frame {
        text(json!({"type": "execution_start", "data": {"prompt_id": prompt_id}}))
    }

    pub fn progress(value: i64, max: i64) -> Frame {
        text(json!({"type": "progress", "data": {"value": value, "max": max}}))
    }

    pub fn finished(prompt_id: &str) -> Frame {
        text(json!({"type": "executing", "data": {"node": null, "prompt_id": prompt_id}}))
    }

    /// Binary preview with the 8-byte event/format header.
    pub fn preview(payload: &[u8]) -> Frame {
        let mut data = vec![0, 0, 0, 1, 0, 0, 0, 2];
        data.extend_from_slice(payload);
        Frame::Binary(Bytes::from(data))
    }
}

pub fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        multiplier: 2.0,
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub backend: MockBackend,
    pub source: Arc<ScriptedSource>,
    pub transport: Arc<Transport>,
    pub dispatcher: Dispatcher,
}

/// Fake backend plus an (unstarted) transport over a scripted source.
pub async fn harness(script: BackendScript, config: JobConfig) -> Harness {
    let backend = spawn_backend(script).await;
    let source = ScriptedSource::new();
    let transport = Arc::new(Transport::new(source.clone(), fast_reconnect()));
    let dispatcher = Dispatcher::new(
        ComfyUIApi::new(&backend.url),
        Arc::clone(&transport),
        Arc::new(JobTracker::new()),
        config,
    );
    Harness {
        backend,
        source,
        transport,
        dispatcher,
    }
}

impl Harness {
    /// Queue a session, start the transport and wait until it is up.
    pub async fn connect(&self) -> Session {
        let session = self.source.push_session();
        self.transport.start();
        assert!(
            self.transport.wait_connected(Duration::from_secs(5)).await,
            "transport should connect"
        );
        session
    }

    /// Wait for the next prompt submission to reach the backend.
    pub async fn next_submission(&mut self) -> Value {
        tokio::time::timeout(Duration::from_secs(5), self.backend.submissions.recv())
            .await
            .expect("submission within timeout")
            .expect("backend alive")
    }
}

// ---------------------------------------------------------------------------
// Progress sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<(f32, Option<Bytes>)>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<(f32, Option<Bytes>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ProgressSink for RecordingSink {
    async fn on_progress(&self, fraction: f32, preview: Option<Bytes>) -> Result<(), BoxError> {
        self.calls.lock().unwrap().push((fraction, preview));
        Ok(())
    }
}
