//! In-process docket server stand-in for integration tests.
//!
//! One axum app serves the WebSocket endpoint plus the two REST routes the
//! sync engine calls. Tests drive it directly: push frames (well-formed or
//! garbage), observe the client commands that arrive over the socket, kill
//! every connection to force a reconnect, and script write rejections.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, Notify};

use docket_protocol::{
    new_id, wire_now, CaseKind, CaseRecord, CaseStatus, ClientCommand, Envelope, ExtractedField,
    FieldSnapshot,
};

pub struct TestHub {
    addr: SocketAddr,
    state: Arc<HubState>,
    cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
}

struct HubState {
    frames: broadcast::Sender<String>,
    cmd_tx: mpsc::UnboundedSender<ClientCommand>,
    drop_all: Notify,
    cases: Mutex<HashMap<String, CaseRecord>>,
    reject_writes: AtomicBool,
}

impl TestHub {
    pub async fn start() -> TestHub {
        let (frames, _) = broadcast::channel(64);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let state = Arc::new(HubState {
            frames,
            cmd_tx,
            drop_all: Notify::new(),
            cases: Mutex::new(HashMap::new()),
            reject_writes: AtomicBool::new(false),
        });

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/cases/{id}", get(get_case))
            .route("/api/cases/{id}/fields/{field_id}", put(put_field))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test hub");
        let addr = listener.local_addr().expect("test hub local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        TestHub {
            addr,
            state,
            cmd_rx,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn api_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Broadcast an envelope to every connected client.
    pub fn push(&self, envelope: &Envelope) {
        let json = serde_json::to_string(envelope).expect("serialize envelope");
        let _ = self.state.frames.send(json);
    }

    /// Broadcast an arbitrary text frame, valid or not.
    pub fn push_raw(&self, raw: &str) {
        let _ = self.state.frames.send(raw.to_string());
    }

    /// Next client command observed on any connection, or `None` if nothing
    /// arrives within `wait`.
    pub async fn next_command(&mut self, wait: Duration) -> Option<ClientCommand> {
        tokio::time::timeout(wait, self.cmd_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Kill every live connection without a close handshake.
    pub fn drop_connections(&self) {
        self.state.drop_all.notify_waiters();
    }

    pub fn insert_case(&self, case: CaseRecord) {
        self.state
            .cases
            .lock()
            .unwrap()
            .insert(case.id.clone(), case);
    }

    pub fn case(&self, case_id: &str) -> Option<CaseRecord> {
        self.state.cases.lock().unwrap().get(case_id).cloned()
    }

    /// When set, every field write fails with 422 "value out of range".
    pub fn set_reject_writes(&self, reject: bool) {
        self.state.reject_writes.store(reject, Ordering::SeqCst);
    }
}

async fn ws_handler(State(state): State<Arc<HubState>>, ws: WebSocketUpgrade) -> Response {
    // Subscribe before the 101 goes out, so a frame pushed the instant the
    // client observes the connection cannot be lost.
    let frames = state.frames.subscribe();
    ws.on_upgrade(move |socket| serve_socket(socket, frames, state))
}

async fn serve_socket(
    mut socket: WebSocket,
    mut frames: broadcast::Receiver<String>,
    state: Arc<HubState>,
) {
    let dropped = state.drop_all.notified();
    tokio::pin!(dropped);
    loop {
        tokio::select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(command) = serde_json::from_str::<ClientCommand>(text.as_str()) {
                        let _ = state.cmd_tx.send(command);
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(_)) => break,
            },
            frame = frames.recv() => match frame {
                Ok(json) => {
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            // Abrupt drop, like a server crash
            _ = &mut dropped => break,
        }
    }
}

async fn get_case(State(state): State<Arc<HubState>>, Path(id): Path<String>) -> Response {
    let cases = state.cases.lock().unwrap();
    match cases.get(&id) {
        Some(case) => Json(case.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("case {id} not found") })),
        )
            .into_response(),
    }
}

async fn put_field(
    State(state): State<Arc<HubState>>,
    Path((case_id, field_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    if state.reject_writes.load(Ordering::SeqCst) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "value out of range" })),
        )
            .into_response();
    }

    let value = body.get("value").cloned().unwrap_or(Value::Null);
    let mut cases = state.cases.lock().unwrap();
    let Some(case) = cases.get_mut(&case_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("case {case_id} not found") })),
        )
            .into_response();
    };
    let Some(field) = case.field_mut(&field_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("field {field_id} not found") })),
        )
            .into_response();
    };
    field.value = value.clone();

    let snapshot = FieldSnapshot {
        edit_id: new_id(),
        case_id,
        field_id,
        value,
        committed_at: wire_now(),
    };
    Json(snapshot).into_response()
}

/// A review-stage invoice case with a single editable amount field.
pub fn invoice_case(id: &str, amount: i64) -> CaseRecord {
    CaseRecord {
        id: id.to_string(),
        title: format!("Invoice {id}"),
        kind: CaseKind::Invoice,
        status: CaseStatus::Review,
        documents: Vec::new(),
        fields: vec![ExtractedField {
            id: "amount".to_string(),
            label: "Amount".to_string(),
            value: json!(amount),
            confidence: 0.91,
            manually_edited: false,
            original_value: None,
            edits: Vec::new(),
        }],
        rules: Vec::new(),
        decision: None,
        created_at: wire_now(),
        updated_at: wire_now(),
    }
}
