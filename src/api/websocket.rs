//! `/ws/cc-stream` — the job control and progress socket.
//!
//! Connection lifecycle:
//! 1. Client connects and sends control messages (`start_job`,
//!    `abort_job`, `resume_job`, `get_status`, `start_generation`).
//! 2. The connection subscribes to the hub channels of the jobs it
//!    touches; a forwarder task copies hub messages to the socket.
//! 3. The hub drops this connection's observers if the socket cannot
//!    keep up (bounded buffer); workers never block on it.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::core_state::{spawn_generation_worker, spawn_job_worker, CoreState};
use crate::pipeline::controller::{create_job, NewJobParams};
use crate::stream::{StreamMessage, GENERATION_CHANNEL};

use super::types::job_status_json;

/// Outbound buffer between the connection logic and the socket writer.
const OUTBOUND_BUFFER: usize = 64;

/// Client→server control messages.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    StartJob {
        text: String,
        #[serde(default)]
        custom_instructions: Option<String>,
        #[serde(default)]
        audience_parameters: Option<String>,
        #[serde(default)]
        rigor_level: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    AbortJob { job_id: String },
    #[serde(rename_all = "camelCase")]
    ResumeJob { job_id: String },
    #[serde(rename_all = "camelCase")]
    GetStatus { job_id: String },
    #[serde(rename_all = "camelCase")]
    StartGeneration { instructions: String },
}

pub async fn cc_stream_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<CoreState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_cc_stream(socket, state))
}

async fn handle_cc_stream(socket: WebSocket, state: Arc<CoreState>) {
    let (ws_sink, mut ws_stream) = socket.split();
    let (tx, rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    // Writer task: drains the outbound buffer into the socket.
    let writer = tokio::spawn(async move {
        let mut sink = ws_sink;
        let mut rx = rx;
        while let Some(json) = rx.recv().await {
            if sink.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut forwarders: Vec<JoinHandle<()>> = Vec::new();

    while let Some(incoming) = ws_stream.next().await {
        match incoming {
            Ok(Message::Text(ref text)) => {
                handle_client_message(&state, text, &tx, &mut forwarders).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    drop(tx);
    let _ = writer.await;
    for forwarder in forwarders {
        forwarder.abort();
    }
    tracing::debug!("cc-stream connection closed");
}

/// Subscribe this connection to a hub channel and forward its messages
/// out. Dropping the receiver (connection gone) ends the task; the hub
/// prunes the dead observer on its next broadcast.
fn watch_channel(state: &CoreState, channel: &str, tx: mpsc::Sender<String>) -> JoinHandle<()> {
    let (_, mut rx) = state.hub.subscribe(channel);
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let Ok(json) = serde_json::to_string(&message) else {
                continue;
            };
            if tx.send(json).await.is_err() {
                break;
            }
        }
    })
}

async fn send_error(tx: &mpsc::Sender<String>, message: String) {
    let envelope = StreamMessage::Error { message };
    if let Ok(json) = serde_json::to_string(&envelope) {
        let _ = tx.send(json).await;
    }
}

pub(crate) async fn handle_client_message(
    state: &Arc<CoreState>,
    text: &str,
    tx: &mpsc::Sender<String>,
    forwarders: &mut Vec<JoinHandle<()>>,
) {
    let parsed: Result<ClientMessage, _> = serde_json::from_str(text);
    let message = match parsed {
        Ok(message) => message,
        Err(e) => {
            send_error(tx, format!("unrecognized message: {e}")).await;
            return;
        }
    };

    match message {
        ClientMessage::StartJob {
            text,
            custom_instructions,
            audience_parameters,
            rigor_level,
        } => {
            let conn = match state.open_db() {
                Ok(conn) => conn,
                Err(e) => {
                    send_error(tx, format!("database unavailable: {e}")).await;
                    return;
                }
            };
            let params = NewJobParams {
                text,
                instructions: custom_instructions,
                audience: audience_parameters,
                rigor: rigor_level,
            };
            match create_job(&conn, &params) {
                Ok(job) => {
                    // Subscribe before the worker starts so job_started
                    // is never missed.
                    forwarders.push(watch_channel(state, &job.id, tx.clone()));
                    spawn_job_worker(state.clone(), job.id);
                }
                Err(e) => send_error(tx, e.to_string()).await,
            }
        }

        ClientMessage::AbortJob { job_id } => {
            if !state.registry.request_abort(&job_id) {
                send_error(tx, format!("job {job_id} is not running")).await;
            }
            // The worker emits job_aborted at the next chunk boundary.
        }

        ClientMessage::ResumeJob { job_id } => {
            if state.registry.is_running(&job_id) {
                send_error(tx, format!("job {job_id} is already running")).await;
                return;
            }
            forwarders.push(watch_channel(state, &job_id, tx.clone()));
            spawn_job_worker(state.clone(), job_id);
        }

        ClientMessage::GetStatus { job_id } => {
            let status = state
                .open_db()
                .map_err(|e| e.to_string())
                .and_then(|conn| job_status_json(&conn, &job_id).map_err(|e| e.to_string()));
            match status {
                Ok(snapshot) => {
                    let _ = tx.send(snapshot.to_string()).await;
                }
                Err(e) => send_error(tx, e).await,
            }
        }

        ClientMessage::StartGeneration { instructions } => {
            forwarders.push(watch_channel(state, GENERATION_CHANNEL, tx.clone()));
            spawn_generation_worker(state.clone(), instructions);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::config::PacingConfig;
    use crate::llm::{Completion, CompletionClient, CompletionRequest, LlmError, StopReason};

    fn salted_words(n: usize, salt: u32) -> String {
        (0..n).map(|i| format!("s{salt}w{i}")).collect::<Vec<_>>().join(" ")
    }

    /// Stub that answers skeleton prompts with a fixed outline and
    /// everything else with on-target prose.
    struct StubLlm {
        calls: AtomicU32,
    }

    impl StubLlm {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }
    }

    impl CompletionClient for StubLlm {
        fn complete(&self, req: &CompletionRequest<'_>) -> Result<Completion, LlmError> {
            let salt = self.calls.fetch_add(1, Ordering::SeqCst);
            if req.prompt.contains("SOURCE DOCUMENT") {
                Ok(Completion::new(
                    r#"```json
{"sections": [{"id": 0, "title": "Whole", "claims": [], "target_words": 600, "terms": [], "related": []}]}
```"#,
                    StopReason::EndTurn,
                ))
            } else {
                let requested = (req.max_tokens / 2) as usize;
                Ok(Completion::new(
                    salted_words(requested.max(1), salt),
                    StopReason::EndTurn,
                ))
            }
        }
    }

    fn test_state() -> Arc<CoreState> {
        Arc::new(CoreState::with_parts(
            std::env::temp_dir().join(format!("reweave-ws-test-{}.db", uuid::Uuid::new_v4())),
            Arc::new(StubLlm::new()),
            PacingConfig::disabled(),
        ))
    }

    async fn recv_json(
        rx: &mut mpsc::Receiver<String>,
        timeout: Duration,
    ) -> Option<serde_json::Value> {
        tokio::time::timeout(timeout, rx.recv())
            .await
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str(&raw).ok())
    }

    #[tokio::test]
    async fn malformed_message_yields_error_envelope() {
        let state = test_state();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
        let mut forwarders = Vec::new();

        handle_client_message(&state, "this is not json", &tx, &mut forwarders).await;

        let msg = recv_json(&mut rx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(msg["type"], "error");
        let _ = std::fs::remove_file(&state.db_path);
    }

    #[tokio::test]
    async fn undersized_input_is_rejected_before_job_creation() {
        let state = test_state();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
        let mut forwarders = Vec::new();

        let request = serde_json::json!({
            "type": "start_job",
            "text": "too short",
        });
        handle_client_message(&state, &request.to_string(), &tx, &mut forwarders).await;

        let msg = recv_json(&mut rx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(msg["type"], "error");
        assert!(msg["message"].as_str().unwrap().contains("501"));
        assert!(forwarders.is_empty());
        let _ = std::fs::remove_file(&state.db_path);
    }

    #[tokio::test]
    async fn start_job_streams_to_completion() {
        let state = test_state();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
        let mut forwarders = Vec::new();

        let text = (0..600).map(|i| format!("in{i}")).collect::<Vec<_>>().join(" ");
        let request = serde_json::json!({"type": "start_job", "text": text});
        handle_client_message(&state, &request.to_string(), &tx, &mut forwarders).await;

        let mut seen_types = Vec::new();
        for _ in 0..32 {
            let Some(msg) = recv_json(&mut rx, Duration::from_secs(5)).await else {
                break;
            };
            let kind = msg["type"].as_str().unwrap_or_default().to_string();
            seen_types.push(kind.clone());
            if kind == "job_complete" || kind == "job_failed" {
                break;
            }
        }

        assert!(seen_types.contains(&"job_started".to_string()), "got {seen_types:?}");
        assert!(seen_types.contains(&"outline".to_string()));
        assert!(seen_types.contains(&"chunk_complete".to_string()));
        assert_eq!(seen_types.last().map(String::as_str), Some("job_complete"));
        let _ = std::fs::remove_file(&state.db_path);
    }

    #[tokio::test]
    async fn abort_of_idle_job_reports_error() {
        let state = test_state();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
        let mut forwarders = Vec::new();

        let request = serde_json::json!({"type": "abort_job", "jobId": "nope"});
        handle_client_message(&state, &request.to_string(), &tx, &mut forwarders).await;

        let msg = recv_json(&mut rx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(msg["type"], "error");
        assert!(msg["message"].as_str().unwrap().contains("not running"));
        let _ = std::fs::remove_file(&state.db_path);
    }

    #[tokio::test]
    async fn resume_of_running_job_is_rejected() {
        let state = test_state();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
        let mut forwarders = Vec::new();

        let _flag = state.registry.try_register("busy-job").unwrap();
        let request = serde_json::json!({"type": "resume_job", "jobId": "busy-job"});
        handle_client_message(&state, &request.to_string(), &tx, &mut forwarders).await;

        let msg = recv_json(&mut rx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(msg["type"], "error");
        assert!(msg["message"].as_str().unwrap().contains("already running"));
        let _ = std::fs::remove_file(&state.db_path);
    }

    #[tokio::test]
    async fn get_status_returns_snapshot() {
        let state = test_state();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
        let mut forwarders = Vec::new();

        // Seed a job directly.
        let conn = state.open_db().unwrap();
        let text = (0..600).map(|i| format!("in{i}")).collect::<Vec<_>>().join(" ");
        let job = create_job(
            &conn,
            &NewJobParams {
                text,
                ..Default::default()
            },
        )
        .unwrap();
        drop(conn);

        let request = serde_json::json!({"type": "get_status", "jobId": job.id});
        handle_client_message(&state, &request.to_string(), &tx, &mut forwarders).await;

        let msg = recv_json(&mut rx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(msg["type"], "status");
        assert_eq!(msg["jobId"], serde_json::Value::String(job.id));
        assert_eq!(msg["status"], "pending");
        let _ = std::fs::remove_file(&state.db_path);
    }

    #[tokio::test]
    async fn start_generation_streams_sections() {
        let state = test_state();
        let (tx, mut rx) = mpsc::channel(OUTBOUND_BUFFER);
        let mut forwarders = Vec::new();

        let request = serde_json::json!({
            "type": "start_generation",
            "instructions": "Write 1200 words. Chapters: Introduction (600 words), Conclusion (600 words)",
        });
        handle_client_message(&state, &request.to_string(), &tx, &mut forwarders).await;

        let mut seen_types = Vec::new();
        for _ in 0..16 {
            let Some(msg) = recv_json(&mut rx, Duration::from_secs(5)).await else {
                break;
            };
            let kind = msg["type"].as_str().unwrap_or_default().to_string();
            seen_types.push(kind.clone());
            if kind == "complete" || kind == "error" {
                break;
            }
        }

        assert!(seen_types.contains(&"outline".to_string()), "got {seen_types:?}");
        assert!(seen_types.contains(&"section_complete".to_string()));
        assert_eq!(seen_types.last().map(String::as_str), Some("complete"));
        let _ = std::fs::remove_file(&state.db_path);
    }
}
