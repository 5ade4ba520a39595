//! `/ws/audit` — live audit-trail socket.
//!
//! Protocol: the client sends `{type: "subscribe", auditLogId}`, gets a
//! `history` snapshot of everything persisted so far, then live `entry`
//! events until `completed`. Entries already covered by the snapshot
//! are filtered out of the live feed by sequence number.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::core_state::CoreState;
use crate::db::repository::audit as audit_repo;
use crate::db::repository::job as job_repo;
use crate::stream::{audit_channel, StreamMessage};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AuditClientMessage {
    #[serde(rename_all = "camelCase")]
    Subscribe { audit_log_id: String },
}

pub async fn audit_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<CoreState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_audit_ws(socket, state))
}

async fn handle_audit_ws(socket: WebSocket, state: Arc<CoreState>) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    // First message must be the subscribe request.
    let job_id = loop {
        match ws_stream.next().await {
            Some(Ok(Message::Text(ref text))) => {
                match serde_json::from_str::<AuditClientMessage>(text) {
                    Ok(AuditClientMessage::Subscribe { audit_log_id }) => break audit_log_id,
                    Err(e) => {
                        let _ = send_json(
                            &mut ws_sink,
                            &StreamMessage::Error {
                                message: format!("expected subscribe: {e}"),
                            },
                        )
                        .await;
                        return;
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Err(_)) => return,
            _ => {}
        }
    };

    // Subscribe before the snapshot so nothing falls between them;
    // duplicates are filtered by sequence below.
    let (_, mut hub_rx) = state.hub.subscribe(&audit_channel(&job_id));

    let snapshot = state.open_db().ok().and_then(|conn| {
        let events = audit_repo::list_events(&conn, &job_id).ok()?;
        let terminal = job_repo::get_job(&conn, &job_id)
            .map(|job| job.status.is_terminal())
            .unwrap_or(false);
        Some((events, terminal))
    });

    let Some((history, terminal)) = snapshot else {
        let _ = send_json(
            &mut ws_sink,
            &StreamMessage::Error {
                message: format!("audit log {job_id} unavailable"),
            },
        )
        .await;
        return;
    };

    let last_seen = history.last().map(|e| e.sequence).unwrap_or(0);
    if send_json(&mut ws_sink, &StreamMessage::History { entries: history })
        .await
        .is_err()
    {
        return;
    }

    if terminal {
        let _ = send_json(&mut ws_sink, &StreamMessage::Completed {}).await;
        return;
    }

    loop {
        tokio::select! {
            hub_msg = hub_rx.recv() => {
                match hub_msg {
                    Some(StreamMessage::Entry { entry }) if entry.sequence > last_seen => {
                        if send_json(&mut ws_sink, &StreamMessage::Entry { entry }).await.is_err() {
                            break;
                        }
                    }
                    Some(StreamMessage::Completed {}) => {
                        let _ = send_json(&mut ws_sink, &StreamMessage::Completed {}).await;
                        break;
                    }
                    Some(_) => {}
                    None => break,
                }
            }
            incoming = ws_stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    let _ = ws_sink.close().await;
}

async fn send_json(
    sink: &mut (impl SinkExt<Message> + Unpin),
    message: &StreamMessage,
) -> Result<(), ()> {
    let json = serde_json::to_string(message).map_err(|_| ())?;
    sink.send(Message::Text(json.into())).await.map_err(|_| ())
}
