//! `/ws` (§6.2): the bidirectional event channel. Server pushes
//! `status_update`/`download_progress`/`notification`; the only recognized
//! client message is `request_status`, which elicits an immediate snapshot.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use serde_json::json;

use bookd_core::broadcaster::Event;

use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn status_snapshot(state: &AppState) -> serde_json::Value {
    let grouped = state.queue.snapshot_by_status();
    let mut out = serde_json::Map::new();
    for (status, tasks) in grouped {
        let by_id: serde_json::Map<String, serde_json::Value> = tasks
            .into_iter()
            .map(|t| (t.task_id.clone(), serde_json::to_value(t).unwrap_or(serde_json::Value::Null)))
            .collect();
        let key = serde_json::to_value(status)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default();
        out.insert(key, serde_json::Value::Object(by_id));
    }
    json!({ "type": "status_update", "tasks": serde_json::Value::Object(out) })
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    state.broadcaster.on_connect().await;
    let mut rx = state.broadcaster.subscribe();

    if socket.send(Message::Text(status_snapshot(&state).to_string())).await.is_err() {
        state.broadcaster.on_disconnect().await;
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if text.contains("request_status") {
                            if socket.send(Message::Text(status_snapshot(&state).to_string())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            event = rx.recv() => {
                let Ok(event) = event else { break };
                let payload = match event {
                    Event::QueueStatus { tasks } => json!({ "type": "status_update", "tasks": tasks }),
                    Event::Progress { task_id, progress } => {
                        let status = state.queue.get(&task_id).map(|t| t.status);
                        json!({ "type": "download_progress", "book_id": task_id, "progress": progress, "status": status })
                    }
                    Event::Notification { level, message } => {
                        json!({ "type": "notification", "message": message, "level": level })
                    }
                };
                if socket.send(Message::Text(payload.to_string())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.broadcaster.on_disconnect().await;
}
