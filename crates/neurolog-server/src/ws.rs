//! WebSocket handler for live status push
//!
//! Clients connect to /api/v1/ws and receive the pipeline status as JSON on
//! every tick of the status task.

use crate::api::{SessionInfo, StatusResponse};
use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use neurolog_core::PipelineStatus;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

fn status_json(state: &AppState, status: &PipelineStatus) -> Option<String> {
    let response = StatusResponse {
        version: neurolog_core::VERSION.to_string(),
        status: status.clone(),
        session: state.pipeline.current_session().map(SessionInfo::from),
    };
    serde_json::to_string(&response).ok()
}

async fn handle_ws(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Subscribe before the snapshot so no tick falls between the two
    let mut rx = state.ws_tx.subscribe();

    if let Some(json) = status_json(&state, &state.pipeline.status()) {
        let _ = ws_sender.send(Message::Text(json.into())).await;
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if ws_sender.send(Message::Text(msg.into())).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "WebSocket client lagging");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            if matches!(msg, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }

    tracing::debug!("WebSocket client disconnected");
}

/// Push a status update to all connected WebSocket clients
pub fn broadcast_status(state: &AppState, status: &PipelineStatus) {
    if state.ws_tx.receiver_count() == 0 {
        return;
    }

    if let Some(json) = status_json(state, status) {
        let _ = state.ws_tx.send(json);
    }
}
