use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::PipelineError;

use super::AppState;

/// `GET /video/ws/{node_id}`: binary WebSocket of JPEG frames from a running
/// visual sink. 404 unless the node has registered a video stream.
pub async fn stream(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(rx) = state.runtime.video().subscribe(&node_id) else {
        return PipelineError::NodeNotFound(node_id).into_response();
    };
    ws.on_upgrade(move |socket| pump(socket, rx, node_id))
}

async fn pump(mut socket: WebSocket, mut rx: broadcast::Receiver<Bytes>, node_id: String) {
    loop {
        match rx.recv().await {
            Ok(jpeg) => {
                if socket.send(Message::Binary(jpeg)).await.is_err() {
                    break;
                }
            }
            // Slow viewer: skip to the most recent frames.
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!(node = %node_id, "video viewer disconnected");
}
