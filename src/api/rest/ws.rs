use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Long-lived delivery channel for one driver. A new connection for the
/// same driver replaces the previous one.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(driver_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, driver_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, driver_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = ReceiverStream::new(state.notifier.subscribe(driver_id));
    state.metrics.connected_drivers.set(state.notifier.connected_count() as i64);

    info!(driver_id = %driver_id, "driver connected");

    let send_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize driver event for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    // The registry entry is cleaned up lazily on the next failed push; a
    // replacement subscription may already own the driver's slot here.
    state.metrics.connected_drivers.set(state.notifier.connected_count() as i64);
    info!(driver_id = %driver_id, "driver disconnected");
}
