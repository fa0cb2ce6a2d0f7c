//! WebSocket push channel for sync messages
//!
//! A device connects to `/ws/sessions/{session_id}/devices/{device_id}` and
//! receives every `SyncMessage` the engine addresses to it or broadcasts to
//! its session, as tagged JSON text frames. Inbound frames other than close
//! are ignored; updates go through the REST endpoints.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info};

use playsync_cluster::DeviceMessageHub;
use playsync_core::models::{DeviceId, SessionId};

use crate::http::{AppResult, AppState};

/// WebSocket handler for per-device sync updates
///
/// The device must already hold a replica in the session.
pub async fn websocket_handler(
    State(state): State<AppState>,
    Path((session_id, device_id)): Path<(String, String)>,
    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    let session_id = SessionId::from(session_id);
    let device_id = DeviceId::from(device_id);
    state.engine.get_replica(&session_id, &device_id).await?;

    // Signaling only; 64KB is plenty
    Ok(ws
        .max_message_size(64 * 1024)
        .on_upgrade(move |socket| handle_socket(socket, state.message_hub, session_id, device_id)))
}

async fn handle_socket(
    socket: WebSocket,
    hub: DeviceMessageHub,
    session_id: SessionId,
    device_id: DeviceId,
) {
    let connection_id = DeviceMessageHub::new_connection_id();
    let mut rx = hub.subscribe(session_id.clone(), device_id.clone(), connection_id.clone());
    let (mut sink, mut stream) = socket.split();

    info!(
        session_id = %session_id,
        device_id = %device_id,
        connection_id = %connection_id,
        "WebSocket connection established"
    );

    let forward = async {
        while let Some(message) = rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    error!(error = %e, "Failed to encode sync message");
                    continue;
                }
            };
            if let Err(e) = sink.send(Message::Text(text.into())).await {
                debug!(error = %e, "WebSocket send failed");
                break;
            }
        }
    };

    let drain = async {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };

    tokio::select! {
        () = forward => {}
        () = drain => {}
    }

    hub.unsubscribe(&connection_id);
    info!(
        session_id = %session_id,
        device_id = %device_id,
        connection_id = %connection_id,
        "WebSocket connection closed"
    );
}
