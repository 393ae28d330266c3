use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::infra::{
    app_state::AppState,
    websocket::{Connection, messages},
};

/// Upgrade to a receive-only live feed of new attendance entries.
pub async fn live_attendance_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel(state.config().fanout.observer_buffer);

    let connection = Arc::new(Connection::new(tx));
    let conn_id = connection.id;
    state.websocket_manager.add_connection(connection);
    state.fanout.ensure_started();
    info!(
        conn_id = %conn_id,
        observers = state.websocket_manager.connection_count(),
        "Live observer connected"
    );

    // Ends when the observer is evicted (sender dropped) or the socket fails.
    let mut send_task = tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            let frame = match messages::notification_to_websocket(&notification)
            {
                Ok(frame) => frame,
                Err(e) => {
                    debug!(error = %e, "Failed to encode notification");
                    continue;
                }
            };
            if ws_sender.send(frame).await.is_err() {
                return;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = &mut send_task => break,
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(conn_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
                // Observers never send anything meaningful.
                Some(Ok(_)) => {}
            },
        }
    }

    state.websocket_manager.remove_connection(conn_id);
    send_task.abort();
    info!(conn_id = %conn_id, "Live observer disconnected");
}
