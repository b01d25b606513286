//! `GET /ws/events`: upgrades to a WebSocket and streams `welcome`, `event`, `stats_update`, and
//! `pong` messages from the Subscription Hub until the client disconnects or is evicted.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;

use crate::AppState;

pub async fn handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let queue_size = state.config.subscriber_queue_size;
    let mut guard = state.hub.register(queue_size);
    let subscriber_id = guard.id();

    loop {
        tokio::select! {
            outbound = guard.rx.recv() => {
                let Some(outbound) = outbound else { break };
                match serde_json::to_string(&outbound.to_outbound()) {
                    Ok(text) => {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(error) => {
                        tracing::error!(%error, "failed to serialize outbound hub message");
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) if text.trim() == "ping" => {
                        state.hub.pong(subscriber_id);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }
}
