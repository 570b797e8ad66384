//! `/ws/incidents` relay.

use super::AppState;
use crate::incidents::IncidentHub;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use std::sync::Arc;

pub async fn incidents(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    let hub = Arc::clone(&state.hub);
    upgrade.on_upgrade(move |socket| relay(socket, hub))
}

/// Forwards hub messages until the client leaves or a send fails. Inbound
/// frames are keep-alives and are discarded.
async fn relay(mut socket: WebSocket, hub: Arc<IncidentHub>) {
    let mut subscription = hub.subscribe();
    let id = subscription.id();
    tracing::debug!(subscriber = id, "Incident subscriber connected");

    loop {
        tokio::select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {},
            },
            outbound = subscription.recv() => match outbound {
                Some(text) => {
                    if socket.send(Message::Text(text.as_ref().into())).await.is_err() {
                        break;
                    }
                },
                None => break,
            },
        }
    }

    hub.unsubscribe(id);
    tracing::debug!(subscriber = id, "Incident subscriber disconnected");
}
