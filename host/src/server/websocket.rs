use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use print_bridge::BridgeEvent;
use tokio::sync::broadcast::error::RecvError;

use crate::app::SharedState;

/// WebSocket upgrade handler for the print bridge.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (mut sender, mut receiver) = socket.split();
    let bridge = state.bridge().clone();
    let mut rx = bridge.subscribe();

    let client_id = uuid::Uuid::new_v4().to_string();

    // Current printer status as the greeting.
    let welcome = BridgeEvent::PrinterStatus(bridge.status()).to_json();
    if sender.send(Message::Text(welcome.into())).await.is_err() {
        return;
    }

    tracing::info!("Bridge client connected: {}", client_id);

    // Forward bridge events to this client
    let mut send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Bridge client lagging, events dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            if sender
                .send(Message::Text(event.to_json().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    // Dispatch requests from this client
    let cid = client_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => bridge.handle_text(text.as_str()).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
        tracing::info!("Bridge client disconnected: {}", cid);
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}
