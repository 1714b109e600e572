use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::quiz::events::ClientEvent;
use crate::quiz::QuizServer;

pub async fn handle_quiz_websocket(websocket: WebSocket, server: Arc<QuizServer>) {
    let (mut ws_sender, mut ws_receiver) = websocket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let connection = server.register_connection(tx).await;
    tracing::info!(connection = connection, "New quiz WebSocket connection established");

    // Spawn task to send messages to client
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = ws_sender.send(message).await {
                tracing::error!(error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                handle_websocket_message(&server, connection, message).await;
            }
            Err(e) => {
                tracing::error!(connection = connection, error = %e, "WebSocket error");
                break;
            }
        }
    }

    server.handle_disconnect(connection).await;
    sender_task.abort();
    tracing::info!(connection = connection, "Quiz WebSocket connection closed");
}

async fn handle_websocket_message(
    server: &Arc<QuizServer>,
    connection: crate::quiz::binder::ConnectionId,
    message: Message,
) {
    if let Ok(text) = message.to_str() {
        tracing::debug!(connection = connection, "Received quiz event: {}", text);

        match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => {
                server.handle_event(connection, event).await;
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    raw_message = %text,
                    "Failed to parse client event"
                );
            }
        }
    }
}
