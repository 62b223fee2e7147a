//! Relay protocol transport
//!
//! Serves the client-facing half of the relay: JSON registration, the
//! WebSocket delivery stream, and JSON result reports.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use hooktunnel_shared::protocol::{
    DeliveryResult, RegisterRequest, RegisterResponse, ResultAck, REGISTER_PATH, RESPONSE_PATH, STREAM_PATH,
};
use tracing::{debug, warn};

use crate::relay::{LinkedStream, RelayServer};

/// Build the relay protocol router
pub fn router(relay: RelayServer) -> Router {
    Router::new()
        .route(REGISTER_PATH, post(register_handler))
        .route(&format!("{}/:webhook_id", STREAM_PATH), get(stream_handler))
        .route(RESPONSE_PATH, post(response_handler))
        .route("/health", get(|| async { "OK" }))
        .with_state(relay)
}

async fn register_handler(
    State(relay): State<RelayServer>,
    Json(req): Json<RegisterRequest>,
) -> Json<RegisterResponse> {
    Json(relay.register_listener(req))
}

async fn response_handler(
    State(relay): State<RelayServer>,
    Json(result): Json<DeliveryResult>,
) -> Json<ResultAck> {
    Json(relay.send_webhook_response(result))
}

/// Attach before upgrading so an unknown id is refused with a plain 404.
/// If the upgrade never completes the stream is dropped and detaches.
async fn stream_handler(
    ws: WebSocketUpgrade,
    State(relay): State<RelayServer>,
    Path(webhook_id): Path<String>,
) -> Response {
    match relay.stream_webhooks(&webhook_id) {
        Ok(stream) => ws.on_upgrade(move |socket| handle_socket(socket, stream)),
        Err(e) => {
            warn!("Refusing stream: {}", e);
            (StatusCode::NOT_FOUND, e.to_string()).into_response()
        }
    }
}

/// Pump deliveries onto the socket until either side goes away
async fn handle_socket(socket: WebSocket, mut stream: LinkedStream) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            delivery = stream.next() => {
                let Some(delivery) = delivery else {
                    if let Err(e) = sender.send(Message::Close(None)).await {
                        debug!("Could not close stream for webhook ID {}: {}", stream.webhook_id(), e);
                    }
                    break;
                };
                let data = match serde_json::to_vec(&delivery) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("Dropping unserializable delivery {}: {}", delivery.request_id, e);
                        continue;
                    }
                };
                if let Err(e) = sender.send(Message::Binary(data)).await {
                    warn!("Stream for webhook ID {} failed: {}", stream.webhook_id(), e);
                    break;
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!("Stream for webhook ID {} errored: {}", stream.webhook_id(), e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
    // `stream` drops here and detaches the session
}
