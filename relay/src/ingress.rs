//! Public webhook ingress
//!
//! Accepts `POST /hook/{webhookId}` from webhook senders and relays each
//! call to the owning client. The sender only learns whether the delivery
//! was accepted for relay, never how the client's local target answered.

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use hooktunnel_shared::headers::{self, FRAMING_HEADERS};
use hooktunnel_shared::protocol::HOOK_PATH;
use hooktunnel_shared::Error;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::relay::RelayServer;

/// Fixed acknowledgement returned once a delivery is handed to the client
pub const FORWARDED_BODY: &str = r#"{"status": "forwarded", "message": "Webhook forwarded to tunnel client"}"#;

#[derive(Clone)]
pub struct Ingress {
    relay: RelayServer,
    answer_challenges: bool,
}

impl Ingress {
    pub fn new(relay: RelayServer, answer_challenges: bool) -> Self {
        Self {
            relay,
            answer_challenges,
        }
    }
}

/// Build the public ingress router
pub fn router(ingress: Ingress) -> Router {
    Router::new()
        .route(&format!("{}/:webhook_id", HOOK_PATH), post(hook_handler))
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(metrics_handler))
        .with_state(ingress)
}

enum IngressError {
    Relay(Error),
    BodyRead(String),
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        match self {
            IngressError::Relay(e @ (Error::NotFound(_) | Error::LinkUnavailable(_))) => {
                (StatusCode::NOT_FOUND, e.to_string()).into_response()
            }
            IngressError::Relay(e) => (
                StatusCode::BAD_GATEWAY,
                format!("Failed to forward webhook: {}", e),
            )
                .into_response(),
            IngressError::BodyRead(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to read request body: {}", e),
            )
                .into_response(),
        }
    }
}

/// Third-party URL verification handshake
#[derive(Debug, Deserialize)]
struct Challenge {
    #[serde(default)]
    challenge: String,
    #[serde(default, rename = "type")]
    kind: String,
}

fn url_verification(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<Challenge>(body)
        .ok()
        .filter(|c| c.kind == "url_verification")
        .map(|c| c.challenge)
}

async fn hook_handler(
    State(ingress): State<Ingress>,
    Path(webhook_id): Path<String>,
    req: Request,
) -> Result<Response, IngressError> {
    // Cheap rejection before reading the body
    if let Err(e) = ingress.relay.check_client(&webhook_id) {
        warn!("Could not find client for webhook ID: {}", webhook_id);
        return Err(IngressError::Relay(e));
    }

    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let headers = headers::fold(
        req.headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str(), v))),
        FRAMING_HEADERS,
    );

    let body = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|e| IngressError::BodyRead(e.to_string()))?;

    if ingress.answer_challenges {
        if let Some(challenge) = url_verification(&body) {
            debug!("Answering url_verification challenge for webhook ID: {}", webhook_id);
            return Ok(([(CONTENT_TYPE, "text/plain")], challenge).into_response());
        }
    }

    ingress
        .relay
        .forward_webhook(&webhook_id, method, path, headers, body.to_vec())
        .await
        .map_err(IngressError::Relay)?;

    Ok(([(CONTENT_TYPE, "application/json")], Body::from(FORWARDED_BODY)).into_response())
}

async fn metrics_handler(State(ingress): State<Ingress>) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        ingress.relay.metrics().to_prometheus(),
    )
}
