//! Tunnel client
//!
//! Registers with the relay, then holds the delivery stream open, executing
//! each delivery locally and reporting the outcome back.

use std::future::Future;
use std::time::Duration;

use futures_util::StreamExt;
use hooktunnel_shared::protocol::{
    DeliveryRequest, DeliveryResult, RegisterRequest, RegisterResponse, ResultAck, REGISTER_PATH, RESPONSE_PATH,
    STREAM_PATH,
};
use hooktunnel_shared::{Error, Result};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Bound on registration and result report calls
pub const DEFAULT_REGISTER_TIMEOUT: Duration = Duration::from_secs(10);

/// Executes a delivery against the client's local target
pub trait DeliveryExecutor {
    fn execute(&self, request: &DeliveryRequest) -> impl Future<Output = Result<DeliveryResult>> + Send;
}

/// Client half of the relay protocol
#[derive(Debug, Clone)]
pub struct TunnelClient {
    http: reqwest::Client,
    base_url: String,
    register_timeout: Duration,
}

impl TunnelClient {
    /// `server_addr` is either `host:port` or an http(s)/ws(s) URL
    pub fn new(server_addr: &str) -> Result<Self> {
        let base_url = normalize_server_addr(server_addr)?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url,
            register_timeout: DEFAULT_REGISTER_TIMEOUT,
        })
    }

    pub fn with_register_timeout(mut self, timeout: Duration) -> Self {
        self.register_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// WebSocket URL of the delivery stream for `webhook_id`
    pub fn stream_url(&self, webhook_id: &str) -> String {
        let ws_base = match self.base_url.strip_prefix("https://") {
            Some(rest) => format!("wss://{}", rest),
            None => format!("ws://{}", self.base_url.trim_start_matches("http://")),
        };
        format!("{}{}/{}", ws_base, STREAM_PATH, webhook_id)
    }

    /// Register a listener for `local_url`, optionally under a chosen id
    pub async fn register(&self, local_url: &str, webhook_id: Option<&str>) -> Result<RegisterResponse> {
        let req = RegisterRequest {
            local_url: local_url.to_string(),
            webhook_id: webhook_id.filter(|id| !id.is_empty()).map(String::from),
        };

        let resp = self
            .http
            .post(format!("{}{}", self.base_url, REGISTER_PATH))
            .timeout(self.register_timeout)
            .json(&req)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(transport_error)?;

        let registration: RegisterResponse = resp
            .json()
            .await
            .map_err(|e| Error::Protocol(format!("invalid registration response: {}", e)))?;

        if !registration.success {
            return Err(Error::Registration(
                registration.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(registration)
    }

    /// Report a delivery result to the relay
    pub async fn report(&self, result: &DeliveryResult) -> Result<ResultAck> {
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, RESPONSE_PATH))
            .timeout(self.register_timeout)
            .json(result)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(transport_error)?;

        resp.json()
            .await
            .map_err(|e| Error::Protocol(format!("invalid acknowledgement: {}", e)))
    }

    /// Hold the delivery stream open and execute every delivery in order.
    ///
    /// Only returns on a receive failure or when the relay ends the stream;
    /// there is no reconnect. Failing to report a result is logged and the
    /// loop carries on.
    pub async fn run_stream<E: DeliveryExecutor>(&self, webhook_id: &str, executor: &E) -> Result<()> {
        let (mut ws_stream, _) = connect_async(self.stream_url(webhook_id))
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(resp) if resp.status().as_u16() == 404 => {
                    Error::NotFound(webhook_id.to_string())
                }
                other => Error::Transport(format!("failed to start webhook stream: {}", other)),
            })?;

        info!("Started webhook stream for ID: {}", webhook_id);

        // Pings are answered by the socket itself
        loop {
            let data = match ws_stream.next().await {
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Text(text))) => text.into_bytes(),
                Some(Ok(Message::Close(_))) | None => {
                    info!("Webhook stream closed by relay");
                    return Err(Error::StreamClosed);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    error!("Error receiving webhook: {}", e);
                    return Err(Error::Transport(e.to_string()));
                }
            };

            match serde_json::from_slice::<DeliveryRequest>(&data) {
                Ok(request) => self.handle_delivery(&request, executor).await,
                Err(e) => warn!("Ignoring malformed delivery: {}", e),
            }
        }
    }

    async fn handle_delivery<E: DeliveryExecutor>(&self, request: &DeliveryRequest, executor: &E) {
        info!("Received webhook {}: {} {}", request.request_id, request.method, request.path);

        let result = match executor.execute(request).await {
            Ok(result) => result,
            Err(e) => {
                error!("Error processing webhook {}: {}", request.request_id, e);
                DeliveryResult::failure(&request.request_id, 500, format!("Error processing webhook: {}", e))
            }
        };

        if result.status_code >= 400 {
            warn!("Local target answered {} for webhook {}", result.status_code, request.request_id);
        }

        match self.report(&result).await {
            Ok(ack) if ack.success => debug!("Result for {} acknowledged", request.request_id),
            Ok(ack) => warn!(
                "Server rejected webhook response: {}",
                ack.error.unwrap_or_default()
            ),
            Err(e) => warn!("Error sending webhook response: {}", e),
        }
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout
    } else {
        Error::Transport(e.to_string())
    }
}

fn normalize_server_addr(addr: &str) -> Result<String> {
    let addr = addr.trim().trim_end_matches('/');
    if addr.is_empty() {
        return Err(Error::Transport("empty relay server address".to_string()));
    }

    let url = if let Some(rest) = addr.strip_prefix("ws://") {
        format!("http://{}", rest)
    } else if let Some(rest) = addr.strip_prefix("wss://") {
        format!("https://{}", rest)
    } else if addr.starts_with("http://") || addr.starts_with("https://") {
        addr.to_string()
    } else {
        format!("http://{}", addr)
    };
    Ok(url)
}
