//! Relay protocol server
//!
//! Thin adapter between the transports (control router, HTTP ingress) and
//! the session registry. Every remote operation of the relay protocol maps
//! onto one method here.

use std::sync::Arc;

use hooktunnel_shared::protocol::{
    DeliveryRequest, DeliveryResult, Headers, RegisterRequest, RegisterResponse, ResultAck, HOOK_PATH,
};
use hooktunnel_shared::{Error, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::metrics::Metrics;
use crate::registry::SessionRegistry;
use crate::tunnel::{DeliveryQueue, LinkId};

#[derive(Clone)]
pub struct RelayServer {
    registry: Arc<SessionRegistry>,
    metrics: Metrics,
    public_url: String,
    link_buffer: usize,
}

impl RelayServer {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            registry: Arc::new(SessionRegistry::new()),
            metrics: Metrics::new(),
            public_url: config.public_url.trim_end_matches('/').to_string(),
            link_buffer: config.link_buffer,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Public URL webhook senders should call for `webhook_id`
    pub fn webhook_url(&self, webhook_id: &str) -> String {
        format!("{}{}/{}", self.public_url, HOOK_PATH, webhook_id)
    }

    /// Register a listener. Registration is metadata-only and always succeeds.
    pub fn register_listener(&self, req: RegisterRequest) -> RegisterResponse {
        let supplied = req.webhook_id.as_deref().filter(|id| !id.is_empty());
        match supplied {
            Some(id) => info!("Using provided webhook ID: {}", id),
            None => debug!("No webhook ID supplied, generating one"),
        }

        let webhook_id = self.registry.register(supplied, &req.local_url);
        self.metrics.registered();
        info!("Registered webhook listener: {} -> {}", webhook_id, req.local_url);

        RegisterResponse {
            webhook_url: self.webhook_url(&webhook_id),
            webhook_id,
            success: true,
            error: None,
        }
    }

    /// Attach a new client stream to a registered session.
    ///
    /// The returned [`LinkedStream`] yields every delivery forwarded to the
    /// session. Dropping it detaches the session.
    pub fn stream_webhooks(&self, webhook_id: &str) -> Result<LinkedStream> {
        let lifecycle = CancellationToken::new();
        let link_id = self.registry.next_link_id();

        let queue = self
            .registry
            .attach_stream(webhook_id, link_id, self.link_buffer, lifecycle.clone())?;
        self.metrics.link_opened(webhook_id);
        info!("Client connected for webhook ID: {}", webhook_id);

        Ok(LinkedStream {
            webhook_id: webhook_id.to_string(),
            link_id,
            queue,
            lifecycle,
            registry: self.registry.clone(),
            metrics: self.metrics.clone(),
        })
    }

    /// Acknowledge a client's delivery result.
    ///
    /// Results are not matched back to the inbound HTTP call; the sender has
    /// already been answered by the time a result arrives.
    pub fn send_webhook_response(&self, result: DeliveryResult) -> ResultAck {
        self.metrics.result_reported();
        info!(
            "Client reported status {} for request {} ({} bytes)",
            result.status_code,
            result.request_id,
            result.body.len()
        );
        ResultAck {
            success: true,
            error: None,
        }
    }

    /// True when the webhook has an attached client stream
    pub fn has_client(&self, webhook_id: &str) -> bool {
        self.registry.has_active_link(webhook_id)
    }

    /// Reject a webhook with no attached client, counting the reason.
    ///
    /// Lets the ingress refuse a call before reading its body.
    pub fn check_client(&self, webhook_id: &str) -> Result<()> {
        match self.registry.get(webhook_id) {
            None => {
                self.metrics.rejected_not_found();
                Err(Error::NotFound(webhook_id.to_string()))
            }
            Some(session) if !session.is_linked() => {
                self.metrics.rejected_unavailable();
                Err(Error::LinkUnavailable(webhook_id.to_string()))
            }
            Some(_) => Ok(()),
        }
    }

    /// Push one inbound webhook onto the owning client's stream.
    ///
    /// Returns the generated request id on success.
    pub async fn forward_webhook(
        &self,
        webhook_id: &str,
        method: String,
        path: String,
        headers: Headers,
        body: Vec<u8>,
    ) -> Result<String> {
        let Some(session) = self.registry.get(webhook_id) else {
            self.metrics.rejected_not_found();
            return Err(Error::NotFound(webhook_id.to_string()));
        };
        let (Some(link), Some(lifecycle)) = (session.link, session.lifecycle) else {
            self.metrics.rejected_unavailable();
            return Err(Error::LinkUnavailable(webhook_id.to_string()));
        };

        let delivery = DeliveryRequest {
            request_id: generate_request_id(),
            webhook_id: webhook_id.to_string(),
            method,
            path,
            headers,
            body,
        };
        let request_id = delivery.request_id.clone();
        let bytes = delivery.body.len() as u64;

        if lifecycle.is_cancelled() || link.send(delivery).await.is_err() {
            self.metrics.transmit_failed(webhook_id);
            warn!("Failed to send webhook {} to client for webhook ID: {}", request_id, webhook_id);
            return Err(Error::Transmit(format!("client for webhook {} disconnected", webhook_id)));
        }

        self.metrics.forwarded(webhook_id, bytes);
        info!("Forwarded webhook {} to client for webhook ID: {}", request_id, webhook_id);
        Ok(request_id)
    }

    /// Close every attached stream
    pub fn shutdown(&self) {
        info!("Closing {} session(s)", self.registry.len());
        self.registry.close_all();
    }
}

/// An attached client stream.
///
/// Holds the receiving end of the session's delivery queue. Dropping it, on
/// any exit path, cancels the lifecycle and detaches the session unless a
/// newer stream has taken over. A superseded stream stops pulling from the
/// queue; whatever is still queued goes to its successor.
pub struct LinkedStream {
    webhook_id: String,
    link_id: LinkId,
    queue: DeliveryQueue,
    lifecycle: CancellationToken,
    registry: Arc<SessionRegistry>,
    metrics: Metrics,
}

impl LinkedStream {
    pub fn webhook_id(&self) -> &str {
        &self.webhook_id
    }

    /// Next delivery, or `None` once the stream has been cancelled
    pub async fn next(&mut self) -> Option<DeliveryRequest> {
        let lifecycle = &self.lifecycle;
        let queue = &self.queue;
        tokio::select! {
            biased;
            _ = lifecycle.cancelled() => None,
            delivery = async { queue.lock().await.recv().await } => delivery,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.lifecycle.is_cancelled()
    }
}

impl Drop for LinkedStream {
    fn drop(&mut self) {
        self.lifecycle.cancel();
        let removed = self.registry.detach_link(&self.webhook_id, self.link_id);
        self.metrics.link_closed(&self.webhook_id, removed);
        if removed {
            info!("Client disconnected for webhook ID: {}", self.webhook_id);
        } else {
            debug!("Superseded stream for webhook ID {} closed", self.webhook_id);
        }
    }
}

fn generate_request_id() -> String {
    format!("req_{}", Uuid::new_v4().simple())
}
