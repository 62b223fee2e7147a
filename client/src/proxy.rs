//! Local dispatcher for forwarding deliveries

use std::time::Duration;

use hooktunnel_shared::headers;
use hooktunnel_shared::protocol::{DeliveryRequest, DeliveryResult};
use hooktunnel_shared::{Error, Result};
use reqwest::Method;
use tracing::debug;

use crate::tunnel::DeliveryExecutor;

/// Default bound on one local delivery
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(30);

/// Re-issues deliveries as HTTP calls against the local target.
///
/// Every delivery goes to the configured URL as-is; the relay-side path is
/// not appended. Failures become results rather than errors.
#[derive(Debug, Clone)]
pub struct LocalDispatcher {
    client: reqwest::Client,
    target: String,
}

impl LocalDispatcher {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            target: target.into(),
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    async fn dispatch(&self, request: &DeliveryRequest) -> DeliveryResult {
        let id = &request.request_id;

        let method = match Method::from_bytes(request.method.as_bytes()) {
            Ok(m) => m,
            Err(e) => return DeliveryResult::failure(id, 500, format!("Error creating request: {}", e)),
        };

        let mut builder = self
            .client
            .request(method, &self.target)
            .body(request.body.clone());
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        let http_request = match builder.build() {
            Ok(r) => r,
            Err(e) => return DeliveryResult::failure(id, 500, format!("Error creating request: {}", e)),
        };

        debug!("Forwarding {} {} to {}", request.method, request.path, self.target);
        let resp = match self.client.execute(http_request).await {
            Ok(r) => r,
            Err(e) => return DeliveryResult::failure(id, 502, format!("Error forwarding request: {}", e)),
        };

        let status_code = resp.status().as_u16();
        let headers = headers::fold(
            resp.headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str(), v))),
            &[],
        );

        match resp.bytes().await {
            Ok(body) => DeliveryResult {
                request_id: id.clone(),
                status_code,
                headers,
                body: body.to_vec(),
            },
            Err(e) => DeliveryResult::failure(id, 500, format!("Error reading response: {}", e)),
        }
    }
}

impl DeliveryExecutor for LocalDispatcher {
    async fn execute(&self, request: &DeliveryRequest) -> Result<DeliveryResult> {
        Ok(self.dispatch(request).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hooktunnel_shared::protocol::Headers;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn delivery(method: &str, body: &str) -> DeliveryRequest {
        let mut headers = Headers::new();
        headers.insert("X-Test".into(), "1".into());
        DeliveryRequest {
            request_id: "req_1".into(),
            webhook_id: "w".into(),
            method: method.into(),
            path: "/hook/w".into(),
            headers,
            body: body.as_bytes().to_vec(),
        }
    }

    /// One-shot HTTP server returning a canned response and the raw request
    async fn canned_server(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut tmp = [0u8; 4096];
            while !String::from_utf8_lossy(&buf).contains(r#"{"a":1}"#) {
                let n = stream.read(&mut tmp).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&tmp[..n]);
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
            String::from_utf8_lossy(&buf).to_string()
        });
        (format!("http://{}/webhooks", addr), handle)
    }

    #[tokio::test]
    async fn test_forwards_and_captures_response() {
        let (url, server) = canned_server(
            "HTTP/1.1 201 Created\r\nx-reply: yes\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
        )
        .await;
        let dispatcher = LocalDispatcher::new(url, DEFAULT_FORWARD_TIMEOUT).unwrap();

        let result = dispatcher.execute(&delivery("POST", r#"{"a":1}"#)).await.unwrap();
        assert_eq!(result.request_id, "req_1");
        assert_eq!(result.status_code, 201);
        assert_eq!(result.headers.get("X-Reply").map(String::as_str), Some("yes"));
        assert_eq!(result.body, b"ok");

        let raw = server.await.unwrap().to_ascii_lowercase();
        assert!(raw.starts_with("post /webhooks http/1.1"));
        assert!(raw.contains("x-test: 1"));
    }

    #[tokio::test]
    async fn test_unreachable_target_is_502() {
        let dispatcher = LocalDispatcher::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let result = dispatcher.execute(&delivery("POST", "{}")).await.unwrap();
        assert_eq!(result.status_code, 502);
        assert!(String::from_utf8_lossy(&result.body).starts_with("Error forwarding request"));
    }

    #[tokio::test]
    async fn test_invalid_method_is_500() {
        let dispatcher = LocalDispatcher::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let result = dispatcher.execute(&delivery("NOT A METHOD", "{}")).await.unwrap();
        assert_eq!(result.status_code, 500);
        assert!(String::from_utf8_lossy(&result.body).starts_with("Error creating request"));
    }
}
