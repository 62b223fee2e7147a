//! End-to-end tests: relay listeners on loopback, a real tunnel client, and
//! webhook senders calling the public ingress.

use std::future::Future;
use std::time::Duration;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use hooktunnel::{DeliveryExecutor, TunnelClient};
use hooktunnel_relay::ingress::FORWARDED_BODY;
use hooktunnel_relay::{control, ingress, Ingress, RelayConfig, RelayServer};
use hooktunnel_shared::protocol::{DeliveryRequest, DeliveryResult, Headers};
use hooktunnel_shared::{Error, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Records every delivery and answers 200
struct Recorder {
    tx: mpsc::UnboundedSender<DeliveryRequest>,
}

impl DeliveryExecutor for Recorder {
    async fn execute(&self, request: &DeliveryRequest) -> Result<DeliveryResult> {
        let _ = self.tx.send(request.clone());
        Ok(DeliveryResult {
            request_id: request.request_id.clone(),
            status_code: 200,
            headers: Headers::new(),
            body: b"handled".to_vec(),
        })
    }
}

struct Harness {
    relay: RelayServer,
    control_addr: String,
    ingress_url: String,
}

/// Fails every result report while leaving the rest of the protocol intact
async fn reject_reports(req: Request, next: Next) -> Response {
    if req.uri().path() == "/response" {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    next.run(req).await
}

async fn start_relay() -> Harness {
    start_relay_with(false).await
}

async fn start_relay_with(failing_reports: bool) -> Harness {
    let control_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ingress_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let control_addr = control_listener.local_addr().unwrap().to_string();
    let ingress_url = format!("http://{}", ingress_listener.local_addr().unwrap());

    let config = RelayConfig {
        public_url: ingress_url.clone(),
        ..Default::default()
    };
    let relay = RelayServer::new(&config);

    let mut control_app = control::router(relay.clone());
    if failing_reports {
        control_app = control_app.layer(middleware::from_fn(reject_reports));
    }
    let ingress_app = ingress::router(Ingress::new(relay.clone(), true));
    tokio::spawn(async move { axum::serve(control_listener, control_app).await });
    tokio::spawn(async move { axum::serve(ingress_listener, ingress_app).await });

    Harness {
        relay,
        control_addr,
        ingress_url,
    }
}

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not reached in time");
}

async fn post_hook(url: &str, body: &'static str) -> reqwest::Response {
    reqwest::Client::new()
        .post(url)
        .header("X-Test", "1")
        .body(body)
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_webhook_round_trip() {
    let h = start_relay().await;
    let client = TunnelClient::new(&h.control_addr).unwrap();

    let registration = client.register("http://localhost:3000", None).await.unwrap();
    assert!(registration.success);
    assert!(registration.webhook_id.starts_with("webhook_"));
    assert_eq!(
        registration.webhook_url,
        format!("{}/hook/{}", h.ingress_url, registration.webhook_id)
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = registration.webhook_id.clone();
    let stream_client = client.clone();
    let task = tokio::spawn(async move { stream_client.run_stream(&id, &Recorder { tx }).await });

    let relay = h.relay.clone();
    let id = registration.webhook_id.clone();
    wait_for(|| {
        let ready = relay.has_client(&id);
        async move { ready }
    })
    .await;

    let resp = post_hook(&registration.webhook_url, r#"{"a":1}"#).await;
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), FORWARDED_BODY);

    let delivery = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.webhook_id, registration.webhook_id);
    assert_eq!(delivery.method, "POST");
    assert_eq!(delivery.path, format!("/hook/{}", registration.webhook_id));
    assert_eq!(delivery.body, br#"{"a":1}"#);
    assert_eq!(delivery.headers.get("X-Test").map(String::as_str), Some("1"));
    assert!(delivery.request_id.starts_with("req_"));

    let metrics = h.relay.metrics().clone();
    wait_for(|| {
        let reported = metrics.results_reported() == 1;
        async move { reported }
    })
    .await;

    let unknown = post_hook(&format!("{}/hook/unknown-id", h.ingress_url), "{}").await;
    assert_eq!(unknown.status(), 404);

    // Client goes away; the session is cleaned up and senders get 404
    task.abort();
    let registry = h.relay.registry().clone();
    let id = registration.webhook_id.clone();
    wait_for(|| {
        let gone = !registry.contains(&id);
        async move { gone }
    })
    .await;

    let after = post_hook(&registration.webhook_url, "{}").await;
    assert_eq!(after.status(), 404);
}

#[tokio::test]
async fn test_deliveries_arrive_in_order() {
    let h = start_relay().await;
    let client = TunnelClient::new(&h.control_addr).unwrap();
    let registration = client
        .register("http://localhost:3000", Some("ordered"))
        .await
        .unwrap();
    assert_eq!(registration.webhook_id, "ordered");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let stream_client = client.clone();
    tokio::spawn(async move { stream_client.run_stream("ordered", &Recorder { tx }).await });

    let relay = h.relay.clone();
    wait_for(|| {
        let ready = relay.has_client("ordered");
        async move { ready }
    })
    .await;

    for body in ["first", "second", "third"] {
        let resp = post_hook(&registration.webhook_url, body).await;
        assert_eq!(resp.status(), 200);
    }

    let mut seen = Vec::new();
    for _ in 0..3 {
        let delivery = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(String::from_utf8(delivery.body).unwrap());
    }
    assert_eq!(seen, ["first", "second", "third"]);
}

#[tokio::test]
async fn test_failed_report_does_not_end_stream() {
    let h = start_relay_with(true).await;
    let client = TunnelClient::new(&h.control_addr).unwrap();
    let registration = client.register("http://localhost:3000", None).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = registration.webhook_id.clone();
    let stream_client = client.clone();
    let task = tokio::spawn(async move { stream_client.run_stream(&id, &Recorder { tx }).await });

    let relay = h.relay.clone();
    let id = registration.webhook_id.clone();
    wait_for(|| {
        let ready = relay.has_client(&id);
        async move { ready }
    })
    .await;

    let first = post_hook(&registration.webhook_url, "first").await;
    assert_eq!(first.status(), 200);
    let delivery = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.body, b"first");

    // The first report has failed by the time the second delivery executes
    let second = post_hook(&registration.webhook_url, "second").await;
    assert_eq!(second.status(), 200);
    let delivery = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.body, b"second");

    assert_eq!(h.relay.metrics().results_reported(), 0);
    assert!(!task.is_finished());
    assert!(h.relay.has_client(&registration.webhook_id));
}

#[tokio::test]
async fn test_stream_answers_each_ping_once() {
    let h = start_relay().await;
    let client = TunnelClient::new(&h.control_addr).unwrap();
    let registration = client.register("http://localhost:3000", None).await.unwrap();

    let (mut ws, _) = tokio_tungstenite::connect_async(client.stream_url(&registration.webhook_id))
        .await
        .unwrap();

    for payload in [b"one".to_vec(), b"two".to_vec()] {
        ws.send(Message::Ping(payload.clone())).await.unwrap();
        let reply = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        // A duplicate pong for "one" would show up here in place of "two"
        assert_eq!(reply, Message::Pong(payload));
    }
}

#[tokio::test]
async fn test_stream_for_unregistered_id_is_refused() {
    let h = start_relay().await;
    let client = TunnelClient::new(&h.control_addr).unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();

    let err = client.run_stream("never-registered", &Recorder { tx }).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(id) if id == "never-registered"));
}

#[tokio::test]
async fn test_relay_shutdown_ends_client_stream() {
    let h = start_relay().await;
    let client = TunnelClient::new(&h.control_addr).unwrap();
    let registration = client.register("http://localhost:3000", None).await.unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    let id = registration.webhook_id.clone();
    let stream_client = client.clone();
    let task = tokio::spawn(async move { stream_client.run_stream(&id, &Recorder { tx }).await });

    let relay = h.relay.clone();
    let id = registration.webhook_id.clone();
    wait_for(|| {
        let ready = relay.has_client(&id);
        async move { ready }
    })
    .await;

    h.relay.shutdown();

    let outcome = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, Err(Error::StreamClosed) | Err(Error::Transport(_))));
}
