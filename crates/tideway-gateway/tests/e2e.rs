//! End-to-end tests over a real HTTP server and the reference SSE parse
//! algorithm (join consecutive `data:` lines with `\n`, flush on the blank
//! line once both id and data are present).

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tideway_gateway::{router, ApiKeySet, Gateway, GatewayState};

const API_KEY: &str = "dev-key";

async fn spawn_gateway() -> (String, GatewayState) {
    spawn_gateway_with(|b| b).await
}

async fn spawn_gateway_with(
    configure: impl FnOnce(tideway_gateway::GatewayBuilder) -> tideway_gateway::GatewayBuilder,
) -> (String, GatewayState) {
    let builder = Gateway::builder().api_keys(ApiKeySet::parse(API_KEY));
    let gateway = configure(builder).build().unwrap();
    let state = gateway.state();

    let app = router(state.clone(), true);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}"), state)
}

async fn open_stream(base: &str, topic: &str, subscriber_id: &str) -> SseReader {
    let response = reqwest::Client::new()
        .get(format!("{base}/v1/stream"))
        .header("authorization", format!("Bearer {API_KEY}"))
        .header("x-sse-topic", topic)
        .header("x-sse-id", subscriber_id)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    SseReader::new(response)
}

async fn publish(base: &str, topic: &str, id: &str, payload: &str) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{base}/v1/publish"))
        .header("authorization", format!("Bearer {API_KEY}"))
        .header("x-sse-topic", topic)
        .header("x-sse-id", id)
        .body(payload.to_string())
        .send()
        .await
        .unwrap()
}

/// Incremental reference parser over a streamed response body.
struct SseReader {
    stream: Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>,
    buffer: String,
}

impl SseReader {
    fn new(response: reqwest::Response) -> Self {
        Self {
            stream: Box::pin(response.bytes_stream()),
            buffer: String::new(),
        }
    }

    async fn next_event(&mut self) -> (String, String) {
        tokio::time::timeout(Duration::from_secs(5), self.read_event())
            .await
            .expect("timed out waiting for event")
    }

    async fn read_event(&mut self) -> (String, String) {
        let mut id: Option<String> = None;
        let mut data: Vec<String> = Vec::new();

        loop {
            if let Some(pos) = self.buffer.find('\n') {
                let raw: String = self.buffer.drain(..=pos).collect();
                let line = raw.trim_end_matches(['\n', '\r']);

                if line.is_empty() {
                    if let Some(id) = id.take() {
                        if !data.is_empty() {
                            return (id, data.join("\n"));
                        }
                    }
                    data.clear();
                } else if let Some(rest) = line.strip_prefix("id: ") {
                    id = Some(rest.to_string());
                } else if let Some(rest) = line.strip_prefix("data: ") {
                    data.push(rest.to_string());
                }
                continue;
            }

            let chunk = self
                .stream
                .next()
                .await
                .expect("stream ended unexpectedly")
                .expect("stream read failed");
            self.buffer
                .push_str(std::str::from_utf8(&chunk).expect("non-UTF-8 chunk"));
        }
    }
}

async fn wait_for_connections(state: &GatewayState, expected: usize) {
    for _ in 0..100 {
        if state.registry.connection_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!(
        "registry never reached {expected} connections, still at {}",
        state.registry.connection_count()
    );
}

#[tokio::test]
async fn publish_reaches_subscriber() {
    let (base, _state) = spawn_gateway().await;

    let mut reader = open_stream(&base, "alerts", "py-sub-1").await;

    let response = publish(&base, "alerts", "py-event-1", "hello from python publisher").await;
    assert_eq!(response.status(), 202);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["id"], "py-event-1");
    assert_eq!(body["delivered"], 1);

    let (id, data) = reader.next_event().await;
    assert_eq!(id, "py-event-1");
    assert_eq!(data, "hello from python publisher");
}

#[tokio::test]
async fn multi_line_payload_round_trips() {
    let (base, _state) = spawn_gateway().await;

    let mut reader = open_stream(&base, "alerts", "sub-multiline").await;
    publish(&base, "alerts", "evt-1", "line1\nline2").await;

    let (id, data) = reader.next_event().await;
    assert_eq!(id, "evt-1");
    assert_eq!(data, "line1\nline2");
}

#[tokio::test]
async fn two_subscribers_each_receive_exactly_once() {
    let (base, _state) = spawn_gateway().await;

    let mut first = open_stream(&base, "alerts", "sub-a").await;
    let mut second = open_stream(&base, "alerts", "sub-b").await;

    let response = publish(&base, "alerts", "evt-1", "fan out").await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["delivered"], 2);

    assert_eq!(first.next_event().await, ("evt-1".into(), "fan out".into()));
    assert_eq!(second.next_event().await, ("evt-1".into(), "fan out".into()));

    // a second publish arrives next on both streams, so neither stream saw a
    // duplicate of the first event
    publish(&base, "alerts", "evt-2", "again").await;
    assert_eq!(first.next_event().await.0, "evt-2");
    assert_eq!(second.next_event().await.0, "evt-2");
}

#[tokio::test]
async fn publish_without_valid_token_never_reaches_dispatcher() {
    let (base, _state) = spawn_gateway().await;

    let mut reader = open_stream(&base, "alerts", "sub-auth").await;

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/publish"))
        .header("authorization", "Bearer wrong-key")
        .header("x-sse-topic", "alerts")
        .body("should not arrive")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = reqwest::Client::new()
        .post(format!("{base}/v1/publish"))
        .header("x-sse-topic", "alerts")
        .body("no token either")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // the first thing the subscriber sees is the authorized publish
    publish(&base, "alerts", "evt-ok", "made it").await;
    assert_eq!(reader.next_event().await.0, "evt-ok");
}

#[tokio::test]
async fn publish_with_no_subscribers_is_dropped_not_errored() {
    let (base, _state) = spawn_gateway().await;

    let response = publish(&base, "empty-topic", "evt-1", "anyone there?").await;
    assert_eq!(response.status(), 202);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "dropped");
    assert_eq!(body["delivered"], 0);
}

#[tokio::test]
async fn publish_validation_errors() {
    let (base, _state) = spawn_gateway_with(|b| b.max_payload_bytes(16)).await;
    let client = reqwest::Client::new();

    // missing topic header
    let response = client
        .post(format!("{base}/v1/publish"))
        .header("authorization", format!("Bearer {API_KEY}"))
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // empty topic header
    let response = client
        .post(format!("{base}/v1/publish"))
        .header("authorization", format!("Bearer {API_KEY}"))
        .header("x-sse-topic", "   ")
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // empty payload
    let response = client
        .post(format!("{base}/v1/publish"))
        .header("authorization", format!("Bearer {API_KEY}"))
        .header("x-sse-topic", "alerts")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // oversized payload
    let response = publish(&base, "alerts", "evt-big", &"x".repeat(17)).await;
    assert_eq!(response.status(), 413);
}

#[tokio::test]
async fn stream_requires_topic_and_token() {
    let (base, _state) = spawn_gateway().await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base}/v1/stream"))
        .header("x-sse-topic", "alerts")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .get(format!("{base}/v1/stream"))
        .header("authorization", format!("Bearer {API_KEY}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn subscriber_auth_can_be_disabled() {
    let (base, _state) = spawn_gateway_with(|b| b.subscriber_auth(false)).await;

    let response = reqwest::Client::new()
        .get(format!("{base}/v1/stream"))
        .header("x-sse-topic", "alerts")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn disconnected_subscriber_does_not_error_later_publishes() {
    let (base, state) = spawn_gateway().await;

    let reader = open_stream(&base, "alerts", "sub-gone").await;
    wait_for_connections(&state, 1).await;

    drop(reader);
    wait_for_connections(&state, 0).await;

    let response = publish(&base, "alerts", "evt-after", "anyone?").await;
    assert_eq!(response.status(), 202);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["delivered"], 0);
    assert_eq!(body["status"], "dropped");
}

#[tokio::test]
async fn reconnect_with_same_id_survives_old_stream_teardown() {
    let (base, state) = spawn_gateway().await;

    let first = open_stream(&base, "alerts", "sub-1").await;
    wait_for_connections(&state, 1).await;

    // reconnect under the same subscriber id, then abandon the old stream
    let mut second = open_stream(&base, "alerts", "sub-1").await;
    drop(first);

    // give the old stream's teardown time to fire; it must leave the
    // replacement registered
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(state.registry.connection_count(), 1);

    let response = publish(&base, "alerts", "evt-1", "after reconnect").await;
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "accepted");
    assert_eq!(body["delivered"], 1);

    let (id, data) = second.next_event().await;
    assert_eq!(id, "evt-1");
    assert_eq!(data, "after reconnect");
}

#[tokio::test]
async fn admin_pagination_tolerates_huge_page_numbers() {
    let (base, _state) = spawn_gateway().await;

    let _reader = open_stream(&base, "alerts", "sub-paged").await;

    let response = reqwest::Client::new()
        .get(format!(
            "{base}/v1/admin/connections?page={max}&pageSize={max}",
            max = usize::MAX
        ))
        .header("authorization", format!("Bearer {API_KEY}"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn health_and_admin_endpoints() {
    let (base, _state) = spawn_gateway().await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    // admin routes are key-gated
    let response = client
        .get(format!("{base}/v1/admin/topics"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let _reader = open_stream(&base, "alerts", "sub-admin").await;
    publish(&base, "alerts", "evt-1", "tail me").await;

    let body: serde_json::Value = client
        .get(format!("{base}/v1/admin/topics"))
        .header("authorization", format!("Bearer {API_KEY}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["data"][0]["topic"], "alerts");
    assert_eq!(body["data"][0]["connectionCount"], 1);

    let body: serde_json::Value = client
        .get(format!("{base}/v1/admin/connections"))
        .header("authorization", format!("Bearer {API_KEY}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"][0]["connectionId"], "sub-admin");
    assert_eq!(body["data"][0]["topic"], "alerts");

    let body: serde_json::Value = client
        .get(format!("{base}/v1/admin/topics/alerts/tail"))
        .header("authorization", format!("Bearer {API_KEY}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["topic"], "alerts");
    assert_eq!(body["events"][0]["id"], "evt-1");
    assert_eq!(body["events"][0]["payload"], "tail me");
}
