//! HTTP handlers for the event gateway

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::auth::{bearer_token, ApiKeySet};
use crate::connection::ConnectionState;
use crate::dispatcher::EventDispatcher;
use crate::encoder::{comment_frame, encode_frame};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::registry::{TailEvent, TopicRegistry};

const TOPIC_HEADER: &str = "x-sse-topic";
const ID_HEADER: &str = "x-sse-id";

const DEFAULT_PAGE_SIZE: usize = 100;
const MAX_PAGE_SIZE: usize = 500;
const DEFAULT_TAIL_LIMIT: usize = 20;
const MAX_TAIL_LIMIT: usize = 500;

/// Shared state for handlers
#[derive(Clone)]
pub struct GatewayState {
    pub registry: TopicRegistry,
    pub dispatcher: EventDispatcher,
    pub api_keys: ApiKeySet,
    /// Whether `/v1/stream` requires the same bearer key as publish
    pub subscriber_auth: bool,
    pub max_payload_bytes: usize,
}

fn topic_header(headers: &HeaderMap) -> Result<String> {
    let raw = headers
        .get(TOPIC_HEADER)
        .ok_or_else(|| Error::BadRequest("x-sse-topic header is required".into()))?;
    let topic = raw
        .to_str()
        .map_err(|_| Error::BadRequest("x-sse-topic header is not valid UTF-8".into()))?
        .trim();
    if topic.is_empty() {
        return Err(Error::BadRequest(
            "x-sse-topic contains empty topic value".into(),
        ));
    }
    Ok(topic.to_string())
}

fn id_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// ============== Publish ==============

#[derive(Serialize)]
pub struct PublishResponse {
    pub status: &'static str,
    pub id: String,
    pub delivered: usize,
}

/// `POST /v1/publish`
///
/// Accepts a payload into the delivery pipeline and replies 202 immediately;
/// it never waits for subscriber consumption. Zero subscribers on the topic
/// means the event is dropped, reported as `status: "dropped"` but still 202.
pub async fn publish(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    state.api_keys.validate(bearer_token(&headers))?;

    let topic = topic_header(&headers)?;
    let id = id_header(&headers).unwrap_or_else(Event::generate_id);

    if body.len() > state.max_payload_bytes {
        return Err(Error::PayloadTooLarge {
            limit: state.max_payload_bytes,
        });
    }
    if body.is_empty() {
        // An empty payload would produce a frame the reference subscriber
        // parser can never flush, so it is rejected up front.
        return Err(Error::BadRequest("payload must not be empty".into()));
    }
    let payload = String::from_utf8(body.to_vec())
        .map_err(|_| Error::BadRequest("payload is not valid UTF-8".into()))?;

    let delivered = state.dispatcher.dispatch(Event::new(topic, id.clone(), payload));
    let status = if delivered > 0 { "accepted" } else { "dropped" };

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            status,
            id,
            delivered,
        }),
    ))
}

// ============== Stream ==============

/// `GET /v1/stream`
///
/// Registers a subscriber connection and streams SSE frames until the client
/// disconnects. The response body stream is the connection's write loop: it
/// is the sole consumer of the delivery queue, so per-connection delivery
/// order equals dispatch order. Dropping the stream (client gone or server
/// shutdown) is the only teardown path and deregisters the connection.
pub async fn stream(State(state): State<GatewayState>, headers: HeaderMap) -> Response {
    if state.subscriber_auth {
        if let Err(err) = state.api_keys.validate(bearer_token(&headers)) {
            tracing::warn!("stream connection denied");
            return err.into_response();
        }
    }

    let topic = match topic_header(&headers) {
        Ok(topic) => topic,
        Err(err) => return err.into_response(),
    };
    let subscriber_id = id_header(&headers);

    let (connection, receiver) = state.registry.register(topic.clone(), subscriber_id);
    let connection_id = connection.id.clone();

    tracing::info!(
        connection_id = %connection_id,
        topic = %topic,
        "new stream connection"
    );

    let connected = stream::once(std::future::ready(Ok::<_, Infallible>(Bytes::from(
        comment_frame(&format!("connected {connection_id}")),
    ))));

    let lag_connection = connection.clone();
    let events = BroadcastStream::new(receiver).map(move |result| match result {
        Ok(event) => Ok(Bytes::from(encode_frame(&event))),
        Err(BroadcastStreamRecvError::Lagged(skipped)) => {
            lag_connection.record_lag(skipped);
            let err = Error::SlowConsumer { dropped: skipped };
            tracing::warn!(
                connection_id = %lag_connection.id,
                topic = %lag_connection.topic,
                error = %err,
                "oldest events dropped"
            );
            Ok(Bytes::from(comment_frame(&format!("lagged {skipped}"))))
        }
    });

    let heartbeats = BroadcastStream::new(state.registry.subscribe_heartbeat())
        .filter_map(|r| std::future::ready(r.ok()))
        .map(|ts| Ok(Bytes::from(comment_frame(&format!("keep-alive {ts}")))));

    let merged = connected.chain(stream::select(events, heartbeats));

    let registry = state.registry.clone();
    let cleanup_connection = connection.clone();
    let final_stream = CleanupStream {
        inner: Box::pin(merged),
        cleanup: Some(Box::new(move || {
            cleanup_connection.set_state(ConnectionState::Closing);
            tracing::info!(
                connection_id = %cleanup_connection.id,
                topic = %cleanup_connection.topic,
                lagged = cleanup_connection.lagged_total(),
                "stream connection closed"
            );
            registry.unregister_connection(&cleanup_connection);
        })),
    };

    (
        [
            (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache, no-transform"),
        ],
        Body::from_stream(final_stream),
    )
        .into_response()
}

/// Runs its teardown closure when the response stream is dropped, which is
/// how client disconnects (and server shutdown) deregister the connection.
struct CleanupStream<S> {
    inner: Pin<Box<S>>,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
}

impl<S> Drop for CleanupStream<S> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

impl<S: Stream> Stream for CleanupStream<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

// ============== Health ==============

pub async fn healthz() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============== Admin ==============

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageParams {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl PageParams {
    fn resolve(&self) -> (usize, usize) {
        let page = self.page.filter(|p| *p > 0).unwrap_or(1);
        let page_size = self
            .page_size
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);
        (page, page_size)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub data: Vec<T>,
}

fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Paged<T> {
    let total = items.len();
    // Saturating: page is client input and page * page_size can exceed usize.
    let data = items
        .into_iter()
        .skip(page.saturating_sub(1).saturating_mul(page_size))
        .take(page_size)
        .collect();
    Paged {
        page,
        page_size,
        total,
        data,
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicInfo {
    pub topic: String,
    pub connection_count: usize,
}

/// `GET /v1/admin/topics`
pub async fn list_topics(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Result<Json<Paged<TopicInfo>>> {
    state.api_keys.validate(bearer_token(&headers))?;

    let (page, page_size) = params.resolve();
    let mut topics: Vec<TopicInfo> = state
        .registry
        .topics()
        .into_iter()
        .map(|(topic, connection_count)| TopicInfo {
            topic,
            connection_count,
        })
        .collect();
    topics.sort_by(|a, b| a.topic.cmp(&b.topic));

    Ok(Json(paginate(topics, page, page_size)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub connection_id: String,
    pub topic: String,
    pub connected_at: String,
    pub lagged: u64,
}

/// `GET /v1/admin/connections`
pub async fn list_connections(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(params): Query<PageParams>,
) -> Result<Json<Paged<ConnectionInfo>>> {
    state.api_keys.validate(bearer_token(&headers))?;

    let (page, page_size) = params.resolve();
    let mut connections: Vec<ConnectionInfo> = state
        .registry
        .list_connections()
        .into_iter()
        .map(|c| ConnectionInfo {
            connection_id: c.id.clone(),
            topic: c.topic.clone(),
            connected_at: c.connected_at.to_rfc3339(),
            lagged: c.lagged_total(),
        })
        .collect();
    connections.sort_by(|a, b| a.connection_id.cmp(&b.connection_id));

    Ok(Json(paginate(connections, page, page_size)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TailParams {
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct TailResponse {
    pub topic: String,
    pub events: Vec<TailEvent>,
}

/// `GET /v1/admin/topics/{topic}/tail`
pub async fn tail_topic(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(topic): Path<String>,
    Query(params): Query<TailParams>,
) -> Result<Json<TailResponse>> {
    state.api_keys.validate(bearer_token(&headers))?;

    let limit = params
        .limit
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_TAIL_LIMIT)
        .min(MAX_TAIL_LIMIT);

    Ok(Json(TailResponse {
        events: state.dispatcher.tail(&topic, limit),
        topic,
    }))
}
