//! # Tideway Gateway
//!
//! An in-memory Server-Sent-Events gateway core: publishers POST payloads to
//! a topic, the gateway fans each event out to every currently connected
//! subscriber on that topic, live only — no durable log, no replay.
//!
//! ## Protocol
//!
//! - `POST /v1/publish` with `Authorization: Bearer <key>`, `x-sse-topic` and
//!   optional `x-sse-id` headers; the raw body is the payload. Replies
//!   `202 Accepted` once the event is handed to the dispatcher.
//! - `GET /v1/stream` with `x-sse-topic` (and, by default, the same bearer
//!   key) opens a long-lived SSE response of `id:` / `data:` frames.
//!
//! Topics are implicit: they exist exactly while at least one subscriber is
//! connected. A publish to a topic with no subscribers is accepted and
//! dropped.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use tideway_gateway::{ApiKeySet, Gateway};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Gateway::builder()
//!         .port(8787)
//!         .api_keys(ApiKeySet::parse("dev-key"))
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```
//!
//! ## Backpressure
//!
//! Each connection owns a bounded delivery queue drained only by its own
//! write loop. When a slow consumer lets the queue fill, the oldest events
//! are dropped in favor of the newest (drop-oldest); the skip count is
//! tracked per connection, logged, and surfaced as a `: lagged n` comment
//! frame on the stream.

pub mod auth;
mod connection;
mod dispatcher;
mod encoder;
mod error;
mod event;
mod gateway;
pub mod handler;
mod registry;

// Re-exports
pub use auth::{bearer_token, ApiKeySet};
pub use connection::{ConnectionState, SubscriberConnection};
pub use dispatcher::EventDispatcher;
pub use encoder::{comment_frame, encode_frame};
pub use error::{Error, Result};
pub use event::Event;
pub use gateway::{router, Gateway, GatewayBuilder};
pub use handler::GatewayState;
pub use registry::{TailEvent, TopicRegistry, TAIL_BUFFER_SIZE};
