//! Error types for the event gateway

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the gateway
#[derive(Error, Debug)]
pub enum Error {
    /// Bearer token missing or not recognized
    #[error("unauthorized")]
    Unauthorized,

    /// Malformed request (missing/empty topic, empty or non-UTF-8 payload)
    #[error("{0}")]
    BadRequest(String),

    /// Publish body exceeds the configured maximum
    #[error("payload exceeds maximum of {limit} bytes")]
    PayloadTooLarge { limit: usize },

    /// A subscriber queue overflowed. Internal only, never returned to a
    /// publisher; the stream's write loop logs it and the connection keeps
    /// the newest events (drop-oldest policy).
    #[error("slow consumer: {dropped} events dropped")]
    SlowConsumer { dropped: u64 },

    /// Normal stream teardown signal, not a failure
    #[error("connection closed")]
    ConnectionClosed,
}

impl Error {
    fn status(&self) -> StatusCode {
        match self {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::BadRequest(_) => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Error::SlowConsumer { .. } | Error::ConnectionClosed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = axum::Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
