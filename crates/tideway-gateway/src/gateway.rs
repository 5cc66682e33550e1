//! Gateway builder and runner

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::auth::ApiKeySet;
use crate::dispatcher::EventDispatcher;
use crate::handler::{self, GatewayState};
use crate::registry::TopicRegistry;

/// Gateway configuration and runner
pub struct Gateway {
    port: u16,
    state: GatewayState,
    enable_admin: bool,
    heartbeat_interval: Duration,
    cleanup_interval: Duration,
}

impl Gateway {
    /// Create a new gateway builder
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// Shared handler state, mainly useful for wiring custom routers in tests.
    pub fn state(&self) -> GatewayState {
        self.state.clone()
    }

    /// Run the gateway server until ctrl-c / SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();

        tracing::info!(
            port = self.port,
            api_keys = self.state.api_keys.len(),
            subscriber_auth = self.state.subscriber_auth,
            "starting gateway"
        );

        // Heartbeat task: keep-alive comment frames double as dead-socket
        // detection, since writing to a closed connection drops its stream.
        let heartbeat_registry = self.state.registry.clone();
        let heartbeat_cancel = cancel.clone();
        let heartbeat_interval = self.heartbeat_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            loop {
                tokio::select! {
                    _ = heartbeat_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        heartbeat_registry.send_heartbeat();
                    }
                }
            }
        });

        // Cleanup task for connections that died without a clean teardown
        let cleanup_registry = self.state.registry.clone();
        let cleanup_cancel = cancel.clone();
        let cleanup_interval = self.cleanup_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cleanup_interval);
            loop {
                tokio::select! {
                    _ = cleanup_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let before = cleanup_registry.connection_count();
                        cleanup_registry.cleanup_dead_connections();
                        let after = cleanup_registry.connection_count();
                        tracing::debug!(
                            connections = after,
                            cleaned = before.saturating_sub(after),
                            "connection cleanup"
                        );
                    }
                }
            }
        });

        let app = router(self.state, self.enable_admin);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        let cancel_for_shutdown = cancel.clone();
        let shutdown_signal = async move {
            let ctrl_c = async {
                tokio::signal::ctrl_c()
                    .await
                    .expect("failed to install ctrl-c handler");
            };

            #[cfg(unix)]
            let terminate = async {
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler")
                    .recv()
                    .await;
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::info!("received ctrl-c"),
                _ = terminate => tracing::info!("received SIGTERM"),
            }

            cancel_for_shutdown.cancel();
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        cancel.cancel();
        tracing::info!("gateway shutdown complete");
        Ok(())
    }
}

/// Assemble the gateway router around a shared state.
pub fn router(state: GatewayState, enable_admin: bool) -> Router {
    let mut app = Router::new()
        .route("/healthz", get(handler::healthz))
        .route("/v1/stream", get(handler::stream))
        .route("/v1/publish", post(handler::publish));

    if enable_admin {
        app = app
            .route("/v1/admin/topics", get(handler::list_topics))
            .route("/v1/admin/connections", get(handler::list_connections))
            .route("/v1/admin/topics/{topic}/tail", get(handler::tail_topic));
    }

    app.layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Builder for Gateway
pub struct GatewayBuilder {
    port: u16,
    api_keys: ApiKeySet,
    subscriber_auth: bool,
    enable_admin: bool,
    queue_capacity: usize,
    max_payload_bytes: usize,
    heartbeat_interval: Duration,
    cleanup_interval: Duration,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            port: 8787,
            api_keys: ApiKeySet::default(),
            subscriber_auth: true,
            enable_admin: true,
            queue_capacity: 128,
            max_payload_bytes: 64 * 1024,
            heartbeat_interval: Duration::from_secs(15),
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

impl GatewayBuilder {
    /// Set the server port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the accepted publisher API keys
    pub fn api_keys(mut self, keys: ApiKeySet) -> Self {
        self.api_keys = keys;
        self
    }

    /// Require the bearer key on `/v1/stream` as well as `/v1/publish`
    /// (enabled by default)
    pub fn subscriber_auth(mut self, enforce: bool) -> Self {
        self.subscriber_auth = enforce;
        self
    }

    /// Enable or disable the admin API routes
    pub fn admin(mut self, enable: bool) -> Self {
        self.enable_admin = enable;
        self
    }

    /// Per-connection delivery queue capacity; on overflow the oldest queued
    /// events are dropped
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Maximum accepted publish body size in bytes
    pub fn max_payload_bytes(mut self, limit: usize) -> Self {
        self.max_payload_bytes = limit;
        self
    }

    /// Set the keep-alive interval for open streams
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the dead-connection sweep interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Build the gateway
    pub fn build(self) -> anyhow::Result<Gateway> {
        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be at least 1");
        }
        if self.max_payload_bytes == 0 {
            anyhow::bail!("max_payload_bytes must be at least 1");
        }
        if self.api_keys.is_empty() {
            tracing::warn!("no publisher API keys configured, every publish will be rejected");
        }

        let registry = TopicRegistry::new(self.queue_capacity);
        let dispatcher = EventDispatcher::new(registry.clone());

        Ok(Gateway {
            port: self.port,
            state: GatewayState {
                registry,
                dispatcher,
                api_keys: self.api_keys,
                subscriber_auth: self.subscriber_auth,
                max_payload_bytes: self.max_payload_bytes,
            },
            enable_admin: self.enable_admin,
            heartbeat_interval: self.heartbeat_interval,
            cleanup_interval: self.cleanup_interval,
        })
    }
}
