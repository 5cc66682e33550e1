mod config;

use tideway_gateway::Gateway;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load()?;

    tracing::info!(
        port = config.port,
        api_keys = config.api_keys.len(),
        subscriber_auth = config.subscriber_auth,
        admin = config.enable_admin,
        queue_capacity = config.queue_capacity,
        max_payload_bytes = config.max_payload_bytes,
        "tideway gateway starting"
    );

    Gateway::builder()
        .port(config.port)
        .api_keys(config.api_keys)
        .subscriber_auth(config.subscriber_auth)
        .admin(config.enable_admin)
        .queue_capacity(config.queue_capacity)
        .max_payload_bytes(config.max_payload_bytes)
        .heartbeat_interval(config.heartbeat_interval)
        .cleanup_interval(config.cleanup_interval)
        .build()?
        .run()
        .await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tideway=info,tideway_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
