use std::time::Duration;

use tideway_gateway::ApiKeySet;

/// Gateway process configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub api_keys: ApiKeySet,
    pub subscriber_auth: bool,
    pub enable_admin: bool,
    pub queue_capacity: usize,
    pub max_payload_bytes: usize,
    pub heartbeat_interval: Duration,
    pub cleanup_interval: Duration,
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid value for {name}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(default)
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let api_keys = std::env::var("SSE_PUBLISHER_API_KEYS")
            .map(|raw| ApiKeySet::parse(&raw))
            .unwrap_or_default();

        Ok(Self {
            port: env_parsed("PORT", 8787)?,
            api_keys,
            subscriber_auth: env_flag("SSE_SUBSCRIBER_AUTH", true),
            enable_admin: env_flag("SSE_ENABLE_ADMIN", true),
            queue_capacity: env_parsed("SSE_QUEUE_CAPACITY", 128)?,
            max_payload_bytes: env_parsed("SSE_MAX_PAYLOAD_BYTES", 64 * 1024)?,
            heartbeat_interval: Duration::from_secs(env_parsed("SSE_HEARTBEAT_SECS", 15)?),
            cleanup_interval: Duration::from_secs(env_parsed("SSE_CLEANUP_SECS", 30)?),
        })
    }
}
