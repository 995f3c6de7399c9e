mod config;

use chat_gateway::{Gateway, MemoryBus};
use chat_gateway_redis::RedisBus;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // rediss:// connections need a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        tracing::debug!("rustls crypto provider already installed");
    }

    let config = AppConfig::load()?;

    tracing::info!(
        instance_id = %config.server.instance_id,
        port = config.server.port,
        queue_capacity = config.server.queue_capacity,
        redis = ?config.bus.redis_url,
        "Gateway starting"
    );

    let builder = Gateway::builder()
        .port(config.server.port)
        .queue_capacity(config.server.queue_capacity);

    let builder = match config.bus.redis_url.as_deref() {
        Some(redis_url) => builder.bus(RedisBus::connect(redis_url).await?),
        None => {
            tracing::warn!("Redis not configured - using in-process bus, messages stay on this node");
            builder.bus(MemoryBus::new())
        }
    };

    builder.build()?.run().await
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "chat_gateway=info,chat_gateway_redis=info,chat_gateway_server=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
