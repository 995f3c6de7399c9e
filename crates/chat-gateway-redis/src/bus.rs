//! Redis Pub/Sub message bus

use anyhow::Context;
use async_trait::async_trait;
use chat_gateway::{BusHandler, MessageBus, Subscription};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Redis Pub/Sub message bus
///
/// Publishes go through a shared, auto-reconnecting connection. Each
/// subscription gets its own pub/sub connection, so releasing one topic never
/// disturbs another.
///
/// # Topic Naming
///
/// - `chat.messages.{user_id}` - Messages for one user
/// - `users.status` - Presence changes
///
/// # Example
///
/// ```rust,ignore
/// use chat_gateway::Gateway;
/// use chat_gateway_redis::RedisBus;
///
/// Gateway::builder()
///     .bus(RedisBus::connect("redis://localhost:6379").await?)
///     .build()?
///     .run()
///     .await
/// ```
pub struct RedisBus {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisBus {
    /// Connect to Redis. Fails if the server is unreachable.
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url).context("Invalid Redis URL")?;
        let publisher = client
            .get_connection_manager()
            .await
            .context("Failed to connect to Redis")?;

        info!(url = %redis_url, "Connected to Redis");
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn subscribe(&self, topic: &str, handler: BusHandler) -> chat_gateway::Result<Subscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .context("Failed to open Redis pub/sub connection")?;

        // SUBSCRIBE is acknowledged before this returns, so the topic is live.
        pubsub
            .subscribe(topic)
            .await
            .with_context(|| format!("Failed to subscribe to {}", topic))?;

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let channel = topic.to_string();

        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = stream.next() => {
                        match msg {
                            Some(msg) => handler(msg.get_payload_bytes()),
                            None => {
                                warn!(topic = %channel, "Redis stream ended");
                                break;
                            }
                        }
                    }
                }
            }

            // Dropping the stream closes the dedicated connection.
            debug!(topic = %channel, "Redis subscription stopped");
        });

        debug!(topic, "Subscribed");
        Ok(Subscription::new(topic, cancel))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> chat_gateway::Result<()> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn
            .publish(topic, payload)
            .await
            .with_context(|| format!("Failed to publish to {}", topic))?;

        debug!(topic, receivers, "Published");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Redis Pub/Sub"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = RedisBus::connect("not-a-redis-url").await;
        assert!(result.is_err());
    }
}
