//! Bus bridge: bus topics in, session delivery queues out

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::bus::{BusHandler, MessageBus, Subscription};
use crate::error::{Error, Result};
use crate::fanout::PresenceFanout;
use crate::frame::{user_topic, ChatMessage, Frame, UserStatusEvent, USER_STATUS_TOPIC};
use crate::registry::SessionRegistry;
use crate::session::Session;

/// Subscribes sessions and the presence fanout to their bus topics
#[derive(Clone)]
pub struct BusBridge {
    bus: Arc<dyn MessageBus>,
    registry: SessionRegistry,
    decode_failures: Arc<AtomicU64>,
}

impl BusBridge {
    pub fn new(bus: Arc<dyn MessageBus>, registry: SessionRegistry) -> Self {
        Self {
            bus,
            registry,
            decode_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    /// Bus payloads discarded because they did not decode
    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Subscribe the session's private topic and attach the handle to it.
    ///
    /// Must run before the session is registered. The handler only delivers
    /// while this exact session is the user's current one.
    pub async fn subscribe_session(&self, session: &Arc<Session>) -> Result<()> {
        let topic = user_topic(&session.user_id);
        let registry = self.registry.clone();
        let failures = self.decode_failures.clone();
        let user_id = session.user_id.clone();
        let connection_id = session.connection_id.clone();

        let handler: BusHandler = Arc::new(move |payload: &[u8]| {
            let frame = serde_json::from_slice::<ChatMessage>(payload)
                .map_err(Error::from)
                .and_then(|message| Frame::new_message(&message))
                .and_then(|frame| frame.encode());
            let encoded = match frame {
                Ok(encoded) => encoded,
                Err(e) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, user_id = %user_id, "Discarding malformed chat message");
                    return;
                }
            };
            if registry.deliver_to(&user_id, &connection_id, encoded).is_none() {
                debug!(user_id = %user_id, connection_id = %connection_id, "Session no longer current, message skipped");
            }
        });

        let subscription = self.bus.subscribe(&topic, handler).await?;
        session.attach_subscription(subscription);
        Ok(())
    }

    /// Subscribe the global presence topic. Call once per process.
    pub async fn subscribe_presence(&self, fanout: PresenceFanout) -> Result<Subscription> {
        let failures = self.decode_failures.clone();
        let handler: BusHandler = Arc::new(move |payload: &[u8]| {
            match serde_json::from_slice::<UserStatusEvent>(payload) {
                Ok(event) => {
                    fanout.broadcast(&event);
                }
                Err(e) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Discarding malformed status event");
                }
            }
        });

        let subscription = self.bus.subscribe(USER_STATUS_TOPIC, handler).await?;
        info!(topic = USER_STATUS_TOPIC, bus = self.bus.name(), "Presence fanout subscribed");
        Ok(subscription)
    }
}
