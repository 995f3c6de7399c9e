//! Wiring of registry, bridge, fanout, dispatcher and lifecycle

use std::sync::Arc;

use crate::bridge::BusBridge;
use crate::bus::{MessageBus, Subscription};
use crate::dispatcher::CommandDispatcher;
use crate::error::Result;
use crate::fanout::PresenceFanout;
use crate::lifecycle::ConnectionLifecycle;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::registry::SessionRegistry;
use crate::service::{ChatService, PresenceService};

/// Everything a gateway process shares between connections
///
/// Cheap to clone; all clones see the same registry.
#[derive(Clone)]
pub struct Hub {
    registry: SessionRegistry,
    bridge: BusBridge,
    fanout: PresenceFanout,
    lifecycle: ConnectionLifecycle,
    chat: Arc<dyn ChatService>,
    presence: Arc<dyn PresenceService>,
}

impl Hub {
    /// Create a hub with the default queue capacity
    pub fn new(
        bus: Arc<dyn MessageBus>,
        chat: Arc<dyn ChatService>,
        presence: Arc<dyn PresenceService>,
    ) -> Self {
        Self::with_queue_capacity(bus, chat, presence, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(
        bus: Arc<dyn MessageBus>,
        chat: Arc<dyn ChatService>,
        presence: Arc<dyn PresenceService>,
        queue_capacity: usize,
    ) -> Self {
        let registry = SessionRegistry::new();
        let bridge = BusBridge::new(bus, registry.clone());
        let fanout = PresenceFanout::new(registry.clone());
        let dispatcher = CommandDispatcher::new(chat.clone(), presence.clone());
        let lifecycle = ConnectionLifecycle::new(
            registry.clone(),
            bridge.clone(),
            dispatcher,
            presence.clone(),
            queue_capacity,
        );
        Self {
            registry,
            bridge,
            fanout,
            lifecycle,
            chat,
            presence,
        }
    }

    /// Subscribe the presence fanout to `users.status`.
    ///
    /// Keep the returned handle alive for as long as the gateway runs.
    pub async fn start_presence_fanout(&self) -> Result<Subscription> {
        self.bridge.subscribe_presence(self.fanout.clone()).await
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn bridge(&self) -> &BusBridge {
        &self.bridge
    }

    pub fn fanout(&self) -> &PresenceFanout {
        &self.fanout
    }

    pub fn lifecycle(&self) -> &ConnectionLifecycle {
        &self.lifecycle
    }

    pub fn chat(&self) -> &Arc<dyn ChatService> {
        &self.chat
    }

    pub fn presence(&self) -> &Arc<dyn PresenceService> {
        &self.presence
    }
}
