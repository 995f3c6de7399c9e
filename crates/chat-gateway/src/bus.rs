//! Message bus trait and the in-process implementation
//!
//! Implement `MessageBus` to bridge the gateway onto any topic-addressed,
//! fire-and-forget pub/sub system.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;

/// Callback invoked for every payload published on a subscribed topic.
///
/// Runs on the bus's own dispatch context, so it must not block.
pub type BusHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// Handle to a live topic subscription
///
/// Releasing is idempotent and may happen from any task. Dropping the handle
/// releases it too.
pub struct Subscription {
    topic: String,
    cancel: CancellationToken,
    on_release: Mutex<Option<ReleaseHook>>,
}

impl Subscription {
    /// Create a handle whose release cancels `cancel`
    pub fn new(topic: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            topic: topic.into(),
            cancel,
            on_release: Mutex::new(None),
        }
    }

    /// Like [`Subscription::new`], also running `hook` once on release
    pub fn with_release_hook(
        topic: impl Into<String>,
        cancel: CancellationToken,
        hook: impl FnOnce() + Send + 'static,
    ) -> Self {
        let subscription = Self::new(topic, cancel);
        *subscription.on_release.lock() = Some(Box::new(hook));
        subscription
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stop delivering to this subscription's handler
    pub fn unsubscribe(&self) {
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
            debug!(topic = %self.topic, "Unsubscribed");
        }
        self.run_release_hook();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    fn run_release_hook(&self) {
        // Taken before running so the hook never executes under the lock.
        let hook = self.on_release.lock().take();
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.run_release_hook();
    }
}

/// Trait for pub/sub buses
///
/// # Example
///
/// ```rust,ignore
/// use chat_gateway::{BusHandler, MessageBus, Subscription};
/// use async_trait::async_trait;
///
/// struct MyBus;
///
/// #[async_trait]
/// impl MessageBus for MyBus {
///     async fn subscribe(&self, topic: &str, handler: BusHandler) -> chat_gateway::Result<Subscription> {
///         // Register `handler` with your client, return a handle whose
///         // cancellation stops delivery.
///         todo!()
///     }
///
///     async fn publish(&self, topic: &str, payload: Vec<u8>) -> chat_gateway::Result<()> {
///         todo!()
///     }
///
///     fn name(&self) -> &'static str { "MyBus" }
/// }
/// ```
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Subscribe `handler` to `topic`.
    ///
    /// When this returns `Ok`, the subscription is live: anything published to
    /// the topic afterwards reaches the handler.
    async fn subscribe(&self, topic: &str, handler: BusHandler) -> Result<Subscription>;

    /// Publish a payload. At-most-once, no acknowledgement.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()>;

    /// Return the bus name (for logging)
    fn name(&self) -> &'static str;
}

struct Subscriber {
    cancel: CancellationToken,
    handler: BusHandler,
}

/// In-process bus for single-node deployments and tests
///
/// `publish` runs the live handlers of the topic inline, in subscription
/// order, on the publisher's task. Released subscriptions are removed from
/// the topic table as soon as they are released.
#[derive(Clone, Default)]
pub struct MemoryBus {
    topics: Arc<DashMap<String, Vec<Subscriber>>>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscriber entries held for a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|subs| subs.len()).unwrap_or(0)
    }

    /// Topics with at least one subscriber entry
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    fn prune(&self, topic: &str) {
        prune_topic(&self.topics, topic);
    }
}

fn prune_topic(topics: &DashMap<String, Vec<Subscriber>>, topic: &str) {
    let mut released = Vec::new();
    topics.remove_if_mut(topic, |_, subs| {
        let (live, dead): (Vec<_>, Vec<_>) = std::mem::take(subs)
            .into_iter()
            .partition(|s| !s.cancel.is_cancelled());
        *subs = live;
        released = dead;
        subs.is_empty()
    });
    // Handlers may own sessions; drop them after the shard lock is gone.
    drop(released);
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn subscribe(&self, topic: &str, handler: BusHandler) -> Result<Subscription> {
        let cancel = CancellationToken::new();
        self.topics
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                cancel: cancel.clone(),
                handler,
            });
        debug!(topic, "Subscribed");

        let topics: Weak<DashMap<String, Vec<Subscriber>>> = Arc::downgrade(&self.topics);
        let name = topic.to_string();
        Ok(Subscription::with_release_hook(topic, cancel, move || {
            if let Some(topics) = topics.upgrade() {
                prune_topic(&topics, &name);
            }
        }))
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        // Handlers are collected first so none runs while the shard is locked.
        let handlers: Vec<BusHandler> = self
            .topics
            .get(topic)
            .map(|subs| {
                subs.iter()
                    .filter(|s| !s.cancel.is_cancelled())
                    .map(|s| s.handler.clone())
                    .collect()
            })
            .unwrap_or_default();

        for handler in &handlers {
            handler(&payload);
        }

        self.prune(topic);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}
