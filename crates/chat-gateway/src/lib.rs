//! # Chat Gateway
//!
//! A realtime chat gateway library: WebSocket clients on one side, a
//! topic-addressed pub/sub bus on the other.
//!
//! ## Features
//!
//! - **Pluggable Message Bus**: Implement `MessageBus` to bridge onto any pub/sub backend
//! - **Pluggable Backends**: Implement `ChatService` and `PresenceService` for remote services
//! - **One Session Per User**: A newer connection supersedes the older one
//! - **Bounded Delivery**: Slow clients are disconnected instead of buffering without limit
//! - **Presence Fanout**: Online/offline changes are pushed to every connected client
//! - **Built-in Server**: Optional Axum-based HTTP server with a WebSocket endpoint
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chat_gateway::{Gateway, MemoryBus};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Gateway::builder()
//!         .port(8080)
//!         .bus(MemoryBus::new())
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```
//!
//! ## Wire Protocol
//!
//! Every frame is a JSON text message `{"type": ..., "content": ...}`.
//!
//! | Direction | type | content |
//! |-----------|------|---------|
//! | client → gateway | `send_message` | `{"recipient_id", "message"}` |
//! | client → gateway | `get_online_users` | ignored |
//! | gateway → client | `new_message` | chat message |
//! | gateway → client | `online_users` | list of user ids |
//! | gateway → client | `user_status` | `{"user_id", "online", "timestamp"}` |
//!
//! ## Custom Message Bus
//!
//! ```rust,ignore
//! use chat_gateway::{BusHandler, MessageBus, Subscription, CancellationToken};
//! use async_trait::async_trait;
//!
//! struct MyBus;
//!
//! #[async_trait]
//! impl MessageBus for MyBus {
//!     async fn subscribe(&self, topic: &str, handler: BusHandler) -> chat_gateway::Result<Subscription> {
//!         let cancel = CancellationToken::new();
//!         // Deliver payloads to `handler` until `cancel` fires
//!         Ok(Subscription::new(topic, cancel))
//!     }
//!
//!     async fn publish(&self, topic: &str, payload: Vec<u8>) -> chat_gateway::Result<()> {
//!         Ok(())
//!     }
//!
//!     fn name(&self) -> &'static str { "MyBus" }
//! }
//! ```

mod bridge;
pub mod bus;
mod chat;
mod dispatcher;
mod error;
mod fanout;
pub mod frame;
mod hub;
mod lifecycle;
mod presence;
mod queue;
mod registry;
pub mod service;
mod session;

#[cfg(feature = "server")]
mod gateway;
#[cfg(feature = "server")]
mod handler;

// Re-exports
pub use bridge::BusBridge;
pub use bus::{BusHandler, MemoryBus, MessageBus, Subscription};
pub use chat::{BusChatService, DEFAULT_HISTORY_PER_CONVERSATION};
pub use dispatcher::CommandDispatcher;
pub use error::{Error, Result};
pub use fanout::{BroadcastOutcome, PresenceFanout};
pub use frame::{
    user_topic, ChatMessage, ClientCommand, Frame, FrameType, UserStatusEvent,
    USER_STATUS_TOPIC, USER_TOPIC_PREFIX,
};
pub use hub::Hub;
pub use lifecycle::{ConnectionLifecycle, Outbound};
pub use presence::MemoryPresence;
pub use queue::{DeliveryQueue, DeliveryReceiver, Enqueued, DEFAULT_QUEUE_CAPACITY};
pub use registry::SessionRegistry;
pub use service::{ChatService, PresenceRecord, PresenceService, DEFAULT_HISTORY_LIMIT};
pub use session::{CloseReason, Session, SessionState};

#[cfg(feature = "server")]
pub use gateway::{Gateway, GatewayBuilder};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
