//! Backend collaborators consumed by the gateway
//!
//! The gateway only calls these; it never owns their state. Every failure is
//! logged by the caller and treated as non-fatal.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::frame::ChatMessage;

/// Default page size for history queries
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// A user's presence as the presence backend sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: String,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

/// Chat backend
#[async_trait]
pub trait ChatService: Send + Sync + 'static {
    /// Send `body` from `sender_id` to `recipient_id`, returning the message id
    async fn send_message(&self, sender_id: &str, recipient_id: &str, body: &str) -> Result<String>;

    /// Conversation between two users, newest first.
    ///
    /// A `limit` of zero means [`DEFAULT_HISTORY_LIMIT`].
    async fn message_history(
        &self,
        user_id1: &str,
        user_id2: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>>;

    /// Return the service name (for logging)
    fn name(&self) -> &'static str;
}

/// Presence backend
#[async_trait]
pub trait PresenceService: Send + Sync + 'static {
    async fn set_online(&self, user_id: &str) -> Result<()>;

    async fn set_offline(&self, user_id: &str) -> Result<()>;

    async fn online_users(&self) -> Result<Vec<String>>;

    /// Last known status. Unknown users are reported offline.
    async fn user_status(&self, user_id: &str) -> Result<PresenceRecord>;

    /// Return the service name (for logging)
    fn name(&self) -> &'static str;
}
