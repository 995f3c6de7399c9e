//! In-process chat backend
//!
//! Publishes each message on the recipient's and the sender's private topics
//! and keeps a bounded per-conversation history in memory.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::bus::MessageBus;
use crate::error::Result;
use crate::frame::{user_topic, ChatMessage};
use crate::service::{ChatService, DEFAULT_HISTORY_LIMIT};

/// Messages kept per conversation before the oldest are trimmed
pub const DEFAULT_HISTORY_PER_CONVERSATION: usize = 1000;

/// Chat backend that delivers over a [`MessageBus`]
#[derive(Clone)]
pub struct BusChatService {
    bus: Arc<dyn MessageBus>,
    /// Conversation key -> messages, oldest first
    history: Arc<DashMap<String, Vec<ChatMessage>>>,
    max_per_conversation: usize,
}

impl BusChatService {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self::with_history_capacity(bus, DEFAULT_HISTORY_PER_CONVERSATION)
    }

    pub fn with_history_capacity(bus: Arc<dyn MessageBus>, max_per_conversation: usize) -> Self {
        Self {
            bus,
            history: Arc::new(DashMap::new()),
            max_per_conversation,
        }
    }

    /// Same key regardless of which side is asking
    fn conversation_key(a: &str, b: &str) -> String {
        if a <= b {
            format!("{a}\u{0}{b}")
        } else {
            format!("{b}\u{0}{a}")
        }
    }

    fn store(&self, message: &ChatMessage) {
        let key = Self::conversation_key(&message.sender_id, &message.recipient_id);
        let max = self.max_per_conversation;
        let mut entries = self.history.entry(key).or_default();
        entries.push(message.clone());
        if entries.len() > max {
            let excess = entries.len() - max;
            entries.drain(0..excess);
        }
    }
}

#[async_trait]
impl ChatService for BusChatService {
    async fn send_message(&self, sender_id: &str, recipient_id: &str, body: &str) -> Result<String> {
        let message = ChatMessage {
            message_id: uuid::Uuid::new_v4().simple().to_string(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            content: body.to_string(),
            timestamp: Utc::now(),
        };
        let payload = serde_json::to_vec(&message)?;

        self.bus.publish(&user_topic(recipient_id), payload.clone()).await?;

        // Echo to the sender so their other view of the conversation updates.
        if sender_id != recipient_id {
            if let Err(e) = self.bus.publish(&user_topic(sender_id), payload).await {
                warn!(error = %e, sender_id, "Failed to publish message to sender");
            }
        }

        self.store(&message);
        debug!(message_id = %message.message_id, sender_id, recipient_id, "Message sent");
        Ok(message.message_id)
    }

    async fn message_history(
        &self,
        user_id1: &str,
        user_id2: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ChatMessage>> {
        let limit = if limit == 0 { DEFAULT_HISTORY_LIMIT } else { limit };
        let key = Self::conversation_key(user_id1, user_id2);
        let Some(entries) = self.history.get(&key) else {
            return Ok(vec![]);
        };
        Ok(entries.iter().rev().skip(offset).take(limit).cloned().collect())
    }

    fn name(&self) -> &'static str {
        "Bus"
    }
}
