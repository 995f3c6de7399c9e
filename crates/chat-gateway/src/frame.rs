//! Wire frames and bus event records
//!
//! Both directions of the client protocol use the same envelope:
//! `{"type": "...", "content": ...}`. Bus payloads are JSON-encoded
//! [`ChatMessage`] and [`UserStatusEvent`] records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Global presence topic, subscribed once per process
pub const USER_STATUS_TOPIC: &str = "users.status";

/// Prefix of the per-user private topics
pub const USER_TOPIC_PREFIX: &str = "chat.messages.";

/// Private bus topic for one user
pub fn user_topic(user_id: &str) -> String {
    format!("{USER_TOPIC_PREFIX}{user_id}")
}

/// Frame type names used on the wire.
pub struct FrameType;

impl FrameType {
    pub const SEND_MESSAGE: &'static str = "send_message";
    pub const GET_ONLINE_USERS: &'static str = "get_online_users";
    pub const NEW_MESSAGE: &'static str = "new_message";
    pub const ONLINE_USERS: &'static str = "online_users";
    pub const USER_STATUS: &'static str = "user_status";
}

/// A chat message record as published by the chat backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A presence transition published on [`USER_STATUS_TOPIC`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserStatusEvent {
    pub user_id: String,
    pub online: bool,
    pub timestamp: DateTime<Utc>,
}

impl UserStatusEvent {
    pub fn now(user_id: impl Into<String>, online: bool) -> Self {
        Self {
            user_id: user_id.into(),
            online,
            timestamp: Utc::now(),
        }
    }
}

/// The `{type, content}` envelope exchanged with clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: Value,
}

impl Frame {
    pub fn new(kind: impl Into<String>, content: Value) -> Self {
        Self {
            kind: kind.into(),
            content,
        }
    }

    /// `new_message` carrying a chat message record
    pub fn new_message(message: &ChatMessage) -> Result<Self> {
        Ok(Self::new(FrameType::NEW_MESSAGE, serde_json::to_value(message)?))
    }

    /// `online_users` carrying a list of user ids
    pub fn online_users(user_ids: Vec<String>) -> Self {
        Self::new(FrameType::ONLINE_USERS, Value::from(user_ids))
    }

    /// `user_status` carrying a presence transition
    pub fn user_status(event: &UserStatusEvent) -> Result<Self> {
        Ok(Self::new(FrameType::USER_STATUS, serde_json::to_value(event)?))
    }

    /// Serialize to the text payload written to the socket
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Deserialize)]
struct SendMessageContent {
    recipient_id: String,
    message: String,
}

/// Commands a client may send
///
/// Unrecognized `type` values are kept as [`ClientCommand::Unknown`] so newer
/// clients do not break older gateways.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    SendMessage { recipient_id: String, body: String },
    GetOnlineUsers,
    Unknown(String),
}

impl ClientCommand {
    /// Decode one inbound text frame
    pub fn parse(text: &str) -> Result<Self> {
        let frame: Frame = serde_json::from_str(text)?;
        match frame.kind.as_str() {
            FrameType::SEND_MESSAGE => {
                let content: SendMessageContent = serde_json::from_value(frame.content)?;
                if content.recipient_id.is_empty() {
                    return Err(Error::Decode(serde::de::Error::custom("recipient_id is empty")));
                }
                Ok(Self::SendMessage {
                    recipient_id: content.recipient_id,
                    body: content.message,
                })
            }
            FrameType::GET_ONLINE_USERS => Ok(Self::GetOnlineUsers),
            _ => Ok(Self::Unknown(frame.kind)),
        }
    }
}
