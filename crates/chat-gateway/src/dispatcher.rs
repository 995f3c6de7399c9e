//! Inbound command dispatch

use std::sync::Arc;

use tracing::{debug, warn};

use crate::frame::{ClientCommand, Frame};
use crate::service::{ChatService, PresenceService};
use crate::session::Session;

/// Routes client commands to the chat and presence backends
#[derive(Clone)]
pub struct CommandDispatcher {
    chat: Arc<dyn ChatService>,
    presence: Arc<dyn PresenceService>,
}

impl CommandDispatcher {
    pub fn new(chat: Arc<dyn ChatService>, presence: Arc<dyn PresenceService>) -> Self {
        Self { chat, presence }
    }

    /// Handle one inbound text frame from `session`.
    ///
    /// Nothing here ends the session: malformed frames, unknown commands and
    /// backend failures are logged and dropped.
    pub async fn dispatch(&self, session: &Arc<Session>, text: &str) {
        let command = match ClientCommand::parse(text) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, user_id = %session.user_id, "Ignoring malformed frame");
                return;
            }
        };

        match command {
            ClientCommand::SendMessage { recipient_id, body } => {
                match self.chat.send_message(&session.user_id, &recipient_id, &body).await {
                    Ok(message_id) => {
                        debug!(user_id = %session.user_id, recipient_id = %recipient_id, message_id = %message_id, "Message sent")
                    }
                    Err(e) => {
                        warn!(error = %e, user_id = %session.user_id, recipient_id = %recipient_id, "Failed to send message")
                    }
                }
            }
            ClientCommand::GetOnlineUsers => {
                let users = match self.presence.online_users().await {
                    Ok(users) => users,
                    Err(e) => {
                        warn!(error = %e, user_id = %session.user_id, "Failed to get online users");
                        return;
                    }
                };
                let others: Vec<String> = users.into_iter().filter(|id| *id != session.user_id).collect();
                match Frame::online_users(others).encode() {
                    Ok(payload) => {
                        session.enqueue(payload);
                    }
                    Err(e) => warn!(error = %e, "Failed to encode online_users frame"),
                }
            }
            ClientCommand::Unknown(kind) => {
                debug!(user_id = %session.user_id, kind = %kind, "Ignoring unknown command");
            }
        }
    }
}
