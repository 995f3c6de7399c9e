//! In-memory presence store
//!
//! Tracks who is online and announces every transition on the
//! `users.status` topic, which the gateway fans out to all sessions.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::bus::MessageBus;
use crate::error::Result;
use crate::frame::{UserStatusEvent, USER_STATUS_TOPIC};
use crate::service::{PresenceRecord, PresenceService};

/// Presence store backed by a `DashMap`
#[derive(Clone)]
pub struct MemoryPresence {
    records: Arc<DashMap<String, PresenceRecord>>,
    bus: Arc<dyn MessageBus>,
}

impl MemoryPresence {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            bus,
        }
    }

    /// Mark everyone offline, announce it, and forget all records.
    ///
    /// For embedders that reuse one store across gateway restarts, so stale
    /// statuses do not linger.
    pub async fn reset(&self) {
        let user_ids: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        info!(users = user_ids.len(), "Clearing presence records");
        for user_id in user_ids {
            self.announce(&UserStatusEvent::now(user_id, false)).await;
        }
        self.records.clear();
    }

    fn record(&self, user_id: &str, online: bool) -> UserStatusEvent {
        let event = UserStatusEvent::now(user_id, online);
        self.records.insert(
            user_id.to_string(),
            PresenceRecord {
                user_id: user_id.to_string(),
                online,
                last_seen: event.timestamp,
            },
        );
        event
    }

    async fn announce(&self, event: &UserStatusEvent) {
        let payload = match serde_json::to_vec(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode status event");
                return;
            }
        };
        if let Err(e) = self.bus.publish(USER_STATUS_TOPIC, payload).await {
            warn!(error = %e, user_id = %event.user_id, "Failed to publish status event");
        }
    }
}

#[async_trait]
impl PresenceService for MemoryPresence {
    async fn set_online(&self, user_id: &str) -> Result<()> {
        let event = self.record(user_id, true);
        self.announce(&event).await;
        Ok(())
    }

    async fn set_offline(&self, user_id: &str) -> Result<()> {
        let event = self.record(user_id, false);
        self.announce(&event).await;
        Ok(())
    }

    async fn online_users(&self) -> Result<Vec<String>> {
        let mut users: Vec<String> = self
            .records
            .iter()
            .filter(|e| e.value().online)
            .map(|e| e.key().clone())
            .collect();
        users.sort();
        Ok(users)
    }

    async fn user_status(&self, user_id: &str) -> Result<PresenceRecord> {
        Ok(self
            .records
            .get(user_id)
            .map(|e| e.value().clone())
            .unwrap_or_else(|| PresenceRecord {
                user_id: user_id.to_string(),
                online: false,
                last_seen: Utc::now(),
            }))
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}
