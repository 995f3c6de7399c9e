//! Presence fanout: one status event to every registered session

use tracing::{debug, warn};

use crate::frame::{Frame, UserStatusEvent};
use crate::queue::Enqueued;
use crate::registry::SessionRegistry;

/// Per-broadcast delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

/// Broadcasts presence transitions to all sessions
#[derive(Clone)]
pub struct PresenceFanout {
    registry: SessionRegistry,
}

impl PresenceFanout {
    pub fn new(registry: SessionRegistry) -> Self {
        Self { registry }
    }

    /// Best-effort delivery to every session in a registry snapshot.
    ///
    /// A session whose queue is full is torn down by its own queue; the others
    /// still receive the event.
    pub fn broadcast(&self, event: &UserStatusEvent) -> BroadcastOutcome {
        let payload = match Frame::user_status(event).and_then(|frame| frame.encode()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode user_status frame");
                return BroadcastOutcome::default();
            }
        };

        let mut outcome = BroadcastOutcome::default();
        for session in self.registry.list_all() {
            match session.enqueue(payload.clone()) {
                Enqueued::Accepted => outcome.delivered += 1,
                Enqueued::Dropped => outcome.dropped += 1,
            }
        }

        debug!(
            user_id = %event.user_id,
            online = event.online,
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "Presence broadcast"
        );
        outcome
    }
}
