//! Per-user session state

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus::Subscription;
use crate::queue::{DeliveryQueue, DeliveryReceiver, Enqueued};

/// Where a connection is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a session ended. The first recorded reason wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client closed the socket or the stream ended
    ClientClosed,
    /// Read or write failed
    TransportError,
    /// A newer connection for the same user replaced this one
    Superseded,
    /// The delivery queue overflowed
    SlowConsumer,
    /// The gateway is shutting down
    Shutdown,
}

impl CloseReason {
    /// WebSocket close code sent to the client
    pub fn code(self) -> u16 {
        match self {
            CloseReason::ClientClosed => 1000,
            CloseReason::Shutdown => 1001,
            CloseReason::TransportError => 1011,
            CloseReason::SlowConsumer => 1008,
            CloseReason::Superseded => 4000,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "client closed",
            CloseReason::TransportError => "transport error",
            CloseReason::Superseded => "superseded by a newer connection",
            CloseReason::SlowConsumer => "client too slow",
            CloseReason::Shutdown => "gateway shutting down",
        }
    }
}

/// One logical user's live connection
///
/// Owns the delivery queue producer, the private topic subscription and the
/// shutdown signal that ends both connection loops.
#[derive(Debug)]
pub struct Session {
    /// Unique per connection, distinguishes a user's successive sessions
    pub connection_id: String,
    pub user_id: String,
    pub connected_at: DateTime<Utc>,
    queue: DeliveryQueue,
    shutdown: CancellationToken,
    subscription: Mutex<Option<Subscription>>,
    state: Mutex<SessionState>,
    close_reason: Mutex<Option<CloseReason>>,
}

impl Session {
    /// Create a session in `Connecting` with a queue of `capacity` frames
    pub fn new(user_id: impl Into<String>, capacity: usize) -> (Arc<Self>, DeliveryReceiver) {
        let shutdown = CancellationToken::new();
        let (queue, receiver) = DeliveryQueue::new(capacity, shutdown.clone());
        let session = Self {
            connection_id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            connected_at: Utc::now(),
            queue,
            shutdown,
            subscription: Mutex::new(None),
            state: Mutex::new(SessionState::Connecting),
            close_reason: Mutex::new(None),
        };
        (Arc::new(session), receiver)
    }

    /// Push an encoded frame. Overflow closes the session.
    pub fn enqueue(&self, payload: String) -> Enqueued {
        let outcome = self.queue.enqueue(payload);
        if outcome == Enqueued::Dropped {
            self.close(CloseReason::SlowConsumer);
        }
        outcome
    }

    /// Tear the session down: stop both loops and release the subscription.
    ///
    /// Safe to call repeatedly and from any task.
    pub fn close(&self, reason: CloseReason) {
        {
            let mut current = self.close_reason.lock();
            if current.is_none() {
                *current = Some(reason);
                debug!(
                    user_id = %self.user_id,
                    connection_id = %self.connection_id,
                    reason = reason.as_str(),
                    "Closing session"
                );
            }
        }
        self.shutdown.cancel();
        self.release_subscription();
    }

    /// Resolves once the session has been closed
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Hand over the private topic subscription.
    ///
    /// A session that is already closed releases it immediately.
    pub fn attach_subscription(&self, subscription: Subscription) {
        let mut slot = self.subscription.lock();
        if self.is_closed() {
            subscription.unsubscribe();
            return;
        }
        *slot = Some(subscription);
    }

    pub fn release_subscription(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.unsubscribe();
        }
    }

    pub fn has_subscription(&self) -> bool {
        self.subscription
            .lock()
            .as_ref()
            .map(|s| s.is_active())
            .unwrap_or(false)
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.queue
    }

    /// Shutdown signal shared with the delivery queue
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
