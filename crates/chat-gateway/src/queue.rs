//! Per-connection outbound delivery queue
//!
//! Many producers (bus handlers, fanout, the dispatcher) push encoded frames,
//! one consumer (the connection's write loop) drains them in FIFO order.
//! Pushing never blocks: a full queue drops the payload and signals teardown,
//! since a client that cannot keep up is treated as unresponsive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default number of frames buffered per connection
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Result of pushing a payload onto a [`DeliveryQueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    Dropped,
}

impl Enqueued {
    pub fn is_accepted(self) -> bool {
        matches!(self, Enqueued::Accepted)
    }
}

/// Producer side of a connection's outbound buffer
#[derive(Debug, Clone)]
pub struct DeliveryQueue {
    sender: mpsc::Sender<String>,
    teardown: CancellationToken,
    dropped: Arc<AtomicU64>,
    capacity: usize,
}

/// Consumer side, owned by the write loop
#[derive(Debug)]
pub struct DeliveryReceiver {
    receiver: mpsc::Receiver<String>,
}

impl DeliveryQueue {
    /// Create a bounded queue. `teardown` is cancelled when a push overflows.
    pub fn new(capacity: usize, teardown: CancellationToken) -> (Self, DeliveryReceiver) {
        let capacity = capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let queue = Self {
            sender,
            teardown,
            dropped: Arc::new(AtomicU64::new(0)),
            capacity,
        };
        (queue, DeliveryReceiver { receiver })
    }

    /// Push without waiting. On overflow the newest payload is discarded.
    pub fn enqueue(&self, payload: String) -> Enqueued {
        match self.sender.try_send(payload) {
            Ok(()) => Enqueued::Accepted,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(capacity = self.capacity, "Delivery queue full, dropping payload");
                self.teardown.cancel();
                Enqueued::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.teardown.cancel();
                Enqueued::Dropped
            }
        }
    }

    /// Number of payloads discarded so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Payloads currently buffered
    pub fn len(&self) -> usize {
        self.capacity - self.sender.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether the consumer side is gone
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl DeliveryReceiver {
    /// Wait for the next payload. `None` once every producer is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Take a payload if one is already buffered
    pub fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }

    /// Drain as a stream
    pub fn into_stream(self) -> ReceiverStream<String> {
        ReceiverStream::new(self.receiver)
    }
}
