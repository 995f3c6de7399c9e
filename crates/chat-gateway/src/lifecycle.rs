//! Connection lifecycle: `Connecting -> Active -> Closing -> Closed`
//!
//! The lifecycle is transport-agnostic. Inbound frames arrive as a stream of
//! text payloads (the stream ending means the client closed); outbound frames
//! go into a sink of [`Outbound`] values. The WebSocket handler adapts a socket
//! to this shape, tests use in-memory channels.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::bridge::BusBridge;
use crate::dispatcher::CommandDispatcher;
use crate::error::{Error, Result};
use crate::queue::DeliveryReceiver;
use crate::registry::SessionRegistry;
use crate::service::PresenceService;
use crate::session::{CloseReason, Session, SessionState};

/// A frame headed to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close(CloseReason),
}

/// Per-user lock ordering a user's online and offline announcements
///
/// Entries exist only while some task holds or waits for them.
#[derive(Clone, Default)]
struct PresenceGate {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl PresenceGate {
    async fn run<F: Future>(&self, user_id: &str, f: F) -> F::Output {
        let lock = self.locks.entry(user_id.to_string()).or_default().clone();
        let output = {
            let _guard = lock.lock().await;
            f.await
        };
        drop(lock);
        self.locks.remove_if(user_id, |_, lock| Arc::strong_count(lock) == 1);
        output
    }
}

/// Drives connections through their lifecycle
#[derive(Clone)]
pub struct ConnectionLifecycle {
    registry: SessionRegistry,
    bridge: BusBridge,
    dispatcher: CommandDispatcher,
    presence: Arc<dyn PresenceService>,
    gate: PresenceGate,
    queue_capacity: usize,
}

impl ConnectionLifecycle {
    pub fn new(
        registry: SessionRegistry,
        bridge: BusBridge,
        dispatcher: CommandDispatcher,
        presence: Arc<dyn PresenceService>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            registry,
            bridge,
            dispatcher,
            presence,
            gate: PresenceGate::default(),
            queue_capacity,
        }
    }

    /// Run one connection until it is torn down and return why it ended.
    ///
    /// An empty `user_id` is rejected before anything is registered.
    pub async fn run<R, E, W>(&self, user_id: &str, inbound: R, outbound: W) -> Result<CloseReason>
    where
        R: Stream<Item = std::result::Result<String, E>> + Send,
        E: Display + Send,
        W: Sink<Outbound> + Send + 'static,
        W::Error: Display + Send,
    {
        if user_id.is_empty() {
            return Err(Error::Rejected("user_id is required".into()));
        }

        let (session, receiver) = Session::new(user_id, self.queue_capacity);

        // The private topic must be live before the session becomes visible.
        if let Err(e) = self.bridge.subscribe_session(&session).await {
            error!(error = %e, user_id, "Failed to subscribe user topic");
            session.close(CloseReason::TransportError);
            session.set_state(SessionState::Closed);
            return Err(e);
        }

        if let Some(previous) = self.registry.register(session.clone()) {
            info!(
                user_id,
                old_connection_id = %previous.connection_id,
                new_connection_id = %session.connection_id,
                "Superseding existing session"
            );
            previous.close(CloseReason::Superseded);
        }
        session.set_state(SessionState::Active);

        let writer = tokio::spawn(write_loop(session.clone(), receiver, outbound));
        tokio::spawn(self.clone().announce_online(session.clone()));

        let ended_by = self.read_loop(&session, inbound).await;

        session.set_state(SessionState::Closing);
        session.close(ended_by);
        if let Err(e) = writer.await {
            warn!(error = %e, user_id, "Write loop task failed");
        }

        // A replaced session must not mark the user offline under its successor.
        self.gate
            .run(user_id, async {
                let was_current = self.registry.unregister(user_id, &session);
                if was_current && self.registry.lookup(user_id).is_none() {
                    if let Err(e) = self.presence.set_offline(user_id).await {
                        warn!(error = %e, user_id, "Failed to announce user offline");
                    }
                }
            })
            .await;

        session.set_state(SessionState::Closed);
        let reason = session.close_reason().unwrap_or(ended_by);

        info!(
            user_id,
            connection_id = %session.connection_id,
            reason = reason.as_str(),
            dropped = session.queue().dropped(),
            "Connection closed"
        );
        Ok(reason)
    }

    /// Announce the user online unless the session ended in the meantime
    async fn announce_online(self, session: Arc<Session>) {
        let user_id = session.user_id.clone();
        self.gate
            .run(&user_id, async {
                let current = self
                    .registry
                    .lookup(&user_id)
                    .is_some_and(|s| Arc::ptr_eq(&s, &session));
                if !current {
                    debug!(user_id = %user_id, "Session gone before online announcement");
                    return;
                }
                if let Err(e) = self.presence.set_online(&user_id).await {
                    warn!(error = %e, user_id = %user_id, "Failed to announce user online");
                }
            })
            .await;
    }

    async fn read_loop<R, E>(&self, session: &Arc<Session>, inbound: R) -> CloseReason
    where
        R: Stream<Item = std::result::Result<String, E>> + Send,
        E: Display + Send,
    {
        let mut inbound = Box::pin(inbound);
        loop {
            tokio::select! {
                _ = session.closed() => {
                    return session.close_reason().unwrap_or(CloseReason::Shutdown);
                }
                frame = inbound.next() => match frame {
                    Some(Ok(text)) => self.dispatcher.dispatch(session, &text).await,
                    Some(Err(e)) => {
                        debug!(error = %e, user_id = %session.user_id, "Read error");
                        return CloseReason::TransportError;
                    }
                    None => return CloseReason::ClientClosed,
                },
            }
        }
    }
}

/// Drain the delivery queue into the transport until the session closes
async fn write_loop<W>(session: Arc<Session>, mut receiver: DeliveryReceiver, outbound: W)
where
    W: Sink<Outbound> + Send,
    W::Error: Display + Send,
{
    let mut outbound = Box::pin(outbound);
    loop {
        tokio::select! {
            biased;
            _ = session.closed() => break,
            next = receiver.recv() => match next {
                Some(payload) => {
                    if let Err(e) = outbound.send(Outbound::Text(payload)).await {
                        debug!(error = %e, user_id = %session.user_id, "Write error");
                        session.close(CloseReason::TransportError);
                        return;
                    }
                }
                None => break,
            },
        }
    }

    // Tell the client why it is being disconnected.
    let reason = session.close_reason().unwrap_or(CloseReason::ClientClosed);
    if reason != CloseReason::TransportError {
        let _ = outbound.send(Outbound::Close(reason)).await;
    }
    let _ = outbound.close().await;
}
