//! Gateway builder and runner

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::bus::MessageBus;
use crate::chat::BusChatService;
use crate::error::Error;
use crate::handler;
use crate::hub::Hub;
use crate::presence::MemoryPresence;
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use crate::service::{ChatService, PresenceService};
use crate::session::CloseReason;

/// Gateway configuration and runner
pub struct Gateway {
    port: u16,
    hub: Hub,
}

impl Gateway {
    /// Create a new gateway builder
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::default()
    }

    /// The shared hub, e.g. to inspect sessions
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Build the router without binding a socket
    pub fn router(&self) -> Router {
        let state = handler::GatewayState {
            hub: self.hub.clone(),
        };

        Router::new()
            .route("/health", get(|| async { "OK" }))
            .route("/ready", get(|| async { "READY" }))
            .route("/ws", get(handler::ws_connect))
            .route("/chat/history", get(handler::chat_history))
            .route("/presence/{user_id}", get(handler::user_status))
            .route("/api/stats", get(handler::get_stats))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Run the gateway server
    pub async fn run(self) -> anyhow::Result<()> {
        tracing::info!(
            port = self.port,
            bus = self.hub.bridge().bus().name(),
            chat = self.hub.chat().name(),
            presence = self.hub.presence().name(),
            "Starting chat gateway"
        );

        // Held for the whole run; dropping it releases the topic.
        let presence_subscription = self.hub.start_presence_fanout().await?;

        let app = self.router();

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("Listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        let registry = self.hub.registry().clone();
        let shutdown_signal = async move {
            let ctrl_c = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to install Ctrl+C handler");
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut signal) => {
                        signal.recv().await;
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to install SIGTERM handler");
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => tracing::info!("Received Ctrl+C"),
                _ = terminate => tracing::info!("Received SIGTERM"),
            }

            // Upgraded sockets are not tracked by the server, close them here.
            registry.close_all(CloseReason::Shutdown);
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        presence_subscription.unsubscribe();
        tracing::info!(
            remaining_sessions = self.hub.registry().len(),
            "Gateway shutdown complete"
        );
        Ok(())
    }
}

/// Builder for Gateway
pub struct GatewayBuilder {
    port: u16,
    bus: Option<Arc<dyn MessageBus>>,
    chat: Option<Arc<dyn ChatService>>,
    presence: Option<Arc<dyn PresenceService>>,
    queue_capacity: usize,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self {
            port: 8080,
            bus: None,
            chat: None,
            presence: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl GatewayBuilder {
    /// Set the server port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the message bus
    pub fn bus<B: MessageBus>(mut self, bus: B) -> Self {
        self.bus = Some(Arc::new(bus));
        self
    }

    /// Set the chat backend. Defaults to [`BusChatService`] on the same bus.
    pub fn chat<C: ChatService>(mut self, chat: C) -> Self {
        self.chat = Some(Arc::new(chat));
        self
    }

    /// Set the presence backend. Defaults to [`MemoryPresence`] on the same bus.
    pub fn presence<P: PresenceService>(mut self, presence: P) -> Self {
        self.presence = Some(Arc::new(presence));
        self
    }

    /// Set the per-connection delivery queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Build the gateway
    pub fn build(self) -> anyhow::Result<Gateway> {
        let bus = self
            .bus
            .ok_or_else(|| Error::Config("Bus is required".into()))?;
        if self.queue_capacity == 0 {
            return Err(Error::Config("Queue capacity must be greater than zero".into()).into());
        }

        let chat: Arc<dyn ChatService> = match self.chat {
            Some(chat) => chat,
            None => Arc::new(BusChatService::new(bus.clone())),
        };
        let presence: Arc<dyn PresenceService> = match self.presence {
            Some(presence) => presence,
            None => Arc::new(MemoryPresence::new(bus.clone())),
        };

        Ok(Gateway {
            port: self.port,
            hub: Hub::with_queue_capacity(bus, chat, presence, self.queue_capacity),
        })
    }
}
