//! Connection lifecycle tests over in-memory transports

use chat_gateway::{
    async_trait, user_topic, BusChatService, ChatService, CloseReason, Error, Frame, FrameType, Hub,
    MemoryBus, MemoryPresence, MessageBus, Outbound, PresenceRecord, PresenceService, Subscription,
};
use futures::channel::mpsc;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    bus: MemoryBus,
    hub: Hub,
    presence: MemoryPresence,
    _fanout: Subscription,
}

impl Harness {
    async fn new() -> Self {
        Self::with_queue_capacity(64).await
    }

    async fn with_queue_capacity(capacity: usize) -> Self {
        let bus = MemoryBus::new();
        let shared: Arc<dyn MessageBus> = Arc::new(bus.clone());
        let presence = MemoryPresence::new(shared.clone());
        let chat: Arc<dyn ChatService> = Arc::new(BusChatService::new(shared.clone()));
        let hub = Hub::with_queue_capacity(shared, chat, Arc::new(presence.clone()), capacity);
        let fanout = hub.start_presence_fanout().await.unwrap();
        Self {
            bus,
            hub,
            presence,
            _fanout: fanout,
        }
    }

    /// Open a connection and wait until it is registered and announced online
    async fn connect(&self, user_id: &str) -> Client {
        let previous = self
            .hub
            .registry()
            .lookup(user_id)
            .map(|s| s.connection_id.clone());

        let mut client = open(&self.hub, user_id);

        let registry = self.hub.registry().clone();
        let presence = self.presence.clone();
        let id = user_id.to_string();
        timeout(WAIT, async move {
            loop {
                let current = registry.lookup(&id).map(|s| s.connection_id.clone());
                let online = presence.user_status(&id).await.unwrap().online;
                if current.is_some() && current != previous && online {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connection was not registered in time");

        client.connection_id = self.hub.registry().lookup(user_id).unwrap().connection_id.clone();
        client
    }
}

/// Start a connection without waiting for it to register
fn open(hub: &Hub, user_id: &str) -> Client {
    let (to_gateway, inbound) = mpsc::unbounded::<Result<String, String>>();
    let (outbound, from_gateway) = mpsc::unbounded::<Outbound>();
    let lifecycle = hub.lifecycle().clone();
    let user = user_id.to_string();
    let task = tokio::spawn(async move { lifecycle.run(&user, inbound, outbound).await });
    Client {
        connection_id: String::new(),
        to_gateway,
        from_gateway,
        task,
    }
}

struct Client {
    connection_id: String,
    to_gateway: mpsc::UnboundedSender<Result<String, String>>,
    from_gateway: mpsc::UnboundedReceiver<Outbound>,
    task: JoinHandle<chat_gateway::Result<CloseReason>>,
}

impl Client {
    fn send(&self, text: &str) {
        self.to_gateway.unbounded_send(Ok(text.to_string())).unwrap();
    }

    fn get_online_users(&self) {
        self.send(r#"{"type":"get_online_users"}"#);
    }

    /// Next frame of `kind`, skipping presence updates and other kinds
    async fn next_frame(&mut self, kind: &str) -> Frame {
        timeout(WAIT, async {
            loop {
                match self.from_gateway.next().await {
                    Some(Outbound::Text(text)) => {
                        let frame: Frame = serde_json::from_str(&text).unwrap();
                        if frame.kind == kind {
                            return frame;
                        }
                    }
                    Some(Outbound::Close(reason)) => panic!("closed while waiting for {}: {:?}", kind, reason),
                    None => panic!("transport ended while waiting for {}", kind),
                }
            }
        })
        .await
        .expect("frame did not arrive in time")
    }

    /// The close frame the gateway sent, ignoring any text before it
    async fn next_close(&mut self) -> CloseReason {
        timeout(WAIT, async {
            loop {
                match self.from_gateway.next().await {
                    Some(Outbound::Text(_)) => continue,
                    Some(Outbound::Close(reason)) => return reason,
                    None => panic!("transport ended without a close frame"),
                }
            }
        })
        .await
        .expect("close frame did not arrive in time")
    }

    /// Close from the client side and wait for the lifecycle to finish
    async fn hang_up(self) -> CloseReason {
        drop(self.to_gateway);
        join(self.task).await
    }
}

async fn join(task: JoinHandle<chat_gateway::Result<CloseReason>>) -> CloseReason {
    timeout(WAIT, task)
        .await
        .expect("lifecycle did not finish in time")
        .unwrap()
        .unwrap()
}

// ============== Online Users Tests ==============

#[tokio::test]
async fn test_online_users_before_and_after_peer_connects() {
    let harness = Harness::new().await;
    let mut alice = harness.connect("alice").await;

    alice.get_online_users();
    let frame = alice.next_frame(FrameType::ONLINE_USERS).await;
    assert_eq!(frame.content, serde_json::json!([]));

    let _bob = harness.connect("bob").await;

    alice.get_online_users();
    let frame = alice.next_frame(FrameType::ONLINE_USERS).await;
    assert_eq!(frame.content, serde_json::json!(["bob"]));
}

#[tokio::test]
async fn test_presence_change_reaches_connected_clients() {
    let harness = Harness::new().await;
    let mut alice = harness.connect("alice").await;
    let bob = harness.connect("bob").await;

    let frame = alice.next_frame(FrameType::USER_STATUS).await;
    // alice first sees her own announcement, then bob's
    let frame = if frame.content["user_id"] == "alice" {
        alice.next_frame(FrameType::USER_STATUS).await
    } else {
        frame
    };
    assert_eq!(frame.content["user_id"], "bob");
    assert_eq!(frame.content["online"], true);

    assert_eq!(bob.hang_up().await, CloseReason::ClientClosed);

    let frame = alice.next_frame(FrameType::USER_STATUS).await;
    assert_eq!(frame.content["user_id"], "bob");
    assert_eq!(frame.content["online"], false);
}

// ============== Messaging Tests ==============

#[tokio::test]
async fn test_send_message_reaches_sender_and_recipient() {
    let harness = Harness::new().await;
    let mut alice = harness.connect("alice").await;
    let mut bob = harness.connect("bob").await;

    alice.send(r#"{"type":"send_message","content":{"recipient_id":"bob","message":"hi"}}"#);

    for client in [&mut bob, &mut alice] {
        let frame = client.next_frame(FrameType::NEW_MESSAGE).await;
        assert_eq!(frame.content["sender_id"], "alice");
        assert_eq!(frame.content["recipient_id"], "bob");
        assert_eq!(frame.content["content"], "hi");
    }

    let history = harness.hub.chat().message_history("alice", "bob", 0, 0).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_unknown_command_is_ignored() {
    let harness = Harness::new().await;
    let mut alice = harness.connect("alice").await;

    alice.send(r#"{"type":"typing","content":{"to":"bob"}}"#);
    alice.send("not even json");
    alice.get_online_users();

    // The session survives and answers the next real command
    let frame = alice.next_frame(FrameType::ONLINE_USERS).await;
    assert_eq!(frame.content, serde_json::json!([]));
    assert!(harness.hub.registry().lookup("alice").is_some());
}

#[tokio::test]
async fn test_malformed_bus_payload_is_discarded() {
    let harness = Harness::new().await;
    let mut alice = harness.connect("alice").await;

    harness
        .bus
        .publish(&user_topic("alice"), b"{not a chat message".to_vec())
        .await
        .unwrap();

    assert_eq!(harness.hub.bridge().decode_failures(), 1);
    assert!(harness.hub.registry().lookup("alice").is_some());

    alice.get_online_users();
    alice.next_frame(FrameType::ONLINE_USERS).await;
}

// ============== Supersession Tests ==============

#[tokio::test]
async fn test_second_connection_supersedes_first() {
    let harness = Harness::new().await;
    let mut first = harness.connect("alice").await;
    let second = harness.connect("alice").await;

    assert_eq!(first.next_close().await, CloseReason::Superseded);
    assert_eq!(join(first.task).await, CloseReason::Superseded);

    let current = harness.hub.registry().lookup("alice").unwrap();
    assert_eq!(current.connection_id, second.connection_id);
    assert_eq!(harness.hub.registry().len(), 1);
    assert_eq!(harness.bus.subscriber_count(&user_topic("alice")), 1);

    // The replaced connection must not mark alice offline
    assert!(harness.presence.user_status("alice").await.unwrap().online);
}

#[tokio::test]
async fn test_immediate_reconnect_stays_online() {
    let harness = Harness::new().await;
    let first = harness.connect("alice").await;

    // Hang up and reconnect without waiting for the first teardown
    drop(first.to_gateway);
    let second = harness.connect("alice").await;
    join(first.task).await;

    let presence = harness.presence.clone();
    timeout(WAIT, async {
        while !presence.user_status("alice").await.unwrap().online {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("alice was left offline while connected");

    let current = harness.hub.registry().lookup("alice").unwrap();
    assert_eq!(current.connection_id, second.connection_id);
    assert_eq!(presence.online_users().await.unwrap(), vec!["alice".to_string()]);
}

#[tokio::test]
async fn test_messages_follow_newest_connection() {
    let harness = Harness::new().await;
    let bob = harness.connect("bob").await;
    let first = harness.connect("alice").await;
    let mut second = harness.connect("alice").await;
    join(first.task).await;

    bob.send(r#"{"type":"send_message","content":{"recipient_id":"alice","message":"again"}}"#);

    let frame = second.next_frame(FrameType::NEW_MESSAGE).await;
    assert_eq!(frame.content["content"], "again");
}

// ============== Teardown Tests ==============

#[tokio::test]
async fn test_client_close_cleans_up() {
    let harness = Harness::new().await;
    let alice = harness.connect("alice").await;
    assert_eq!(harness.bus.subscriber_count(&user_topic("alice")), 1);

    assert_eq!(alice.hang_up().await, CloseReason::ClientClosed);

    assert!(harness.hub.registry().is_empty());
    assert_eq!(harness.bus.subscriber_count(&user_topic("alice")), 0);
    // Only the presence topic remains
    assert_eq!(harness.bus.topic_count(), 1);
    assert!(!harness.presence.user_status("alice").await.unwrap().online);
}

#[tokio::test]
async fn test_connect_disconnect_cycles_leave_no_subscriptions() {
    let harness = Harness::new().await;

    for i in 0..20 {
        let client = harness.connect(&format!("user-{}", i)).await;
        client.hang_up().await;
    }

    assert!(harness.hub.registry().is_empty());
    assert_eq!(harness.bus.topic_count(), 1);
}

#[tokio::test]
async fn test_read_error_ends_connection() {
    let harness = Harness::new().await;
    let alice = harness.connect("alice").await;

    alice.to_gateway.unbounded_send(Err("connection reset".into())).unwrap();

    assert_eq!(join(alice.task).await, CloseReason::TransportError);
    assert!(harness.hub.registry().is_empty());
}

#[tokio::test]
async fn test_shutdown_closes_every_connection() {
    let harness = Harness::new().await;
    let mut alice = harness.connect("alice").await;
    let mut bob = harness.connect("bob").await;

    harness.hub.registry().close_all(CloseReason::Shutdown);

    assert_eq!(alice.next_close().await, CloseReason::Shutdown);
    assert_eq!(bob.next_close().await, CloseReason::Shutdown);
    assert_eq!(join(alice.task).await, CloseReason::Shutdown);
    assert_eq!(join(bob.task).await, CloseReason::Shutdown);
    assert!(harness.hub.registry().is_empty());
}

#[tokio::test]
async fn test_slow_consumer_is_disconnected() {
    let harness = Harness::with_queue_capacity(1).await;
    let alice = harness.connect("alice").await;
    let session = harness.hub.registry().lookup("alice").unwrap();

    // Nobody reads the transport; flood the queue directly
    for i in 0..8 {
        session.enqueue(format!("frame{}", i));
    }

    assert_eq!(join(alice.task).await, CloseReason::SlowConsumer);
    assert!(session.queue().dropped() >= 1);
    assert!(harness.hub.registry().is_empty());
}

#[tokio::test]
async fn test_empty_user_id_is_rejected() {
    let harness = Harness::new().await;
    let (_to_gateway, inbound) = mpsc::unbounded::<Result<String, String>>();
    let (outbound, _from_gateway) = mpsc::unbounded::<Outbound>();

    let result = harness.hub.lifecycle().run("", inbound, outbound).await;

    assert!(matches!(result, Err(Error::Rejected(_))));
    assert!(harness.hub.registry().is_empty());
    assert_eq!(harness.bus.subscriber_count(&user_topic("")), 0);
}

// ============== Presence Backend Tests ==============

/// Presence backend whose online call never completes
struct StalledPresence(MemoryPresence);

#[async_trait]
impl PresenceService for StalledPresence {
    async fn set_online(&self, _user_id: &str) -> chat_gateway::Result<()> {
        std::future::pending().await
    }

    async fn set_offline(&self, user_id: &str) -> chat_gateway::Result<()> {
        self.0.set_offline(user_id).await
    }

    async fn online_users(&self) -> chat_gateway::Result<Vec<String>> {
        self.0.online_users().await
    }

    async fn user_status(&self, user_id: &str) -> chat_gateway::Result<PresenceRecord> {
        self.0.user_status(user_id).await
    }

    fn name(&self) -> &'static str {
        "Stalled"
    }
}

#[tokio::test]
async fn test_slow_presence_does_not_delay_commands() {
    let bus = MemoryBus::new();
    let shared: Arc<dyn MessageBus> = Arc::new(bus.clone());
    let chat: Arc<dyn ChatService> = Arc::new(BusChatService::new(shared.clone()));
    let presence = StalledPresence(MemoryPresence::new(shared.clone()));
    let hub = Hub::new(shared, chat, Arc::new(presence));

    let mut alice = open(&hub, "alice");
    alice.get_online_users();

    let frame = alice.next_frame(FrameType::ONLINE_USERS).await;
    assert_eq!(frame.content, serde_json::json!([]));
    assert!(hub.registry().lookup("alice").is_some());
}
