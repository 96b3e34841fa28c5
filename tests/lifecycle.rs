//! End-to-end lifecycle tests against the ChatServer actor
//!
//! Connections are simulated with plain channels; collaborators are
//! in-memory fakes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::time::timeout;

use stranger_relay::{
    ChatEvent, ChatServer, CollaboratorError, ConnectionId, CountryTable, EventRecorder,
    EventSink, ImageHost, NoImageHost, OutgoingMessage, RecordedEvent, Relay, RelayOutcome,
    ServerHandle, ServerMessage,
};

const TABLE: &str = "
    10.0.1.0/24  Japan
    10.0.2.0/24  Brazil
    10.0.3.0/24  Kenya
";

#[derive(Default)]
struct MemoryRecorder {
    events: Mutex<Vec<ChatEvent>>,
}

#[async_trait]
impl EventRecorder for MemoryRecorder {
    async fn record(&self, event: &RecordedEvent) -> Result<(), CollaboratorError> {
        self.events.lock().await.push(event.event.clone());
        Ok(())
    }
}

impl MemoryRecorder {
    /// Wait until `predicate` holds for the recorded events
    async fn wait_for(&self, predicate: impl Fn(&[ChatEvent]) -> bool) -> Vec<ChatEvent> {
        for _ in 0..100 {
            let events = self.events.lock().await.clone();
            if predicate(&events) {
                return events;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("events never matched: {:?}", self.events.lock().await);
    }
}

struct FailingRecorder;

#[async_trait]
impl EventRecorder for FailingRecorder {
    async fn record(&self, _event: &RecordedEvent) -> Result<(), CollaboratorError> {
        Err(CollaboratorError::Unavailable)
    }
}

struct FixedImageHost(&'static str);

#[async_trait]
impl ImageHost for FixedImageHost {
    async fn host_image(&self, _payload: &str) -> Result<String, CollaboratorError> {
        Ok(self.0.to_string())
    }
}

/// Blocks every upload until released
#[derive(Default)]
struct GatedImageHost {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl ImageHost for GatedImageHost {
    async fn host_image(&self, _payload: &str) -> Result<String, CollaboratorError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok("https://cdn.example/gated.png".to_string())
    }
}

struct Harness {
    server: ServerHandle,
    relay: Relay,
    recorder: Arc<MemoryRecorder>,
}

impl Harness {
    fn new(images: Arc<dyn ImageHost>) -> Self {
        let recorder = Arc::new(MemoryRecorder::default());
        let events = EventSink::spawn(recorder.clone());
        let geo = Arc::new(CountryTable::parse(TABLE).unwrap());
        let server = ChatServer::spawn(64, geo, events);
        let relay = Relay::new(server.clone(), images);
        Self {
            server,
            relay,
            recorder,
        }
    }

    async fn connect(&self, address: &str) -> Client {
        self.connect_with_buffer(address, 32).await
    }

    async fn connect_with_buffer(&self, address: &str, buffer: usize) -> Client {
        let (tx, rx) = mpsc::channel(buffer);
        let id = ConnectionId::new();
        self.server
            .connect(id, Some(address.parse().unwrap()), tx)
            .await
            .unwrap();
        Client { id, rx }
    }

    /// Round-trip through the actor so earlier commands are fully dispatched
    async fn settle(&self) {
        self.server.status().await.unwrap();
    }

    async fn pair(&self, a: &mut Client, b: &mut Client) {
        self.server.find_partner(a.id).await.unwrap();
        self.server.find_partner(b.id).await.unwrap();
        self.settle().await;
        a.drain();
        b.drain();
    }
}

struct Client {
    id: ConnectionId,
    rx: mpsc::Receiver<ServerMessage>,
}

impl Client {
    async fn recv(&mut self) -> ServerMessage {
        timeout(Duration::from_secs(1), self.rx.recv())
            .await
            .expect("timed out waiting for message")
            .expect("channel closed")
    }

    fn assert_silent(&mut self) {
        if let Ok(msg) = self.rx.try_recv() {
            panic!("unexpected message: {:?}", msg);
        }
    }

    fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}

fn text_message(text: &str) -> ServerMessage {
    ServerMessage::Message {
        text: text.to_string(),
        image_url: None,
        expires_at: None,
    }
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    let h = Harness::new(Arc::new(NoImageHost));
    let mut c1 = h.connect("10.0.1.5").await;
    let mut c2 = h.connect("10.0.2.5").await;

    h.server.find_partner(c1.id).await.unwrap();
    assert_eq!(c1.recv().await, ServerMessage::Searching);

    h.server.find_partner(c2.id).await.unwrap();
    assert_eq!(
        c1.recv().await,
        ServerMessage::Matched {
            country: "Brazil".into()
        }
    );
    assert_eq!(
        c2.recv().await,
        ServerMessage::Matched {
            country: "Japan".into()
        }
    );

    let outcome = h
        .relay
        .relay(c1.id, OutgoingMessage::text("hi"))
        .await
        .unwrap();
    assert_eq!(outcome, RelayOutcome::Delivered { image_url: None });
    assert_eq!(c2.recv().await, text_message("hi"));

    h.server.disconnect(c1.id).await.unwrap();
    assert_eq!(c2.recv().await, ServerMessage::PeerDisconnected);

    let events = h
        .recorder
        .wait_for(|events| {
            events
                .iter()
                .any(|e| matches!(e, ChatEvent::ConnectionClosed { .. }))
        })
        .await;

    let opened = events.iter().find_map(|e| match e {
        ChatEvent::SessionOpened {
            session_id,
            countries,
            ..
        } => Some((session_id.clone(), countries.clone())),
        _ => None,
    });
    let closed = events.iter().find_map(|e| match e {
        ChatEvent::SessionClosed {
            session_id,
            duration_seconds,
        } => Some((session_id.clone(), *duration_seconds)),
        _ => None,
    });
    let (opened_id, countries) = opened.expect("session opened");
    let (closed_id, duration) = closed.expect("session closed");
    assert_eq!(opened_id, closed_id);
    assert_eq!(countries, ["Brazil".to_string(), "Japan".to_string()]);
    assert!(duration <= 1);
    assert!(events.iter().any(|e| matches!(
        e,
        ChatEvent::MessageSent { text, has_image: false, .. } if text == "hi"
    )));

    let status = h.server.status().await.unwrap();
    assert_eq!(status.connection_count, 1);
    assert_eq!(status.waiting_count, 0);
    assert_eq!(status.active_session_count, 0);
}

#[tokio::test]
async fn test_skip_returns_to_waiting() {
    let h = Harness::new(Arc::new(NoImageHost));
    let mut c1 = h.connect("10.0.1.5").await;
    let mut c2 = h.connect("10.0.2.5").await;
    h.pair(&mut c1, &mut c2).await;

    h.server.find_partner(c1.id).await.unwrap();
    assert_eq!(c2.recv().await, ServerMessage::PeerDisconnected);
    assert_eq!(c1.recv().await, ServerMessage::Searching);

    let status = h.server.status().await.unwrap();
    assert_eq!(status.waiting_count, 1);
    assert_eq!(status.active_session_count, 0);

    // c2 is idle: its messages go nowhere
    let outcome = h
        .relay
        .relay(c2.id, OutgoingMessage::text("hello?"))
        .await
        .unwrap();
    assert_eq!(outcome, RelayOutcome::Unpaired);
}

#[tokio::test]
async fn test_skip_repairs_with_waiting_third() {
    let h = Harness::new(Arc::new(NoImageHost));
    let mut c1 = h.connect("10.0.1.5").await;
    let mut c2 = h.connect("10.0.2.5").await;
    let mut c3 = h.connect("10.0.3.5").await;
    h.pair(&mut c1, &mut c2).await;

    h.server.find_partner(c3.id).await.unwrap();
    assert_eq!(c3.recv().await, ServerMessage::Searching);

    h.server.find_partner(c1.id).await.unwrap();
    assert_eq!(c2.recv().await, ServerMessage::PeerDisconnected);
    assert_eq!(
        c1.recv().await,
        ServerMessage::Matched {
            country: "Kenya".into()
        }
    );
    assert_eq!(
        c3.recv().await,
        ServerMessage::Matched {
            country: "Japan".into()
        }
    );

    h.relay
        .relay(c3.id, OutgoingMessage::text("jambo"))
        .await
        .unwrap();
    assert_eq!(c1.recv().await, text_message("jambo"));
    h.settle().await;
    c2.assert_silent();
}

#[tokio::test]
async fn test_end_chat_is_idempotent() {
    let h = Harness::new(Arc::new(NoImageHost));
    let mut c1 = h.connect("10.0.1.5").await;
    let mut c2 = h.connect("10.0.2.5").await;
    h.pair(&mut c1, &mut c2).await;

    h.server.end_chat(c1.id).await.unwrap();
    h.server.end_chat(c1.id).await.unwrap();
    h.server.end_chat(c2.id).await.unwrap();

    assert_eq!(c2.recv().await, ServerMessage::PeerDisconnected);
    h.settle().await;
    c2.assert_silent();
    c1.assert_silent();

    let events = h
        .recorder
        .wait_for(|events| {
            events
                .iter()
                .any(|e| matches!(e, ChatEvent::SessionClosed { .. }))
        })
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    let closes = h
        .recorder
        .events
        .lock()
        .await
        .iter()
        .filter(|e| matches!(e, ChatEvent::SessionClosed { .. }))
        .count();
    assert_eq!(closes, 1, "events: {:?}", events);

    // Both stay registered and can search again
    h.server.find_partner(c2.id).await.unwrap();
    assert_eq!(c2.recv().await, ServerMessage::Searching);
}

#[tokio::test]
async fn test_unpaired_message_is_dropped() {
    let h = Harness::new(Arc::new(NoImageHost));
    let mut c1 = h.connect("10.0.1.5").await;
    let mut c2 = h.connect("10.0.2.5").await;

    let outcome = h
        .relay
        .relay(c1.id, OutgoingMessage::text("anyone?"))
        .await
        .unwrap();
    assert_eq!(outcome, RelayOutcome::Unpaired);

    h.server.find_partner(c1.id).await.unwrap();
    assert_eq!(c1.recv().await, ServerMessage::Searching);
    let outcome = h
        .relay
        .relay(c1.id, OutgoingMessage::text("still waiting"))
        .await
        .unwrap();
    assert_eq!(outcome, RelayOutcome::Unpaired);

    h.settle().await;
    c1.assert_silent();
    c2.assert_silent();
}

#[tokio::test]
async fn test_image_failure_still_delivers_text() {
    let h = Harness::new(Arc::new(NoImageHost));
    let mut c1 = h.connect("10.0.1.5").await;
    let mut c2 = h.connect("10.0.2.5").await;
    h.pair(&mut c1, &mut c2).await;

    let message = OutgoingMessage {
        text: "look".into(),
        image: Some("data:image/png;base64,AAAA".into()),
        expires_at: Some(1_700_000_000_000),
    };
    let outcome = h.relay.relay(c1.id, message).await.unwrap();
    assert_eq!(outcome, RelayOutcome::Delivered { image_url: None });
    assert_eq!(
        c2.recv().await,
        ServerMessage::Message {
            text: "look".into(),
            image_url: None,
            expires_at: Some(1_700_000_000_000),
        }
    );

    h.recorder
        .wait_for(|events| {
            events.iter().any(|e| {
                matches!(
                    e,
                    ChatEvent::MessageSent {
                        has_image: true,
                        image_url: None,
                        ..
                    }
                )
            })
        })
        .await;
}

#[tokio::test]
async fn test_hosted_image_is_relayed() {
    let h = Harness::new(Arc::new(FixedImageHost("https://cdn.example/a.png")));
    let mut c1 = h.connect("10.0.1.5").await;
    let mut c2 = h.connect("10.0.2.5").await;
    h.pair(&mut c1, &mut c2).await;

    let message = OutgoingMessage {
        image: Some("data:image/png;base64,AAAA".into()),
        ..OutgoingMessage::default()
    };
    h.relay.relay(c2.id, message).await.unwrap();
    assert_eq!(
        c1.recv().await,
        ServerMessage::Message {
            text: String::new(),
            image_url: Some("https://cdn.example/a.png".into()),
            expires_at: None,
        }
    );
}

#[tokio::test]
async fn test_upload_does_not_block_other_connections() {
    let images = Arc::new(GatedImageHost::default());
    let h = Harness::new(images.clone());
    let mut c1 = h.connect("10.0.1.5").await;
    let mut c2 = h.connect("10.0.2.5").await;
    h.pair(&mut c1, &mut c2).await;

    let relay = h.relay.clone();
    let sender = c1.id;
    let upload = tokio::spawn(async move {
        let message = OutgoingMessage {
            text: "slow".into(),
            image: Some("data:".into()),
            expires_at: None,
        };
        relay.relay(sender, message).await
    });
    images.entered.notified().await;

    // Pairing proceeds while the upload is stuck
    let mut c3 = h.connect("10.0.3.5").await;
    let mut c4 = h.connect("10.0.1.9").await;
    h.server.find_partner(c3.id).await.unwrap();
    h.server.find_partner(c4.id).await.unwrap();
    assert_eq!(c3.recv().await, ServerMessage::Searching);
    assert!(matches!(c4.recv().await, ServerMessage::Matched { .. }));
    assert_eq!(h.server.status().await.unwrap().active_session_count, 2);

    images.release.notify_one();
    let outcome = upload.await.unwrap().unwrap();
    assert!(matches!(outcome, RelayOutcome::Delivered { image_url: Some(_) }));
    assert!(matches!(c2.recv().await, ServerMessage::Message { .. }));
}

#[tokio::test]
async fn test_sender_disconnect_mid_upload_still_delivers() {
    let images = Arc::new(GatedImageHost::default());
    let h = Harness::new(images.clone());
    let mut c1 = h.connect("10.0.1.5").await;
    let mut c2 = h.connect("10.0.2.5").await;
    h.pair(&mut c1, &mut c2).await;

    let relay = h.relay.clone();
    let sender = c1.id;
    let upload = tokio::spawn(async move {
        let message = OutgoingMessage {
            text: "bye".into(),
            image: Some("data:".into()),
            expires_at: None,
        };
        relay.relay(sender, message).await
    });
    images.entered.notified().await;

    h.server.disconnect(c1.id).await.unwrap();
    assert_eq!(c2.recv().await, ServerMessage::PeerDisconnected);

    images.release.notify_one();
    let outcome = upload.await.unwrap().unwrap();
    assert!(matches!(outcome, RelayOutcome::Delivered { .. }));
    assert_eq!(
        c2.recv().await,
        ServerMessage::Message {
            text: "bye".into(),
            image_url: Some("https://cdn.example/gated.png".into()),
            expires_at: None,
        }
    );
}

#[tokio::test]
async fn test_partner_disconnect_mid_upload_drops_message() {
    let images = Arc::new(GatedImageHost::default());
    let h = Harness::new(images.clone());
    let mut c1 = h.connect("10.0.1.5").await;
    let mut c2 = h.connect("10.0.2.5").await;
    h.pair(&mut c1, &mut c2).await;

    let relay = h.relay.clone();
    let sender = c1.id;
    let upload = tokio::spawn(async move {
        let message = OutgoingMessage {
            text: "too late".into(),
            image: Some("data:".into()),
            expires_at: None,
        };
        relay.relay(sender, message).await
    });
    images.entered.notified().await;

    h.server.disconnect(c2.id).await.unwrap();
    assert_eq!(c1.recv().await, ServerMessage::PeerDisconnected);

    images.release.notify_one();
    let outcome = upload.await.unwrap().unwrap();
    assert_eq!(outcome, RelayOutcome::PartnerGone);
}

#[tokio::test]
async fn test_partner_repaired_mid_upload_drops_message() {
    let images = Arc::new(GatedImageHost::default());
    let h = Harness::new(images.clone());
    let mut c1 = h.connect("10.0.1.5").await;
    let mut c2 = h.connect("10.0.2.5").await;
    let mut c3 = h.connect("10.0.3.5").await;
    h.pair(&mut c1, &mut c2).await;

    let relay = h.relay.clone();
    let sender = c1.id;
    let upload = tokio::spawn(async move {
        let message = OutgoingMessage {
            text: "for the old chat".into(),
            image: Some("data:".into()),
            expires_at: None,
        };
        relay.relay(sender, message).await
    });
    images.entered.notified().await;

    h.server.end_chat(c2.id).await.unwrap();
    assert_eq!(c1.recv().await, ServerMessage::PeerDisconnected);
    h.pair(&mut c2, &mut c3).await;
    assert_eq!(h.server.status().await.unwrap().active_session_count, 1);

    images.release.notify_one();
    let outcome = upload.await.unwrap().unwrap();
    assert_eq!(outcome, RelayOutcome::PartnerGone);

    h.settle().await;
    c2.assert_silent();
    c3.assert_silent();
}

#[tokio::test]
async fn test_stalled_reader_does_not_block_server() {
    let h = Harness::new(Arc::new(NoImageHost));
    // Never read from: `searching` fills the buffer, `matched` overflows it.
    let stalled = h.connect_with_buffer("10.0.1.5", 1).await;
    let mut fast = h.connect("10.0.2.5").await;

    h.server.find_partner(stalled.id).await.unwrap();
    h.server.find_partner(fast.id).await.unwrap();

    assert_eq!(
        fast.recv().await,
        ServerMessage::Matched {
            country: "Japan".into()
        }
    );
    assert_eq!(fast.recv().await, ServerMessage::PeerDisconnected);

    let status = timeout(Duration::from_secs(2), h.server.status())
        .await
        .expect("server stalled")
        .unwrap();
    assert_eq!(status.connection_count, 1);
    assert_eq!(status.active_session_count, 0);

    // The dropped connection is gone for good; others keep pairing.
    let mut other = h.connect("10.0.3.5").await;
    h.server.find_partner(fast.id).await.unwrap();
    h.server.find_partner(other.id).await.unwrap();
    assert_eq!(fast.recv().await, ServerMessage::Searching);
    assert!(matches!(other.recv().await, ServerMessage::Matched { .. }));

    h.recorder
        .wait_for(|events| {
            events.iter().any(|e| {
                matches!(e, ChatEvent::ConnectionClosed { connection_id } if *connection_id == stalled.id)
            })
        })
        .await;
    drop(stalled);
}

#[tokio::test]
async fn test_messages_from_one_sender_stay_ordered() {
    let h = Harness::new(Arc::new(FixedImageHost("https://cdn.example/b.png")));
    let mut c1 = h.connect("10.0.1.5").await;
    let mut c2 = h.connect("10.0.2.5").await;
    h.pair(&mut c1, &mut c2).await;

    let texts: Vec<String> = (0..20).map(|i| format!("m{i}")).collect();
    for (i, text) in texts.iter().enumerate() {
        let message = OutgoingMessage {
            text: text.clone(),
            image: (i % 3 == 0).then(|| "data:".to_string()),
            expires_at: None,
        };
        h.relay.relay(c1.id, message).await.unwrap();
    }

    for text in &texts {
        match c2.recv().await {
            ServerMessage::Message { text: got, .. } => assert_eq!(&got, text),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_persistence_failure_does_not_affect_delivery() {
    let events = EventSink::spawn(Arc::new(FailingRecorder));
    let geo = Arc::new(CountryTable::parse(TABLE).unwrap());
    let server = ChatServer::spawn(16, geo, events);
    let relay = Relay::new(server.clone(), Arc::new(NoImageHost));

    let (tx1, mut rx1) = mpsc::channel(8);
    let (tx2, mut rx2) = mpsc::channel(8);
    let c1 = ConnectionId::new();
    let c2 = ConnectionId::new();
    server.connect(c1, None, tx1).await.unwrap();
    server.connect(c2, None, tx2).await.unwrap();
    server.find_partner(c1).await.unwrap();
    server.find_partner(c2).await.unwrap();

    assert_eq!(rx1.recv().await, Some(ServerMessage::Searching));
    assert_eq!(
        rx2.recv().await,
        Some(ServerMessage::Matched {
            country: "Unknown".into()
        })
    );

    relay.relay(c2, OutgoingMessage::text("ok")).await.unwrap();
    assert!(matches!(rx1.recv().await, Some(ServerMessage::Matched { .. })));
    assert_eq!(rx1.recv().await, Some(text_message("ok")));
}

#[tokio::test]
async fn test_many_searchers_pair_symmetrically() {
    let h = Harness::new(Arc::new(NoImageHost));
    let mut clients = Vec::new();
    for _ in 0..9 {
        clients.push(h.connect("10.0.1.5").await);
    }

    let handles: Vec<_> = clients
        .iter()
        .map(|c| {
            let server = h.server.clone();
            let id = c.id;
            tokio::spawn(async move { server.find_partner(id).await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    h.settle().await;

    let status = h.server.status().await.unwrap();
    assert_eq!(status.active_session_count, 4);
    assert_eq!(status.waiting_count, 1);

    // Every paired client's partner sees its message, and only its message.
    for c in &mut clients {
        c.drain();
    }
    let mut delivered = 0;
    for c in &clients {
        if let RelayOutcome::Delivered { .. } = h
            .relay
            .relay(c.id, OutgoingMessage::text(c.id.to_string()))
            .await
            .unwrap()
        {
            delivered += 1;
        }
    }
    assert_eq!(delivered, 8);
    h.settle().await;

    let mut partner_of = std::collections::HashMap::new();
    for c in &mut clients {
        if let Ok(ServerMessage::Message { text, .. }) = c.rx.try_recv() {
            partner_of.insert(c.id.to_string(), text);
        }
    }
    assert_eq!(partner_of.len(), 8);
    for (me, partner) in &partner_of {
        assert_eq!(partner_of.get(partner), Some(me));
        assert_ne!(me, partner);
    }
}
