//! Topic Hub
//!
//! Tracks which connections are attached to which room topic and delivers
//! frames to them. Delivery never waits. Each connection has two outbound
//! lanes: membership and responses go on an unbounded control lane and
//! always arrive, relayed input goes on a bounded lane and is dropped when
//! that lane is full.

use std::collections::BTreeMap;

use dashmap::DashMap;
use tokio::sync::mpsc::{
    self,
    error::{TryRecvError, TrySendError},
};
use tracing::{debug, trace};

use crate::network::protocol::{InputEvent, ServerMessage};
use crate::room::{Identity, RoomCode};

/// Unique connection identifier.
pub type ConnectionId = uuid::Uuid;

/// Sending half of one connection's outbound lanes.
#[derive(Debug, Clone)]
pub struct Outbound {
    control: mpsc::UnboundedSender<ServerMessage>,
    input: mpsc::Sender<ServerMessage>,
}

impl Outbound {
    /// Create both lanes. `input_capacity` bounds relayed input only.
    pub fn channel(input_capacity: usize) -> (Self, OutboundReceiver) {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::channel(input_capacity.max(1));
        (
            Self {
                control: control_tx,
                input: input_tx,
            },
            OutboundReceiver {
                control: control_rx,
                input: input_rx,
            },
        )
    }

    /// Queue a frame that must arrive. Fails only once the writer is gone.
    pub fn send_control(&self, message: ServerMessage) -> bool {
        self.control.send(message).is_ok()
    }

    fn try_send_input(&self, message: ServerMessage) -> Result<(), TrySendError<ServerMessage>> {
        self.input.try_send(message)
    }
}

/// Receiving half of one connection's outbound lanes.
#[derive(Debug)]
pub struct OutboundReceiver {
    control: mpsc::UnboundedReceiver<ServerMessage>,
    input: mpsc::Receiver<ServerMessage>,
}

impl OutboundReceiver {
    /// Next frame, control lane first. `None` once both lanes are closed
    /// and drained.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        tokio::select! {
            biased;
            Some(message) = self.control.recv() => Some(message),
            Some(message) = self.input.recv() => Some(message),
            else => None,
        }
    }

    /// Next queued frame without waiting, control lane first.
    pub fn try_recv(&mut self) -> Result<ServerMessage, TryRecvError> {
        match self.control.try_recv() {
            Ok(message) => Ok(message),
            Err(_) => self.input.try_recv(),
        }
    }
}

/// A connection attached to a topic.
#[derive(Debug, Clone)]
pub struct Subscriber {
    /// Connection.
    pub connection: ConnectionId,
    /// Identity the connection authenticated as.
    pub identity: Identity,
    /// Outbound lanes.
    pub outbound: Outbound,
}

/// Result of relaying an input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Forwarded to this many connections.
    Delivered(usize),
    /// The sender is not attached to the topic.
    NotSubscribed,
}

/// Room topic registry.
#[derive(Default)]
pub struct TopicHub {
    topics: DashMap<RoomCode, BTreeMap<ConnectionId, Subscriber>>,
}

impl TopicHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection to a topic. Re-attaching replaces the entry.
    pub fn subscribe(&self, code: &RoomCode, subscriber: Subscriber) {
        self.topics
            .entry(code.clone())
            .or_default()
            .insert(subscriber.connection, subscriber);
    }

    /// Detach a connection. Returns whether it was attached.
    pub fn unsubscribe(&self, code: &RoomCode, connection: ConnectionId) -> bool {
        let removed = match self.topics.get_mut(code) {
            Some(mut subscribers) => subscribers.remove(&connection).is_some(),
            None => false,
        };
        self.topics.remove_if(code, |_, subscribers| subscribers.is_empty());
        removed
    }

    /// Whether a connection is attached to a topic.
    pub fn is_subscribed(&self, code: &RoomCode, connection: ConnectionId) -> bool {
        self.topics
            .get(code)
            .map(|subscribers| subscribers.contains_key(&connection))
            .unwrap_or(false)
    }

    /// Whether any connection of `identity` is attached to a topic.
    pub fn has_identity(&self, code: &RoomCode, identity: &Identity) -> bool {
        self.topics
            .get(code)
            .map(|subscribers| subscribers.values().any(|s| &s.identity == identity))
            .unwrap_or(false)
    }

    /// Number of connections attached to a topic.
    pub fn subscriber_count(&self, code: &RoomCode) -> usize {
        self.topics.get(code).map(|s| s.len()).unwrap_or(0)
    }

    /// Number of topics with at least one connection.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Drop a topic and all its attachments.
    pub fn drop_topic(&self, code: &RoomCode) {
        self.topics.remove(code);
    }

    /// Deliver `message` on the control lane of every connection on a topic
    /// except `except`. Returns how many connections it was queued for.
    pub fn publish(
        &self,
        code: &RoomCode,
        message: &ServerMessage,
        except: Option<ConnectionId>,
    ) -> usize {
        let Some(subscribers) = self.topics.get(code) else {
            return 0;
        };

        subscribers
            .values()
            .filter(|s| Some(s.connection) != except)
            .filter(|s| s.outbound.send_control(message.clone()))
            .count()
    }

    /// Deliver `message` on the control lane of one connection on a topic.
    pub fn send_to(&self, code: &RoomCode, connection: ConnectionId, message: ServerMessage) -> bool {
        self.topics
            .get(code)
            .and_then(|subscribers| subscribers.get(&connection).map(|s| s.outbound.send_control(message)))
            .unwrap_or(false)
    }

    /// Forward an input event from `from` to the rest of its room, verbatim.
    /// Connections whose input lane is full miss this event.
    pub fn relay_input(&self, code: &RoomCode, from: ConnectionId, event: InputEvent) -> RelayOutcome {
        if !self.is_subscribed(code, from) {
            return RelayOutcome::NotSubscribed;
        }
        let Some(subscribers) = self.topics.get(code) else {
            return RelayOutcome::NotSubscribed;
        };
        let message = ServerMessage::Input {
            code: code.clone(),
            event,
        };
        let delivered = subscribers
            .values()
            .filter(|s| s.connection != from)
            .filter(|s| deliver_input(s, message.clone()))
            .count();
        RelayOutcome::Delivered(delivered)
    }
}

fn deliver_input(subscriber: &Subscriber, message: ServerMessage) -> bool {
    match subscriber.outbound.try_send_input(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!(connection = %subscriber.connection, "Input lane full, dropping event");
            false
        }
        Err(TrySendError::Closed(_)) => {
            trace!(connection = %subscriber.connection, "Outbound lanes closed");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::{KeyKind, MembershipUpdate};

    fn id(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    fn subscriber(name: &str, capacity: usize) -> (Subscriber, OutboundReceiver) {
        let (outbound, rx) = Outbound::channel(capacity);
        let sub = Subscriber {
            connection: ConnectionId::new_v4(),
            identity: id(name),
            outbound,
        };
        (sub, rx)
    }

    fn press(key: &str, code: &str) -> InputEvent {
        InputEvent {
            kind: KeyKind::Press,
            key: key.into(),
            code: code.into(),
        }
    }

    #[tokio::test]
    async fn test_relay_skips_sender() {
        let hub = TopicHub::new();
        let room = RoomCode::parse("ABC234");
        let (alice, mut alice_rx) = subscriber("alice", 8);
        let (bob, mut bob_rx) = subscriber("bob", 8);
        let alice_conn = alice.connection;
        hub.subscribe(&room, alice);
        hub.subscribe(&room, bob);

        let outcome = hub.relay_input(&room, alice_conn, press("w", "KeyW"));
        assert_eq!(outcome, RelayOutcome::Delivered(1));

        match bob_rx.try_recv().unwrap() {
            ServerMessage::Input { code, event } => {
                assert_eq!(code, room);
                assert_eq!(event, press("w", "KeyW"));
            }
            other => panic!("Wrong message: {:?}", other),
        }
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_requires_subscription() {
        let hub = TopicHub::new();
        let room = RoomCode::parse("ABC234");
        let other = RoomCode::parse("XYZ789");
        let (alice, _alice_rx) = subscriber("alice", 8);
        let (bob, mut bob_rx) = subscriber("bob", 8);
        let alice_conn = alice.connection;
        hub.subscribe(&other, alice);
        hub.subscribe(&room, bob);

        let outcome = hub.relay_input(&room, alice_conn, press("w", "KeyW"));
        assert_eq!(outcome, RelayOutcome::NotSubscribed);
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_waiting() {
        let hub = TopicHub::new();
        let room = RoomCode::parse("ABC234");
        let (alice, _alice_rx) = subscriber("alice", 8);
        let (bob, mut bob_rx) = subscriber("bob", 1);
        let alice_conn = alice.connection;
        hub.subscribe(&room, alice);
        hub.subscribe(&room, bob);

        assert_eq!(hub.relay_input(&room, alice_conn, press("w", "KeyW")), RelayOutcome::Delivered(1));
        assert_eq!(hub.relay_input(&room, alice_conn, press("a", "KeyA")), RelayOutcome::Delivered(0));

        assert!(bob_rx.try_recv().is_ok());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_per_sender_order_preserved() {
        let hub = TopicHub::new();
        let room = RoomCode::parse("ABC234");
        let (alice, _alice_rx) = subscriber("alice", 8);
        let (bob, mut bob_rx) = subscriber("bob", 64);
        let alice_conn = alice.connection;
        hub.subscribe(&room, alice);
        hub.subscribe(&room, bob);

        let keys = ["w", "a", "s", "d"];
        for key in keys {
            hub.relay_input(&room, alice_conn, press(key, key));
        }
        for key in keys {
            match bob_rx.try_recv().unwrap() {
                ServerMessage::Input { event, .. } => assert_eq!(event.key, key),
                other => panic!("Wrong message: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_drops_empty_topic() {
        let hub = TopicHub::new();
        let room = RoomCode::parse("ABC234");
        let (alice, _rx) = subscriber("alice", 8);
        let conn = alice.connection;
        hub.subscribe(&room, alice);
        assert!(hub.has_identity(&room, &id("alice")));
        assert_eq!(hub.topic_count(), 1);

        assert!(hub.unsubscribe(&room, conn));
        assert!(!hub.unsubscribe(&room, conn));
        assert!(!hub.has_identity(&room, &id("alice")));
        assert_eq!(hub.topic_count(), 0);
    }

    #[tokio::test]
    async fn test_send_to_single_connection() {
        let hub = TopicHub::new();
        let room = RoomCode::parse("ABC234");
        let (alice, mut alice_rx) = subscriber("alice", 8);
        let (bob, mut bob_rx) = subscriber("bob", 8);
        let bob_conn = bob.connection;
        hub.subscribe(&room, alice);
        hub.subscribe(&room, bob);

        let msg = ServerMessage::Shutdown { reason: "bye".into() };
        assert!(hub.send_to(&room, bob_conn, msg));
        assert!(bob_rx.try_recv().is_ok());
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_membership_arrives_past_full_input_lane() {
        let hub = TopicHub::new();
        let room = RoomCode::parse("ABC234");
        let (alice, mut alice_rx) = subscriber("alice", 1);
        let (bob, _bob_rx) = subscriber("bob", 8);
        let bob_conn = bob.connection;
        hub.subscribe(&room, alice);
        hub.subscribe(&room, bob);

        assert_eq!(hub.relay_input(&room, bob_conn, press("w", "KeyW")), RelayOutcome::Delivered(1));
        assert_eq!(hub.relay_input(&room, bob_conn, press("a", "KeyA")), RelayOutcome::Delivered(0));

        let update = ServerMessage::MembershipUpdate(MembershipUpdate {
            code: room.clone(),
            members: vec![id("alice"), id("bob")],
            revision: 2,
        });
        assert_eq!(hub.publish(&room, &update, None), 2);

        // Control frames overtake queued input.
        match alice_rx.try_recv().unwrap() {
            ServerMessage::MembershipUpdate(m) => assert_eq!(m.members, vec![id("alice"), id("bob")]),
            other => panic!("Wrong message: {:?}", other),
        }
        match alice_rx.try_recv().unwrap() {
            ServerMessage::Input { event, .. } => assert_eq!(event.key, "w"),
            other => panic!("Wrong message: {:?}", other),
        }
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recv_ends_when_lanes_close() {
        let (outbound, mut rx) = Outbound::channel(4);
        assert!(outbound.send_control(ServerMessage::Shutdown { reason: "bye".into() }));
        drop(outbound);

        assert!(matches!(rx.recv().await, Some(ServerMessage::Shutdown { .. })));
        assert!(rx.recv().await.is_none());
    }
}
