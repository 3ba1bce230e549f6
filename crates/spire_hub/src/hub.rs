//! Client registry and topic subscriptions.
//!
//! One mutex guards both the registry and the topic table, so register,
//! unregister, subscribe, unsubscribe and publish are all serialized against
//! each other. Delivery under the lock is a non-blocking `try_send` per
//! subscriber; a full queue drops the frame for that client only.
//!
//! Ordering is best-effort across racing calls: a subscribe that races an
//! in-flight publish on the same topic may or may not see that publish.
//! For one client, frames arrive in the order they were queued.

use crate::client::{Client, Delivery};
use crate::frame::{Envelope, Frame, FrameKind, OutboundFrame};
use crate::metrics::{HubMetrics, HubStats};
use serde_json::Value;
use spire_core::ClientId;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

struct Registered {
    client: Client,
    topics: HashSet<String>,
}

#[derive(Default)]
struct HubState {
    clients: HashMap<ClientId, Registered>,
    topics: HashMap<String, HashSet<ClientId>>,
}

/// Broadcast hub
///
/// Owns every registered client's queue sender and the topic → subscribers
/// table. None of its operations fail from the caller's point of view.
#[derive(Default)]
pub struct BroadcastHub {
    state: Mutex<HubState>,
    metrics: HubMetrics,
}

impl BroadcastHub {
    /// Create an empty hub
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a client. Returns `false` if it was already registered.
    pub fn register(&self, client: Client) -> bool {
        let id = client.id();
        let mut state = self.lock();
        if state.clients.contains_key(&id) {
            return false;
        }
        state.clients.insert(
            id,
            Registered {
                client,
                topics: HashSet::new(),
            },
        );
        drop(state);

        self.metrics.record_connected();
        info!(client_id = %id, "client registered");
        true
    }

    /// Remove a client from the registry and from every topic.
    ///
    /// Dropping the hub's sender closes the client's queue; since the entry
    /// is removed only once, the queue is closed exactly once. Returns
    /// `false` if the client was not registered.
    pub fn unregister(&self, id: ClientId) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.clients.remove(&id) else {
            return false;
        };

        for topic in &entry.topics {
            if let Some(subscribers) = state.topics.get_mut(topic) {
                subscribers.remove(&id);
                if subscribers.is_empty() {
                    state.topics.remove(topic);
                }
            }
        }
        drop(state);
        drop(entry);

        info!(client_id = %id, "client unregistered");
        true
    }

    /// Subscribe a registered client to a topic.
    ///
    /// Returns `true` if the subscription was added. Unregistered clients
    /// and repeat subscriptions are no-ops.
    pub fn subscribe(&self, id: ClientId, topic: &str) -> bool {
        let mut state = self.lock();
        let HubState { clients, topics } = &mut *state;
        let Some(entry) = clients.get_mut(&id) else {
            return false;
        };
        if !entry.topics.insert(topic.to_string()) {
            return false;
        }
        topics.entry(topic.to_string()).or_default().insert(id);

        debug!(client_id = %id, topic, "subscribed");
        true
    }

    /// Remove a client's subscription. Returns `true` if one was removed.
    pub fn unsubscribe(&self, id: ClientId, topic: &str) -> bool {
        let mut state = self.lock();
        let HubState { clients, topics } = &mut *state;
        let Some(entry) = clients.get_mut(&id) else {
            return false;
        };
        if !entry.topics.remove(topic) {
            return false;
        }
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }

        debug!(client_id = %id, topic, "unsubscribed");
        true
    }

    /// Deliver a `data` frame to every subscriber of `topic`.
    ///
    /// Returns the number of clients the frame was queued for.
    pub fn publish(&self, topic: &str, payload: &Value) -> usize {
        self.fan_out(topic, payload, FrameKind::Data, None)
    }

    /// Deliver an `ephemeral` frame to every subscriber of `topic` except
    /// `originator`.
    pub fn publish_except(&self, topic: &str, payload: &Value, originator: ClientId) -> usize {
        self.fan_out(topic, payload, FrameKind::Ephemeral, Some(originator))
    }

    /// Deliver an `artifact_reload` notice to every registered client,
    /// subscribed or not.
    pub fn publish_global(&self, payload: &Value) -> usize {
        let state = self.lock();
        if state.clients.is_empty() {
            return 0;
        }
        let Some(frame) = self.encode(Envelope::new(FrameKind::ArtifactReload, None, payload))
        else {
            return 0;
        };

        self.metrics.record_publish();
        let delivered = state
            .clients
            .values()
            .filter(|entry| self.offer(&entry.client, frame.clone(), "*"))
            .count();
        drop(state);

        info!(delivered, "global notice published");
        delivered
    }

    /// Queue a control frame (`ack`, `error`) for one client.
    ///
    /// Returns `false` if the client is unknown or its queue is full.
    pub fn send_to(&self, id: ClientId, frame: &Frame) -> bool {
        let encoded = match frame.encode() {
            Ok(encoded) => encoded,
            Err(err) => {
                warn!(client_id = %id, error = %err, "failed to encode control frame");
                return false;
            }
        };

        let state = self.lock();
        match state.clients.get(&id) {
            Some(entry) => self.offer(&entry.client, encoded, "-"),
            None => false,
        }
    }

    /// Number of clients subscribed to `topic`
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock().topics.get(topic).map_or(0, HashSet::len)
    }

    /// Number of registered clients
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Whether a client is registered
    #[must_use]
    pub fn is_registered(&self, id: ClientId) -> bool {
        self.lock().clients.contains_key(&id)
    }

    /// Topics a client is subscribed to, sorted
    #[must_use]
    pub fn topics_of(&self, id: ClientId) -> Vec<String> {
        let mut topics: Vec<String> = self
            .lock()
            .clients
            .get(&id)
            .map(|entry| entry.topics.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    /// Delivery counters
    #[must_use]
    pub fn stats(&self) -> HubStats {
        self.metrics.snapshot()
    }

    fn fan_out(
        &self,
        topic: &str,
        payload: &Value,
        kind: FrameKind,
        except: Option<ClientId>,
    ) -> usize {
        let state = self.lock();
        let Some(subscribers) = state.topics.get(topic) else {
            return 0;
        };
        let only_originator =
            subscribers.len() == 1 && except.is_some_and(|id| subscribers.contains(&id));
        if subscribers.is_empty() || only_originator {
            return 0;
        }
        let Some(frame) = self.encode(Envelope::new(kind, Some(topic), payload)) else {
            return 0;
        };

        self.metrics.record_publish();
        let delivered = subscribers
            .iter()
            .filter(|id| Some(**id) != except)
            .filter_map(|id| state.clients.get(id))
            .filter(|entry| self.offer(&entry.client, frame.clone(), topic))
            .count();

        debug!(topic, kind = kind.as_str(), delivered, "published");
        delivered
    }

    fn encode(&self, envelope: Envelope<'_>) -> Option<OutboundFrame> {
        match envelope.encode() {
            Ok(frame) => Some(frame),
            Err(err) => {
                warn!(kind = envelope.kind.as_str(), error = %err, "failed to encode frame");
                None
            }
        }
    }

    fn offer(&self, client: &Client, frame: OutboundFrame, topic: &str) -> bool {
        match client.offer(frame) {
            Delivery::Queued => {
                self.metrics.record_delivered();
                true
            }
            Delivery::Dropped => {
                self.metrics.record_dropped();
                warn!(client_id = %client.id(), topic, "outbound queue full, frame dropped");
                false
            }
            Delivery::Closed => {
                self.metrics.record_dropped();
                debug!(client_id = %client.id(), topic, "outbound queue closed, frame dropped");
                false
            }
        }
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("BroadcastHub")
            .field("clients", &state.clients.len())
            .field("topics", &state.topics.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientQueue;
    use proptest::prelude::*;
    use serde_json::json;

    fn connect(hub: &BroadcastHub) -> (ClientId, ClientQueue) {
        let (client, queue) = Client::channel(16);
        let id = client.id();
        assert!(hub.register(client));
        (id, queue)
    }

    fn drain(queue: &mut ClientQueue) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Some(frame) = queue.try_recv() {
            frames.push(serde_json::from_str(frame.as_str()).unwrap());
        }
        frames
    }

    #[test]
    fn test_publish_reaches_only_subscribers() {
        let hub = BroadcastHub::new();
        let (a, mut qa) = connect(&hub);
        let (b, mut qb) = connect(&hub);
        let (_c, mut qc) = connect(&hub);

        hub.subscribe(a, "Post:create");
        hub.subscribe(b, "Post:create");

        let delivered = hub.publish("Post:create", &json!({"id": 1}));
        assert_eq!(delivered, 2);

        let expected = json!({"type": "data", "topic": "Post:create", "data": {"id": 1}});
        assert_eq!(drain(&mut qa), vec![expected.clone()]);
        assert_eq!(drain(&mut qb), vec![expected]);
        assert!(drain(&mut qc).is_empty());
    }

    #[test]
    fn test_publish_with_no_subscribers() {
        let hub = BroadcastHub::new();
        let (_a, mut qa) = connect(&hub);

        assert_eq!(hub.publish("Post:create", &json!({"id": 1})), 0);
        assert!(drain(&mut qa).is_empty());
        assert_eq!(hub.stats().published, 0);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let hub = BroadcastHub::new();
        let (a, mut qa) = connect(&hub);

        assert!(hub.subscribe(a, "Post:create"));
        assert!(hub.unsubscribe(a, "Post:create"));
        assert_eq!(hub.publish("Post:create", &json!({})), 0);
        assert!(drain(&mut qa).is_empty());
        assert_eq!(hub.subscriber_count("Post:create"), 0);
    }

    #[test]
    fn test_subscribe_idempotent() {
        let hub = BroadcastHub::new();
        let (a, _qa) = connect(&hub);

        assert!(hub.subscribe(a, "t"));
        assert!(!hub.subscribe(a, "t"));
        assert_eq!(hub.subscriber_count("t"), 1);
        assert!(hub.unsubscribe(a, "t"));
        assert!(!hub.unsubscribe(a, "t"));
    }

    #[test]
    fn test_subscribe_unknown_client_is_noop() {
        let hub = BroadcastHub::new();
        assert!(!hub.subscribe(ClientId::new(), "t"));
        assert_eq!(hub.subscriber_count("t"), 0);
    }

    #[tokio::test]
    async fn test_unregister_removes_everywhere() {
        let hub = BroadcastHub::new();
        let (a, mut qa) = connect(&hub);
        let (b, _qb) = connect(&hub);

        hub.subscribe(a, "x");
        hub.subscribe(a, "y");
        hub.subscribe(b, "y");

        assert!(hub.unregister(a));
        assert!(!hub.unregister(a));
        assert!(!hub.is_registered(a));
        assert_eq!(hub.client_count(), 1);
        assert_eq!(hub.subscriber_count("x"), 0);
        assert_eq!(hub.subscriber_count("y"), 1);
        assert!(hub.topics_of(a).is_empty());

        // queue is closed once the hub lets go of the sender
        assert_eq!(qa.recv().await, None);
    }

    #[test]
    fn test_register_and_unregister_counts() {
        let hub = BroadcastHub::new();
        let (a, _qa) = connect(&hub);
        assert_eq!(hub.client_count(), 1);
        assert!(hub.unregister(a));
        assert_eq!(hub.client_count(), 0);
    }

    #[test]
    fn test_publish_except_skips_originator() {
        let hub = BroadcastHub::new();
        let (a, mut qa) = connect(&hub);
        let (b, mut qb) = connect(&hub);
        let (c, mut qc) = connect(&hub);
        for id in [a, b, c] {
            hub.subscribe(id, "Feed:9");
        }

        let delivered = hub.publish_except("Feed:9", &json!({"typing": true}), a);
        assert_eq!(delivered, 2);
        assert!(drain(&mut qa).is_empty());

        let expected = json!({"type": "ephemeral", "topic": "Feed:9", "data": {"typing": true}});
        assert_eq!(drain(&mut qb), vec![expected.clone()]);
        assert_eq!(drain(&mut qc), vec![expected]);
    }

    #[test]
    fn test_publish_except_sole_subscriber() {
        let hub = BroadcastHub::new();
        let (a, mut qa) = connect(&hub);
        hub.subscribe(a, "Feed:9");

        assert_eq!(hub.publish_except("Feed:9", &json!(1), a), 0);
        assert!(drain(&mut qa).is_empty());
    }

    #[test]
    fn test_publish_global_reaches_everyone() {
        let hub = BroadcastHub::new();
        let (a, mut qa) = connect(&hub);
        let (_b, mut qb) = connect(&hub);
        hub.subscribe(a, "Post:create");

        let delivered = hub.publish_global(&json!({"generation": 2}));
        assert_eq!(delivered, 2);

        let expected = json!({"type": "artifact_reload", "data": {"generation": 2}});
        assert_eq!(drain(&mut qa), vec![expected.clone()]);
        assert_eq!(drain(&mut qb), vec![expected]);
    }

    #[test]
    fn test_full_queue_drops_for_that_client_only() {
        let hub = BroadcastHub::new();
        let (slow, mut slow_queue) = Client::channel(1);
        let slow_id = slow.id();
        hub.register(slow);
        let (fast, mut fast_queue) = connect(&hub);
        hub.subscribe(slow_id, "t");
        hub.subscribe(fast, "t");

        assert_eq!(hub.publish("t", &json!(1)), 2);
        assert_eq!(hub.publish("t", &json!(2)), 1);

        assert_eq!(drain(&mut slow_queue).len(), 1);
        assert_eq!(drain(&mut fast_queue).len(), 2);
        assert_eq!(hub.stats().dropped, 1);
        assert_eq!(hub.stats().delivered, 3);
    }

    #[test]
    fn test_send_to_single_client() {
        let hub = BroadcastHub::new();
        let (a, mut qa) = connect(&hub);
        let (_b, mut qb) = connect(&hub);

        assert!(hub.send_to(a, &Frame::error("bad frame")));
        assert_eq!(drain(&mut qa), vec![json!({"type": "error", "error": "bad frame"})]);
        assert!(drain(&mut qb).is_empty());
        assert!(!hub.send_to(ClientId::new(), &Frame::error("nobody")));
    }

    #[test]
    fn test_per_client_order_preserved() {
        let hub = BroadcastHub::new();
        let (a, mut qa) = connect(&hub);
        hub.subscribe(a, "t");

        for i in 0..10 {
            hub.publish("t", &json!(i));
        }
        let seen: Vec<Value> = drain(&mut qa).into_iter().map(|f| f["data"].clone()).collect();
        assert_eq!(seen, (0..10).map(|i| json!(i)).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_subscribe_and_unregister() {
        use std::sync::Arc;

        let hub = Arc::new(BroadcastHub::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let hub = Arc::clone(&hub);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let (client, _queue) = Client::channel(4);
                        let id = client.id();
                        hub.register(client);
                        hub.subscribe(id, "shared");
                        hub.subscribe(id, &format!("own:{n}"));
                        hub.publish("shared", &json!(n));
                        hub.unregister(id);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(hub.client_count(), 0);
        assert_eq!(hub.subscriber_count("shared"), 0);
        for n in 0..8 {
            assert_eq!(hub.subscriber_count(&format!("own:{n}")), 0);
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Subscribe(usize, usize),
        Unsubscribe(usize, usize),
        Unregister(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..4usize, 0..3usize).prop_map(|(c, t)| Op::Subscribe(c, t)),
            (0..4usize, 0..3usize).prop_map(|(c, t)| Op::Unsubscribe(c, t)),
            (0..4usize).prop_map(Op::Unregister),
        ]
    }

    proptest! {
        #[test]
        fn test_subscriptions_track_model(ops in proptest::collection::vec(op(), 0..64)) {
            let hub = BroadcastHub::new();
            let topics = ["a", "b", "c"];
            let mut ids = Vec::new();
            let mut queues = Vec::new();
            for _ in 0..4 {
                let (client, queue) = Client::channel(64);
                ids.push(client.id());
                hub.register(client);
                queues.push(queue);
            }

            let mut live = [true; 4];
            let mut model: Vec<HashSet<usize>> = vec![HashSet::new(); 3];
            for op in ops {
                match op {
                    Op::Subscribe(c, t) => {
                        hub.subscribe(ids[c], topics[t]);
                        if live[c] {
                            model[t].insert(c);
                        }
                    }
                    Op::Unsubscribe(c, t) => {
                        hub.unsubscribe(ids[c], topics[t]);
                        model[t].remove(&c);
                    }
                    Op::Unregister(c) => {
                        hub.unregister(ids[c]);
                        live[c] = false;
                        for set in &mut model {
                            set.remove(&c);
                        }
                    }
                }
            }

            for (t, topic) in topics.iter().enumerate() {
                prop_assert_eq!(hub.subscriber_count(topic), model[t].len());
                prop_assert_eq!(hub.publish(topic, &json!(null)), model[t].len());
            }
            prop_assert_eq!(hub.client_count(), live.iter().filter(|l| **l).count());
        }
    }
}
