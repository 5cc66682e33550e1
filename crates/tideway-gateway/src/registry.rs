//! Topic registry: the shared topic -> subscriber mapping
//!
//! This is the single shared mutable structure in the gateway. The maps are
//! DashMap-sharded so registration on one topic does not contend with
//! dispatch on another.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::connection::{ConnectionState, SubscriberConnection};
use crate::event::Event;

/// Most recent events kept per topic for the admin tail endpoint. This buffer
/// is observational only and never feeds subscriber streams.
pub const TAIL_BUFFER_SIZE: usize = 200;

/// A tail-buffer entry, as served by `/v1/admin/topics/{topic}/tail`.
#[derive(Debug, Clone, Serialize)]
pub struct TailEvent {
    pub id: String,
    pub payload: String,
}

/// Maps topic names to the set of currently subscribed connections.
///
/// Topics are implicit: an index entry exists iff its subscriber set is
/// non-empty. Registration creates the entry, the last deregistration removes
/// it. A connection id appears in at most one topic's set; re-registering an
/// existing id replaces the old connection.
#[derive(Clone)]
pub struct TopicRegistry {
    /// connection_id -> connection
    connections: Arc<DashMap<String, SubscriberConnection>>,
    /// topic -> [connection_ids], entry present iff non-empty
    topic_index: Arc<DashMap<String, Vec<String>>>,
    /// topic -> recent events, entry lives and dies with the topic
    topic_tail: Arc<DashMap<String, VecDeque<TailEvent>>>,
    /// Keep-alive broadcaster shared by every stream
    heartbeat_tx: broadcast::Sender<i64>,
    queue_capacity: usize,
}

impl TopicRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        let (heartbeat_tx, _) = broadcast::channel(16);
        Self {
            connections: Arc::new(DashMap::new()),
            topic_index: Arc::new(DashMap::new()),
            topic_tail: Arc::new(DashMap::new()),
            heartbeat_tx,
            queue_capacity,
        }
    }

    /// Register a new subscriber connection on `topic`.
    ///
    /// Uses the client-chosen id when given, otherwise generates one. If the
    /// id is already registered the stale connection is replaced, matching
    /// the behavior a reconnecting client expects.
    pub fn register(
        &self,
        topic: String,
        subscriber_id: Option<String>,
    ) -> (SubscriberConnection, broadcast::Receiver<Arc<Event>>) {
        let id = subscriber_id
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if self.connections.contains_key(&id) {
            self.unregister(&id);
        }

        let (connection, receiver) =
            SubscriberConnection::new(id.clone(), topic.clone(), self.queue_capacity);

        self.connections.insert(id.clone(), connection.clone());
        self.topic_index.entry(topic).or_default().push(id);
        connection.set_state(ConnectionState::Active);

        (connection, receiver)
    }

    /// Remove whatever connection currently holds `connection_id` and, if it
    /// was the topic's last subscriber, the topic itself.
    pub fn unregister(&self, connection_id: &str) {
        if let Some((_, connection)) = self.connections.remove(connection_id) {
            self.finish_removal(&connection);
        }
    }

    /// Remove `connection`, but only if it is still the registered holder of
    /// its id.
    ///
    /// Ids can be reused across reconnects, so a teardown guard firing after
    /// its connection has been replaced must not evict the replacement. The
    /// stale handle is still marked closed either way.
    pub fn unregister_connection(&self, connection: &SubscriberConnection) {
        connection.set_state(ConnectionState::Closed);

        let removed = self
            .connections
            .remove_if(connection.id.as_str(), |_, stored| {
                stored.same_connection(connection)
            });
        if removed.is_some() {
            self.finish_removal(connection);
        }
    }

    fn finish_removal(&self, connection: &SubscriberConnection) {
        connection.set_state(ConnectionState::Closed);

        if let Some(mut ids) = self.topic_index.get_mut(&connection.topic) {
            ids.retain(|id| *id != connection.id);
        }
        if self
            .topic_index
            .remove_if(&connection.topic, |_, ids| ids.is_empty())
            .is_some()
        {
            self.topic_tail.remove(&connection.topic);
        }

        info!(
            connection_id = %connection.id,
            topic = %connection.topic,
            "connection unregistered"
        );
    }

    /// Append an event to its topic's tail buffer, evicting the oldest
    /// entries past `TAIL_BUFFER_SIZE`.
    pub fn record_tail(&self, event: &Event) {
        let mut tail = self.topic_tail.entry(event.topic.clone()).or_default();
        tail.push_back(TailEvent {
            id: event.id.clone(),
            payload: event.payload.clone(),
        });
        while tail.len() > TAIL_BUFFER_SIZE {
            tail.pop_front();
        }
    }

    /// Last `limit` events recorded for `topic`, oldest first.
    pub fn tail(&self, topic: &str, limit: usize) -> Vec<TailEvent> {
        self.topic_tail
            .get(topic)
            .map(|tail| {
                tail.iter()
                    .skip(tail.len().saturating_sub(limit))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of the connections currently subscribed to `topic`.
    pub fn subscribers_of(&self, topic: &str) -> Vec<SubscriberConnection> {
        let ids = self
            .topic_index
            .get(topic)
            .map(|ids| ids.clone())
            .unwrap_or_default();

        ids.iter()
            .filter_map(|id| self.connections.get(id).map(|c| c.value().clone()))
            .collect()
    }

    /// All live topics with their subscriber counts.
    pub fn topics(&self) -> Vec<(String, usize)> {
        self.topic_index
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect()
    }

    pub fn topic_subscriber_count(&self, topic: &str) -> usize {
        self.topic_index.get(topic).map(|ids| ids.len()).unwrap_or(0)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Snapshot of every registered connection, for the admin API.
    pub fn list_connections(&self) -> Vec<SubscriberConnection> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// Send a keep-alive tick to every open stream.
    pub fn send_heartbeat(&self) {
        let ts = chrono::Utc::now().timestamp_millis();
        let _ = self.heartbeat_tx.send(ts);
    }

    pub fn subscribe_heartbeat(&self) -> broadcast::Receiver<i64> {
        self.heartbeat_tx.subscribe()
    }

    /// Drop connections whose write loop has gone away without a clean
    /// teardown (e.g. the task was aborted before the stream was dropped).
    pub fn cleanup_dead_connections(&self) {
        let dead_ids: Vec<String> = self
            .connections
            .iter()
            .filter(|e| !e.value().is_active())
            .map(|e| e.key().clone())
            .collect();

        for id in dead_ids {
            self.unregister(&id);
        }
    }
}
