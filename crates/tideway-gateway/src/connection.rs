//! Subscriber connection types

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::event::Event;

/// Lifecycle of a subscriber connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Active = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Active,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// One open streaming client, bound to a single topic for its lifetime.
///
/// The delivery queue is a bounded `broadcast` channel with exactly one
/// receiver: the connection's own write loop. Multiple dispatch calls may
/// enqueue concurrently; on overflow the channel drops the oldest events and
/// the write loop observes the skip count, which is the gateway's drop-oldest
/// backpressure policy.
#[derive(Debug, Clone)]
pub struct SubscriberConnection {
    /// Client-supplied or generated id, used for logging and the admin API
    pub id: String,
    /// The one topic this connection receives events for
    pub topic: String,
    /// When the connection was registered (wall clock, for the admin API)
    pub connected_at: chrono::DateTime<chrono::Utc>,
    sender: broadcast::Sender<Arc<Event>>,
    state: Arc<AtomicU8>,
    lagged: Arc<AtomicU64>,
}

impl SubscriberConnection {
    /// Create a connection with a delivery queue of `queue_capacity` events.
    pub fn new(
        id: String,
        topic: String,
        queue_capacity: usize,
    ) -> (Self, broadcast::Receiver<Arc<Event>>) {
        let (sender, receiver) = broadcast::channel(queue_capacity.max(1));
        let connection = Self {
            id,
            topic,
            connected_at: chrono::Utc::now(),
            sender,
            state: Arc::new(AtomicU8::new(ConnectionState::Connecting as u8)),
            lagged: Arc::new(AtomicU64::new(0)),
        };
        (connection, receiver)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Offer an event to this connection's queue.
    ///
    /// Fails with `ConnectionClosed` when the write loop is gone (receiver
    /// dropped), which is the dispatcher's cue to tear the connection down. A
    /// full queue is not a failure here: the channel keeps the newest events
    /// and the write loop accounts for the dropped ones.
    pub fn enqueue(&self, event: Arc<Event>) -> Result<()> {
        self.sender
            .send(event)
            .map(|_| ())
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Whether two handles refer to the same underlying connection instance.
    ///
    /// Connection ids are client-chosen and can be reused across reconnects,
    /// so id equality alone cannot identify a connection.
    pub fn same_connection(&self, other: &SubscriberConnection) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Whether the write loop is still draining the queue.
    pub fn is_active(&self) -> bool {
        self.sender.receiver_count() > 0 && self.state() != ConnectionState::Closed
    }

    /// Record events skipped by the drop-oldest policy.
    pub fn record_lag(&self, skipped: u64) {
        self.lagged.fetch_add(skipped, Ordering::Relaxed);
    }

    /// Total events this connection has lost to backpressure.
    pub fn lagged_total(&self) -> u64 {
        self.lagged.load(Ordering::Relaxed)
    }
}
