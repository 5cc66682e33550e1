//! Event fan-out

use std::sync::Arc;

use tracing::{debug, warn};

use crate::event::Event;
use crate::registry::{TailEvent, TopicRegistry};

/// Routes a published event to every subscriber of its topic.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: TopicRegistry,
}

impl EventDispatcher {
    pub fn new(registry: TopicRegistry) -> Self {
        Self { registry }
    }

    /// Fan an event out to the topic's current subscribers.
    ///
    /// Returns the number of queues the event was enqueued onto. Zero
    /// subscribers means the event is dropped, which is not an error. An
    /// enqueue failure means that subscriber's write loop is gone; the
    /// connection is torn down and the remaining subscribers are unaffected.
    /// Fan-out is not atomic with respect to concurrent (de)registration: a
    /// subscriber leaving mid-dispatch simply misses the event.
    pub fn dispatch(&self, event: Event) -> usize {
        let subscribers = self.registry.subscribers_of(&event.topic);

        if subscribers.is_empty() {
            debug!(topic = %event.topic, id = %event.id, "no subscribers, event dropped");
            return 0;
        }

        self.registry.record_tail(&event);

        let topic = event.topic.clone();
        let id = event.id.clone();
        let received_at = event.received_at;
        let event = Arc::new(event);

        let mut delivered = 0;
        for connection in subscribers {
            match connection.enqueue(event.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    warn!(
                        connection_id = %connection.id,
                        topic = %topic,
                        error = %err,
                        "enqueue failed, tearing down connection"
                    );
                    self.registry.unregister_connection(&connection);
                }
            }
        }

        debug!(
            topic = %topic,
            id = %id,
            delivered,
            dispatch_us = received_at.elapsed().as_micros() as u64,
            "event dispatched"
        );
        delivered
    }

    /// Last `limit` events recorded for `topic`, oldest first.
    pub fn tail(&self, topic: &str, limit: usize) -> Vec<TailEvent> {
        self.registry.tail(topic, limit)
    }
}
