//! Event bus for queue lifecycle events.
//!
//! [`EventBus`] is a thin wrapper around [`tokio::sync::broadcast`].
//! Events are purely observational: no event changes queue state, and
//! every state change is emitted as a side effect of the component that
//! performed it. External collaborators (alerting, logging) subscribe to
//! learn about degraded delivery; producers only ever see a returned id
//! or an error.
//!
//! The bus is constructor-injected into [`HealthQueue`](crate::HealthQueue)
//! so the queue stays instantiable multiple times without global state.

use pulse_common::HealthMessage;
use tokio::sync::broadcast;

/// Lifecycle event carrying a snapshot of the message at emission time.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// Message accepted and inserted into the priority index.
    Published(HealthMessage),
    /// All handlers completed within the processing deadline.
    Processed(HealthMessage),
    /// Message re-enqueued after a failed attempt; `attempts` reflects
    /// the retry it is about to make.
    Retry(HealthMessage),
    /// Retry budget exhausted; terminal failure.
    Failed(HealthMessage),
    /// Terminal failure of a critical-priority message, for escalation.
    CriticalFailed(HealthMessage),
    /// Store/transport-level failure outside the retry pipeline.
    TransportError(String),
}

/// Broadcast channel for queue events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    /// Creates a new bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Errors are ignored if there are no active subscribers.
    pub fn publish(&self, event: QueueEvent) {
        let _ = self.tx.send(event);
    }

    /// Subscribes to the bus and returns a new receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::{HealthMessage, MessagePayload, MessageType, Priority};

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let bus = EventBus::new(8);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let msg = HealthMessage::new(
            MessageType::Reminder,
            "user-1",
            MessagePayload::Reminder {
                reminder_type: "hydration".to_string(),
            },
            Priority::Normal,
        );
        bus.publish(QueueEvent::Published(msg.clone()));

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                QueueEvent::Published(m) => assert_eq!(m.id, msg.id),
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[test]
    fn publish_without_subscribers_is_a_noop() {
        let bus = EventBus::default();
        bus.publish(QueueEvent::TransportError("connection reset".to_string()));
    }
}
