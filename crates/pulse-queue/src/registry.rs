//! Handler registry - per-type fan-out handler sets
//!
//! Multiple handlers may register for the same message type; all of them
//! receive every matching message, concurrently and in no particular
//! order. Handlers are identified by a [`HandlerId`] returned from
//! subscribe, which is the token used to unsubscribe.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use pulse_common::{HealthMessage, MessageType};

/// Asynchronous consumer of messages.
///
/// Delivery is at-least-once; implementations must be idempotent with
/// respect to duplicate messages. A returned error (or a panic) routes
/// the message into the retry pipeline.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &HealthMessage) -> anyhow::Result<()>;
}

/// Opaque token identifying one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl HandlerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Function-backed handler wrapping a closure that creates a new future
/// per invocation.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(HealthMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, message: &HealthMessage) -> anyhow::Result<()> {
        (self.f)(message.clone()).await
    }
}

/// Wraps a closure as a shared [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<FnHandler<F>>
where
    F: Fn(HealthMessage) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    Arc::new(FnHandler { f })
}

/// Per-type handler sets. Mutation and snapshotting are both cheap; the
/// dispatch path clones the `Arc`s out so handlers added or removed
/// mid-flight take effect on the next message.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: DashMap<MessageType, Vec<(HandlerId, Arc<dyn MessageHandler>)>>,
}

impl HandlerRegistry {
    pub fn add(&self, message_type: MessageType, handler: Arc<dyn MessageHandler>) -> HandlerId {
        let id = HandlerId::new();
        self.handlers
            .entry(message_type)
            .or_default()
            .push((id, handler));
        id
    }

    pub fn remove(&self, message_type: MessageType, handler_id: HandlerId) -> bool {
        let Some(mut entry) = self.handlers.get_mut(&message_type) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|(id, _)| *id != handler_id);
        entry.len() != before
    }

    pub fn snapshot(&self, message_type: MessageType) -> Vec<Arc<dyn MessageHandler>> {
        self.handlers
            .get(&message_type)
            .map(|entry| entry.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_common::{MessagePayload, Priority};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn reminder(subject: &str) -> HealthMessage {
        HealthMessage::new(
            MessageType::Reminder,
            subject,
            MessagePayload::Reminder {
                reminder_type: "medication".to_string(),
            },
            Priority::Normal,
        )
    }

    #[tokio::test]
    async fn fan_out_snapshot_reaches_all_handlers() {
        let registry = HandlerRegistry::default();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            registry.add(
                MessageType::Reminder,
                handler_fn(move |_msg| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            );
        }

        let msg = reminder("user-1");
        for handler in registry.snapshot(MessageType::Reminder) {
            handler.handle(&msg).await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn remove_only_affects_the_given_subscription() {
        let registry = HandlerRegistry::default();
        let a = registry.add(
            MessageType::Reminder,
            handler_fn(|_msg| async { Ok(()) }),
        );
        let b = registry.add(
            MessageType::Reminder,
            handler_fn(|_msg| async { Ok(()) }),
        );

        assert!(registry.remove(MessageType::Reminder, a));
        assert_eq!(registry.snapshot(MessageType::Reminder).len(), 1);

        // Removing twice reports false.
        assert!(!registry.remove(MessageType::Reminder, a));
        assert!(registry.remove(MessageType::Reminder, b));
        assert!(registry.snapshot(MessageType::Reminder).is_empty());
    }

    #[test]
    fn remove_for_unknown_type_reports_false() {
        let registry = HandlerRegistry::default();
        let id = registry.add(
            MessageType::Reminder,
            handler_fn(|_msg| async { Ok(()) }),
        );
        assert!(!registry.remove(MessageType::SyncRequest, id));
    }
}
