//! HealthQueue - facade wiring publisher, registry, loops, and events

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info};

use pulse_common::{
    HealthMessage, HealthMetrics, MessagePayload, MessageType, Priority, QueueConfig,
};
use pulse_store::OrderedStore;

use crate::dispatch::{queue_key, spawn_dispatch_loop, DispatchHandle, QueueCore, MESSAGE_MAP_KEY};
use crate::error::QueueError;
use crate::events::{EventBus, QueueEvent};
use crate::registry::{HandlerId, HandlerRegistry, MessageHandler};
use crate::Result;

/// Priority-ordered, at-least-once message queue for health events.
///
/// Producers publish through the typed wrappers or the generic
/// [`HealthQueue::publish`]; consumers register handlers per message
/// type. The first subscription for a type starts that type's dispatch
/// loop; [`HealthQueue::stop`] and [`HealthQueue::shutdown`] release the
/// loops deterministically.
pub struct HealthQueue {
    core: Arc<QueueCore>,
    loops: DashMap<MessageType, DispatchHandle>,
    running: AtomicBool,
}

impl HealthQueue {
    pub fn new(store: Arc<dyn OrderedStore>, config: QueueConfig, bus: EventBus) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            core: Arc::new(QueueCore {
                store,
                registry: HandlerRegistry::default(),
                bus,
                config,
                shutdown: shutdown_tx,
            }),
            loops: DashMap::new(),
            running: AtomicBool::new(true),
        }
    }

    /// New receiver on the injected event bus.
    pub fn events(&self) -> broadcast::Receiver<QueueEvent> {
        self.core.bus.subscribe()
    }

    // ------------------------------------------------------------------
    // Publisher
    // ------------------------------------------------------------------

    /// Publishes a message, returning its id.
    ///
    /// Fails with [`QueueError::QueueFull`] when the type's pending index
    /// has reached `max_queue_size`; the admission check performs no
    /// store mutation. Back-pressure is the caller's to handle.
    pub async fn publish(
        &self,
        message_type: MessageType,
        subject_id: impl Into<String>,
        payload: MessagePayload,
        priority: Priority,
    ) -> Result<String> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(QueueError::ShuttingDown);
        }

        let message = HealthMessage::new(message_type, subject_id, payload, priority);
        let key = queue_key(message_type);

        let size = match self.core.store.cardinality(&key).await {
            Ok(size) => size,
            Err(e) => {
                self.core
                    .bus
                    .publish(QueueEvent::TransportError(e.to_string()));
                return Err(e.into());
            }
        };
        if size >= self.core.config.max_queue_size {
            return Err(QueueError::QueueFull {
                message_type,
                size,
                limit: self.core.config.max_queue_size,
            });
        }

        let body = serde_json::to_string(&message)?;
        let score = message.priority_score(message.created_at);
        let write = async {
            self.core
                .store
                .put_field(MESSAGE_MAP_KEY, &message.id, &body)
                .await?;
            self.core
                .store
                .insert_scored(&key, &message.id, score, &body)
                .await?;
            Ok::<(), QueueError>(())
        };
        if let Err(e) = write.await {
            self.core
                .bus
                .publish(QueueEvent::TransportError(e.to_string()));
            return Err(e);
        }

        debug!(
            message_id = %message.id,
            message_type = %message_type,
            priority = message.priority as u8,
            score = score,
            "Message published"
        );
        let id = message.id.clone();
        self.core.bus.publish(QueueEvent::Published(message));
        Ok(id)
    }

    /// Vitals snapshot update for a subject. Normal priority.
    pub async fn publish_health_update(
        &self,
        subject_id: impl Into<String>,
        metrics: HealthMetrics,
    ) -> Result<String> {
        self.publish(
            MessageType::HealthDataUpdate,
            subject_id,
            MessagePayload::HealthUpdate { metrics },
            Priority::Normal,
        )
        .await
    }

    /// Health alert for a subject. Critical priority; terminal failure
    /// of the message raises a `CriticalFailed` event.
    pub async fn publish_health_alert(
        &self,
        subject_id: impl Into<String>,
        alert_type: impl Into<String>,
        metrics: HealthMetrics,
    ) -> Result<String> {
        self.publish(
            MessageType::AlertNotification,
            subject_id,
            MessagePayload::Alert {
                alert_type: alert_type.into(),
                metrics,
            },
            Priority::Critical,
        )
        .await
    }

    /// Reminder for a subject. Normal priority.
    pub async fn publish_reminder(
        &self,
        subject_id: impl Into<String>,
        reminder_type: impl Into<String>,
    ) -> Result<String> {
        self.publish(
            MessageType::Reminder,
            subject_id,
            MessagePayload::Reminder {
                reminder_type: reminder_type.into(),
            },
            Priority::Normal,
        )
        .await
    }

    /// Report generation request. Low priority.
    pub async fn publish_report_request(
        &self,
        subject_id: impl Into<String>,
        report_type: impl Into<String>,
    ) -> Result<String> {
        self.publish(
            MessageType::ReportGeneration,
            subject_id,
            MessagePayload::Report {
                report_type: report_type.into(),
            },
            Priority::Low,
        )
        .await
    }

    /// Data sync request. Low priority.
    pub async fn publish_sync_request(
        &self,
        subject_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<String> {
        self.publish(
            MessageType::SyncRequest,
            subject_id,
            MessagePayload::Sync { data },
            Priority::Low,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Consumers
    // ------------------------------------------------------------------

    /// Registers a handler for a message type and returns the token to
    /// unsubscribe it. The first subscription for a type starts that
    /// type's dispatch loop.
    pub fn subscribe(
        &self,
        message_type: MessageType,
        handler: Arc<dyn MessageHandler>,
    ) -> HandlerId {
        let id = self.core.registry.add(message_type, handler);
        if self.running.load(Ordering::SeqCst) {
            self.loops
                .entry(message_type)
                .or_insert_with(|| spawn_dispatch_loop(self.core.clone(), message_type));
        }
        id
    }

    /// Removes one subscription. The dispatch loop keeps polling even if
    /// this was the type's last handler; use [`HealthQueue::stop`] to
    /// release it.
    pub fn unsubscribe(&self, message_type: MessageType, handler_id: HandlerId) -> bool {
        self.core.registry.remove(message_type, handler_id)
    }

    /// Stops the dispatch loop for one message type. Pending messages
    /// stay in the index and resume when a new loop starts.
    pub fn stop(&self, message_type: MessageType) {
        if let Some((_, handle)) = self.loops.remove(&message_type) {
            info!(message_type = %message_type, "Stopping dispatch loop");
            handle.stop();
        }
    }

    /// Stops all dispatch loops and pending retry timers. Subsequent
    /// publishes fail with [`QueueError::ShuttingDown`].
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Shutting down health queue");
            let _ = self.core.shutdown.send(());
            self.loops.clear();
        }
    }
}
