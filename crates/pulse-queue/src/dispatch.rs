//! Dispatch loops - per-type polling and message processing
//!
//! One loop per message type, started lazily on first subscription. Each
//! cycle claims up to `batch_size` lowest-score entries from the type's
//! ordered index and fans every claimed message out to all registered
//! handlers concurrently, racing the fan-out against the processing
//! deadline.
//!
//! Claiming is not atomic: the message is marked `Processing` and then
//! removed from the index in two store calls. A crash in between leaves
//! the entry visible to the next cycle, which is the at-least-once
//! delivery window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use pulse_common::{HealthMessage, MessageStatus, MessageType, QueueConfig};
use pulse_store::OrderedStore;

use crate::events::{EventBus, QueueEvent};
use crate::failure::{handle_failure, FailureCause};
use crate::registry::HandlerRegistry;
use crate::Result;

/// Fixed sleep between dispatch cycles, whether or not the previous
/// batch was empty.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Ordered set holding the pending index for one message type.
pub fn queue_key(message_type: MessageType) -> String {
    format!("health:queue:{}", message_type.as_str())
}

/// Map holding all message bodies, keyed by message id.
pub const MESSAGE_MAP_KEY: &str = "health:messages";

/// State shared by the publisher, the dispatch loops, and the failure
/// pipeline.
pub(crate) struct QueueCore {
    pub store: Arc<dyn OrderedStore>,
    pub registry: HandlerRegistry,
    pub bus: EventBus,
    pub config: QueueConfig,
    /// Queue-wide shutdown signal; loops and pending retry timers listen.
    pub shutdown: broadcast::Sender<()>,
}

impl QueueCore {
    pub async fn persist(&self, message: &HealthMessage) -> Result<()> {
        let body = serde_json::to_string(message)?;
        self.store
            .put_field(MESSAGE_MAP_KEY, &message.id, &body)
            .await?;
        Ok(())
    }
}

/// Handle to one running dispatch loop. Dropping it stops the loop.
pub(crate) struct DispatchHandle {
    stop_tx: oneshot::Sender<()>,
}

impl DispatchHandle {
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
    }
}

pub(crate) fn spawn_dispatch_loop(
    core: Arc<QueueCore>,
    message_type: MessageType,
) -> DispatchHandle {
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let mut shutdown_rx = core.shutdown.subscribe();

    tokio::spawn(async move {
        debug!(message_type = %message_type, "Dispatch loop started");

        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    if let Err(e) = dispatch_cycle(&core, message_type).await {
                        warn!(message_type = %message_type, error = %e, "Dispatch cycle failed");
                        core.bus.publish(QueueEvent::TransportError(e.to_string()));
                    }
                }
            }
        }

        debug!(message_type = %message_type, "Dispatch loop stopped");
    });

    DispatchHandle { stop_tx }
}

async fn dispatch_cycle(core: &Arc<QueueCore>, message_type: MessageType) -> Result<()> {
    let key = queue_key(message_type);
    let bodies = core
        .store
        .range_lowest_scores(&key, core.config.batch_size)
        .await?;
    if bodies.is_empty() {
        return Ok(());
    }

    let mut claimed = Vec::with_capacity(bodies.len());
    for body in bodies {
        if let Some(message) = claim(core, &key, &body).await? {
            claimed.push(message);
        }
    }

    join_all(
        claimed
            .into_iter()
            .map(|message| process_message(core, message)),
    )
    .await;

    Ok(())
}

/// Turns one index entry into a claimed message, or drops/skips it.
///
/// The body map record is authoritative over the index copy: a terminal
/// record means the entry is stale (a duplicate claim after completion)
/// and is removed without processing.
async fn claim(core: &Arc<QueueCore>, key: &str, body: &str) -> Result<Option<HealthMessage>> {
    let mut message: HealthMessage = match serde_json::from_str(body) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "Skipping undecodable queue entry");
            return Ok(None);
        }
    };

    if let Some(record) = core.store.get_field(MESSAGE_MAP_KEY, &message.id).await? {
        match serde_json::from_str::<HealthMessage>(&record) {
            Ok(current) if current.status.is_terminal() => {
                core.store.remove_scored(key, &message.id).await?;
                return Ok(None);
            }
            Ok(current) => message = current,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Ignoring undecodable message record");
            }
        }
    }

    if core.registry.snapshot(message.message_type).is_empty() {
        // Leave the entry pending for a later subscriber.
        return Ok(None);
    }

    message.status = MessageStatus::Processing;
    core.persist(&message).await?;
    core.store.remove_scored(key, &message.id).await?;
    Ok(Some(message))
}

/// Runs all registered handlers for the claimed message, racing the
/// fan-out against the processing deadline.
///
/// Handlers run as spawned tasks, so a timed-out straggler is abandoned
/// rather than cancelled; it may still complete after the message has
/// been re-enqueued. That duplicate-processing window is inherent to the
/// at-least-once contract.
async fn process_message(core: &Arc<QueueCore>, mut message: HealthMessage) {
    let handlers = core.registry.snapshot(message.message_type);
    debug!(
        message_id = %message.id,
        message_type = %message.message_type,
        handlers = handlers.len(),
        attempt = message.attempts + 1,
        "Processing message"
    );

    let tasks: Vec<_> = handlers
        .into_iter()
        .map(|handler| {
            let msg = message.clone();
            tokio::spawn(async move { handler.handle(&msg).await })
        })
        .collect();

    let outcome = tokio::time::timeout(core.config.processing_timeout, join_all(tasks)).await;

    let failure = match outcome {
        Err(_) => Some(FailureCause::Timeout),
        Ok(results) => results.into_iter().find_map(|result| match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(FailureCause::Handler(e.to_string())),
            Err(join_err) => Some(FailureCause::Handler(format!("handler panicked: {join_err}"))),
        }),
    };

    match failure {
        None => {
            message.status = MessageStatus::Completed;
            message.processed_at = Some(Utc::now());
            if let Err(e) = core.persist(&message).await {
                warn!(message_id = %message.id, error = %e, "Failed to persist completed message");
                core.bus.publish(QueueEvent::TransportError(e.to_string()));
            }
            debug!(message_id = %message.id, "Message processed");
            core.bus.publish(QueueEvent::Processed(message));
        }
        Some(cause) => handle_failure(core, message, cause).await,
    }
}
