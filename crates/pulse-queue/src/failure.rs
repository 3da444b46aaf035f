//! Failure and retry pipeline
//!
//! Every failed attempt lands here, whether the cause was a handler
//! error, a handler panic, or the processing deadline firing; all causes
//! share one retry/backoff policy. Within the retry budget the message
//! goes back to `Pending` and is re-inserted after an exponential delay,
//! scored with its original priority and the re-enqueue timestamp.
//! Outside the budget it is marked `Failed` terminally, and critical
//! messages additionally raise an escalation event.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, warn};

use pulse_common::{HealthMessage, MessageStatus, Priority};

use crate::dispatch::{queue_key, QueueCore, MESSAGE_MAP_KEY};
use crate::events::QueueEvent;
use crate::Result;

/// What aborted a processing attempt.
pub(crate) enum FailureCause {
    Handler(String),
    Timeout,
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureCause::Handler(e) => write!(f, "handler error: {e}"),
            FailureCause::Timeout => write!(f, "processing timeout"),
        }
    }
}

/// Delay before retry `attempt` (1-indexed): `base * 2^(attempt-1)`.
pub(crate) fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt.saturating_sub(1))
}

pub(crate) async fn handle_failure(
    core: &Arc<QueueCore>,
    mut message: HealthMessage,
    cause: FailureCause,
) {
    warn!(
        message_id = %message.id,
        message_type = %message.message_type,
        attempts = message.attempts,
        cause = %cause,
        "Message processing failed"
    );

    if message.attempts < core.config.max_retries {
        message.attempts += 1;
        message.status = MessageStatus::Pending;
        let delay = retry_delay(core.config.retry_delay, message.attempts);
        debug!(
            message_id = %message.id,
            attempt = message.attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );

        let core = core.clone();
        let mut shutdown_rx = core.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            if let Err(e) = requeue(&core, &message).await {
                warn!(message_id = %message.id, error = %e, "Failed to re-enqueue message");
                core.bus.publish(QueueEvent::TransportError(e.to_string()));
                return;
            }
            core.bus.publish(QueueEvent::Retry(message));
        });
    } else {
        message.status = MessageStatus::Failed;
        if let Err(e) = core.persist(&message).await {
            warn!(message_id = %message.id, error = %e, "Failed to persist failed message");
            core.bus.publish(QueueEvent::TransportError(e.to_string()));
        }
        error!(
            message_id = %message.id,
            message_type = %message.message_type,
            attempts = message.attempts,
            "Message failed terminally"
        );

        let critical = message.priority == Priority::Critical;
        core.bus.publish(QueueEvent::Failed(message.clone()));
        if critical {
            core.bus.publish(QueueEvent::CriticalFailed(message));
        }
    }
}

/// Re-inserts a retrying message with a freshly computed score: original
/// priority, current timestamp.
async fn requeue(core: &Arc<QueueCore>, message: &HealthMessage) -> Result<()> {
    let body = serde_json::to_string(message)?;
    let key = queue_key(message.message_type);
    let score = message.priority_score(Utc::now());
    core.store
        .put_field(MESSAGE_MAP_KEY, &message.id, &body)
        .await?;
    core.store
        .insert_scored(&key, &message.id, score, &body)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        let base = Duration::from_millis(1000);
        assert_eq!(retry_delay(base, 1), Duration::from_millis(1000));
        assert_eq!(retry_delay(base, 2), Duration::from_millis(2000));
        assert_eq!(retry_delay(base, 3), Duration::from_millis(4000));
        assert_eq!(retry_delay(base, 4), Duration::from_millis(8000));
    }
}
