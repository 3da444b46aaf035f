use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Message Classification
// ============================================================================

/// Closed set of message categories flowing through the queue.
///
/// The category determines which handlers receive a message; the priority
/// class is set explicitly by the producer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    HealthDataUpdate,
    AlertNotification,
    Reminder,
    ReportGeneration,
    SyncRequest,
}

impl MessageType {
    /// Wire name, also used to build per-type store keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::HealthDataUpdate => "health_data_update",
            MessageType::AlertNotification => "alert_notification",
            MessageType::Reminder => "reminder",
            MessageType::ReportGeneration => "report_generation",
            MessageType::SyncRequest => "sync_request",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Weight applied per priority level when computing a priority score,
/// in milliseconds. Large enough that priority dominates ordering across
/// a wide time window.
pub const PRIORITY_WEIGHT_MS: i64 = 10_000_000;

/// Message priority. Lower numeric value is more urgent.
///
/// Serialized as its integer value (1..=3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Priority {
    /// Alerts. Terminal failure of a critical message is escalated.
    Critical = 1,
    /// Real-time data updates and reminders.
    Normal = 2,
    /// Reports and background sync.
    Low = 3,
}

impl Priority {
    /// Score discount for this priority level, in milliseconds.
    pub fn weight(self) -> i64 {
        (4 - self as u8 as i64) * PRIORITY_WEIGHT_MS
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::Critical),
            2 => Ok(Priority::Normal),
            3 => Ok(Priority::Low),
            other => Err(format!("invalid priority: {other}")),
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> u8 {
        priority as u8
    }
}

/// Lifecycle status of a message.
///
/// Transitions are monotonic per attempt cycle:
/// `Pending -> Processing -> {Completed | Pending (retry) | Failed}`.
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageStatus::Completed | MessageStatus::Failed)
    }
}

// ============================================================================
// Payloads
// ============================================================================

/// Partial vitals snapshot attached to updates and alerts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthMetrics {
    pub heart_rate: Option<f64>,
    pub blood_pressure: Option<BloodPressure>,
    pub blood_oxygen: Option<f64>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BloodPressure {
    pub systolic: f64,
    pub diastolic: f64,
}

/// Category-specific message payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePayload {
    HealthUpdate {
        metrics: HealthMetrics,
    },
    Alert {
        alert_type: String,
        metrics: HealthMetrics,
    },
    Reminder {
        reminder_type: String,
    },
    Report {
        report_type: String,
    },
    Sync {
        data: serde_json::Value,
    },
}

// ============================================================================
// Message Envelope
// ============================================================================

/// The unit of asynchronous work.
///
/// `id`, `message_type`, `subject_id`, `payload`, `priority`, and
/// `created_at` are immutable after creation; `status`, `attempts`, and
/// `processed_at` are the mutable lifecycle fields. Reprioritization
/// requires republishing a new message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMessage {
    pub id: String,
    pub message_type: MessageType,
    /// The user or patient this message concerns.
    pub subject_id: String,
    pub payload: MessagePayload,
    pub priority: Priority,
    pub status: MessageStatus,
    /// Number of retries performed so far. Bounded by `max_retries`.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    /// Set once, on the transition to `Completed`.
    pub processed_at: Option<DateTime<Utc>>,
}

impl HealthMessage {
    pub fn new(
        message_type: MessageType,
        subject_id: impl Into<String>,
        payload: MessagePayload,
        priority: Priority,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            message_type,
            subject_id: subject_id.into(),
            payload,
            priority,
            status: MessageStatus::Pending,
            attempts: 0,
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Ordering key for the per-type index. Lower sorts first.
    ///
    /// `enqueued_at` is the publish time on first enqueue and the
    /// re-enqueue time on retries; the priority discount is fixed, so a
    /// higher priority preempts older lower-priority messages across the
    /// whole weight window.
    pub fn priority_score(&self, enqueued_at: DateTime<Utc>) -> i64 {
        enqueued_at.timestamp_millis() - self.priority.weight()
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Tuning knobs recognized by the queue engine.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Retry budget per message. Exceeding it forces a terminal failure.
    pub max_retries: u32,
    /// Backoff base; attempt `n` waits `retry_delay * 2^(n-1)`.
    pub retry_delay: std::time::Duration,
    /// Per-attempt deadline for the handler fan-out.
    pub processing_timeout: std::time::Duration,
    /// Per-type admission cap enforced at publish time.
    pub max_queue_size: usize,
    /// Entries claimed per poll cycle.
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: std::time::Duration::from_secs(1),
            processing_timeout: std::time::Duration::from_secs(30),
            max_queue_size: 1000,
            batch_size: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn priority_score_discounts_by_weight() {
        let at = Utc.timestamp_millis_opt(50_000_000).unwrap();

        let critical = HealthMessage::new(
            MessageType::AlertNotification,
            "user-1",
            MessagePayload::Alert {
                alert_type: "tachycardia".to_string(),
                metrics: HealthMetrics::default(),
            },
            Priority::Critical,
        );
        let low = HealthMessage::new(
            MessageType::ReportGeneration,
            "user-1",
            MessagePayload::Report {
                report_type: "weekly".to_string(),
            },
            Priority::Low,
        );

        assert_eq!(critical.priority_score(at), 50_000_000 - 3 * PRIORITY_WEIGHT_MS);
        assert_eq!(low.priority_score(at), 50_000_000 - PRIORITY_WEIGHT_MS);
    }

    #[test]
    fn priority_serializes_as_integer() {
        let json = serde_json::to_string(&Priority::Critical).unwrap();
        assert_eq!(json, "1");

        let parsed: Priority = serde_json::from_str("3").unwrap();
        assert_eq!(parsed, Priority::Low);

        assert!(serde_json::from_str::<Priority>("4").is_err());
    }

    #[test]
    fn new_message_starts_pending_with_zero_attempts() {
        let msg = HealthMessage::new(
            MessageType::Reminder,
            "user-2",
            MessagePayload::Reminder {
                reminder_type: "medication".to_string(),
            },
            Priority::Normal,
        );

        assert_eq!(msg.status, MessageStatus::Pending);
        assert_eq!(msg.attempts, 0);
        assert!(msg.processed_at.is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(MessageStatus::Completed.is_terminal());
        assert!(MessageStatus::Failed.is_terminal());
        assert!(!MessageStatus::Pending.is_terminal());
        assert!(!MessageStatus::Processing.is_terminal());
    }

    #[test]
    fn message_round_trips_through_json() {
        let msg = HealthMessage::new(
            MessageType::HealthDataUpdate,
            "user-3",
            MessagePayload::HealthUpdate {
                metrics: HealthMetrics {
                    heart_rate: Some(72.0),
                    ..Default::default()
                },
            },
            Priority::Normal,
        );

        let body = serde_json::to_string(&msg).unwrap();
        let parsed: HealthMessage = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.id, msg.id);
        assert_eq!(parsed.message_type, MessageType::HealthDataUpdate);
        assert_eq!(parsed.priority, Priority::Normal);
    }
}
