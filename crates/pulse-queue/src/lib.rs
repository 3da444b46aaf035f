//! PulseMQ Queue Engine
//!
//! Priority-ordered, at-least-once message queue that decouples
//! health-event producers from asynchronous consumers, built on an
//! abstract ordered store:
//! - HealthQueue: publish API with capacity-based admission control
//! - HandlerRegistry: per-type handler fan-out with dynamic subscribe/unsubscribe
//! - Dispatch loops: one polling task per message type, started lazily
//! - Failure pipeline: exponential-backoff retries, terminal failure
//!   marking, and critical-priority escalation
//! - EventBus: broadcast stream of lifecycle events for external observers
//!
//! Delivery is at-least-once: claiming a batch is not atomic with the
//! status update, so handlers must tolerate duplicates.

pub mod error;
pub mod events;
pub mod registry;

mod dispatch;
mod failure;
mod queue;

pub use dispatch::{queue_key, MESSAGE_MAP_KEY};
pub use error::QueueError;
pub use events::{EventBus, QueueEvent};
pub use queue::HealthQueue;
pub use registry::{handler_fn, FnHandler, HandlerId, MessageHandler};

// Re-export the shared model and the store contract for consumers.
pub use pulse_common::{
    BloodPressure, HealthMessage, HealthMetrics, MessagePayload, MessageStatus, MessageType,
    Priority, QueueConfig, PRIORITY_WEIGHT_MS,
};
pub use pulse_store::{MemoryStore, OrderedStore, StoreError};

pub type Result<T> = std::result::Result<T, QueueError>;
