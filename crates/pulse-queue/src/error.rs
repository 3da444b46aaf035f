//! Queue Error Types

use pulse_common::MessageType;
use pulse_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    /// Admission control rejected the publish; surfaced to the caller,
    /// never retried by the queue.
    #[error("queue full for {message_type}: {size} pending (limit {limit})")]
    QueueFull {
        message_type: MessageType,
        size: usize,
        limit: usize,
    },

    #[error("queue is shutting down")]
    ShuttingDown,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
