//! Ordered store adapter contract
//!
//! The queue engine persists through an external service offering a
//! score-ordered set per message type (the priority index) and a hash map
//! keyed by message id (the body storage). This crate defines the
//! operation contract the engine consumes, plus an in-memory adapter for
//! tests and local development.
//!
//! Correctness relies on the store's own atomicity per operation; the
//! engine never holds a lock across a store call and never asks for
//! cross-operation transactions. A crash between a range read and the
//! follow-up status update can therefore surface the same entry twice —
//! at-least-once delivery is the contract, not exactly-once.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryStore;

/// Failure communicating with the backing store.
///
/// Not retried by the queue engine; retry, if desired, is the adapter's
/// responsibility.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store operation failed: {0}")]
    Operation(String),
}

/// Score-ordered set plus body map, as consumed by the queue engine.
///
/// One ordered set exists per message type; a single map holds all
/// message bodies keyed by message id. Bodies are opaque strings to the
/// store (the engine serializes JSON into them).
#[async_trait]
pub trait OrderedStore: Send + Sync {
    /// Add an entry to the ordered set, or replace the entry with the
    /// same id (score and body are both rewritten).
    async fn insert_scored(
        &self,
        set_key: &str,
        id: &str,
        score: i64,
        body: &str,
    ) -> Result<(), StoreError>;

    /// Read up to `limit` bodies with the lowest scores, without
    /// removing them.
    async fn range_lowest_scores(
        &self,
        set_key: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError>;

    /// Number of entries currently in the ordered set.
    async fn cardinality(&self, set_key: &str) -> Result<usize, StoreError>;

    /// Remove the entry with the given id from the ordered set. Removing
    /// an absent id is not an error.
    async fn remove_scored(&self, set_key: &str, id: &str) -> Result<(), StoreError>;

    /// Persist or update a field in the body map.
    async fn put_field(&self, map_key: &str, id: &str, body: &str) -> Result<(), StoreError>;

    /// Read a field from the body map.
    async fn get_field(&self, map_key: &str, id: &str) -> Result<Option<String>, StoreError>;
}
