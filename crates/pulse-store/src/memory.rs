//! In-memory ordered store
//!
//! Backs the queue in tests and local development. Every operation takes
//! a short-lived lock, so each call is atomic on its own, matching the
//! per-operation atomicity the engine expects from a real store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{OrderedStore, StoreError};

#[derive(Debug, Clone)]
struct ScoredEntry {
    score: i64,
    /// Insertion sequence; entries with equal scores keep arrival order.
    seq: u64,
    body: String,
}

/// In-process [`OrderedStore`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    sets: RwLock<HashMap<String, HashMap<String, ScoredEntry>>>,
    maps: RwLock<HashMap<String, HashMap<String, String>>>,
    seq: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderedStore for MemoryStore {
    async fn insert_scored(
        &self,
        set_key: &str,
        id: &str,
        score: i64,
        body: &str,
    ) -> Result<(), StoreError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let mut sets = self.sets.write();
        sets.entry(set_key.to_string()).or_default().insert(
            id.to_string(),
            ScoredEntry {
                score,
                seq,
                body: body.to_string(),
            },
        );
        Ok(())
    }

    async fn range_lowest_scores(
        &self,
        set_key: &str,
        limit: usize,
    ) -> Result<Vec<String>, StoreError> {
        let sets = self.sets.read();
        let Some(entries) = sets.get(set_key) else {
            return Ok(Vec::new());
        };

        let mut ordered: Vec<&ScoredEntry> = entries.values().collect();
        ordered.sort_by_key(|e| (e.score, e.seq));
        Ok(ordered
            .into_iter()
            .take(limit)
            .map(|e| e.body.clone())
            .collect())
    }

    async fn cardinality(&self, set_key: &str) -> Result<usize, StoreError> {
        let sets = self.sets.read();
        Ok(sets.get(set_key).map(|s| s.len()).unwrap_or(0))
    }

    async fn remove_scored(&self, set_key: &str, id: &str) -> Result<(), StoreError> {
        let mut sets = self.sets.write();
        if let Some(entries) = sets.get_mut(set_key) {
            entries.remove(id);
        }
        Ok(())
    }

    async fn put_field(&self, map_key: &str, id: &str, body: &str) -> Result<(), StoreError> {
        let mut maps = self.maps.write();
        maps.entry(map_key.to_string())
            .or_default()
            .insert(id.to_string(), body.to_string());
        Ok(())
    }

    async fn get_field(&self, map_key: &str, id: &str) -> Result<Option<String>, StoreError> {
        let maps = self.maps.read();
        Ok(maps.get(map_key).and_then(|m| m.get(id)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn range_orders_by_score_then_insertion() {
        let store = MemoryStore::new();
        store.insert_scored("q", "b", 20, "body-b").await.unwrap();
        store.insert_scored("q", "a", 10, "body-a").await.unwrap();
        store.insert_scored("q", "c", 10, "body-c").await.unwrap();

        let bodies = store.range_lowest_scores("q", 10).await.unwrap();
        assert_eq!(bodies, vec!["body-a", "body-c", "body-b"]);

        let first_two = store.range_lowest_scores("q", 2).await.unwrap();
        assert_eq!(first_two, vec!["body-a", "body-c"]);
    }

    #[tokio::test]
    async fn insert_replaces_entry_with_same_id() {
        let store = MemoryStore::new();
        store.insert_scored("q", "a", 10, "v1").await.unwrap();
        store.insert_scored("q", "a", 5, "v2").await.unwrap();

        assert_eq!(store.cardinality("q").await.unwrap(), 1);
        let bodies = store.range_lowest_scores("q", 10).await.unwrap();
        assert_eq!(bodies, vec!["v2"]);
    }

    #[tokio::test]
    async fn remove_and_cardinality() {
        let store = MemoryStore::new();
        store.insert_scored("q", "a", 1, "x").await.unwrap();
        store.insert_scored("q", "b", 2, "y").await.unwrap();
        assert_eq!(store.cardinality("q").await.unwrap(), 2);

        store.remove_scored("q", "a").await.unwrap();
        assert_eq!(store.cardinality("q").await.unwrap(), 1);

        // Absent id is not an error.
        store.remove_scored("q", "missing").await.unwrap();
        assert_eq!(store.cardinality("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn body_map_put_and_get() {
        let store = MemoryStore::new();
        assert!(store.get_field("m", "a").await.unwrap().is_none());

        store.put_field("m", "a", "record").await.unwrap();
        assert_eq!(
            store.get_field("m", "a").await.unwrap().as_deref(),
            Some("record")
        );

        store.put_field("m", "a", "updated").await.unwrap();
        assert_eq!(
            store.get_field("m", "a").await.unwrap().as_deref(),
            Some("updated")
        );
    }
}
