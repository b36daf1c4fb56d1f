//! Per-type identity caches.
//!
//! Each session owns one `EntityIndex` per entity type. An index holds at
//! most one live instance per id. Later records for a cached id return
//! the existing instance with its original attributes: first write wins,
//! and an entity is stable for the lifetime of its session. Filtering
//! code relies on that stability.

use crate::entities::{
    Author, Character, CharacterInstance, EntityId, Speech, SpeechCluster, Work,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Identity map for one entity type: id to the single live instance,
/// plus the insertion order for "everything seen so far" views.
pub struct EntityIndex<T> {
    inner: Mutex<IndexInner<T>>,
}

struct IndexInner<T> {
    by_id: HashMap<EntityId, Arc<T>>,
    order: Vec<Arc<T>>,
}

impl<T> EntityIndex<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(IndexInner {
                by_id: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// The cached instance for `id`, if any.
    pub fn get(&self, id: EntityId) -> Option<Arc<T>> {
        self.inner.lock().unwrap().by_id.get(&id).cloned()
    }

    /// Insert `value` under `id` unless an instance already exists, and
    /// return the instance that is cached afterwards.
    ///
    /// Callers check the index before building a candidate; this re-check
    /// under the lock keeps the first-write-wins rule deterministic when
    /// two tasks build the same id concurrently. The loser's candidate is
    /// discarded.
    pub fn insert_if_absent(&self, id: EntityId, value: T) -> Arc<T> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(existing) = inner.by_id.get(&id) {
            return existing.clone();
        }
        let entity = Arc::new(value);
        inner.by_id.insert(id, entity.clone());
        inner.order.push(entity.clone());
        entity
    }

    /// Every cached instance, in insertion order.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.inner.lock().unwrap().order.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.inner.lock().unwrap().by_id.contains_key(&id)
    }
}

impl<T> Default for EntityIndex<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// The six per-type indexes owned by a session.
pub(crate) struct Caches {
    pub authors: EntityIndex<Author>,
    pub works: EntityIndex<Work>,
    pub characters: EntityIndex<Character>,
    pub instances: EntityIndex<CharacterInstance>,
    pub clusters: EntityIndex<SpeechCluster>,
    pub speeches: EntityIndex<Speech>,
}

impl Caches {
    pub fn new() -> Self {
        Self {
            authors: EntityIndex::new(),
            works: EntityIndex::new(),
            characters: EntityIndex::new(),
            instances: EntityIndex::new(),
            clusters: EntityIndex::new(),
            speeches: EntityIndex::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speechdb::RawRecord;

    fn author(id: EntityId, name: &str) -> Author {
        Author {
            id,
            name: Some(name.to_string()),
            wd: None,
            urn: None,
            attributes: RawRecord::new(),
        }
    }

    #[test]
    fn test_insert_then_get_returns_same_instance() {
        let index = EntityIndex::new();
        let inserted = index.insert_if_absent(1, author(1, "Homer"));
        let fetched = index.get(1).unwrap();
        assert!(Arc::ptr_eq(&inserted, &fetched));
    }

    #[test]
    fn test_first_write_wins() {
        let index = EntityIndex::new();
        let first = index.insert_if_absent(1, author(1, "Homer"));
        let second = index.insert_if_absent(1, author(1, "Homerus"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.name.as_deref(), Some("Homer"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_snapshot_preserves_insertion_order() {
        let index = EntityIndex::new();
        index.insert_if_absent(3, author(3, "Vergil"));
        index.insert_if_absent(1, author(1, "Homer"));
        index.insert_if_absent(2, author(2, "Apollonius"));
        index.insert_if_absent(1, author(1, "Homerus"));

        let ids: Vec<EntityId> = index.snapshot().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_contains() {
        let index = EntityIndex::new();
        assert!(!index.contains(1));
        index.insert_if_absent(1, author(1, "Homer"));
        assert!(index.contains(1));
        assert!(!index.is_empty());
    }
}
