// ── Generic keyed entity collection ──
//
// Concurrent storage with O(1) lookups. Each call takes at most one shard
// lock for a single read or write; snapshots are copied out so callers
// never iterate while holding a lock.

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;

/// A concurrent collection of one entity type keyed by its id.
pub(crate) struct EntityCollection<K, T> {
    by_id: DashMap<K, Arc<T>>,
}

impl<K, T> EntityCollection<K, T>
where
    K: Copy + Eq + Hash + Ord,
{
    pub(crate) fn new() -> Self {
        Self {
            by_id: DashMap::new(),
        }
    }

    /// Insert or update an entity. Returns `true` if the id was new.
    pub(crate) fn upsert(&self, id: K, entity: T) -> bool {
        self.by_id.insert(id, Arc::new(entity)).is_none()
    }

    /// Remove an entity. Returns it if it existed.
    pub(crate) fn remove(&self, id: &K) -> Option<Arc<T>> {
        self.by_id.remove(id).map(|(_, v)| v)
    }

    pub(crate) fn get(&self, id: &K) -> Option<Arc<T>> {
        self.by_id.get(id).map(|r| Arc::clone(r.value()))
    }

    /// All entities ordered by id.
    pub(crate) fn snapshot(&self) -> Vec<Arc<T>> {
        let mut entries: Vec<(K, Arc<T>)> = self
            .by_id
            .iter()
            .map(|r| (*r.key(), Arc::clone(r.value())))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, v)| v).collect()
    }

    /// Upsert every incoming entity, then prune ids not in the incoming set.
    pub(crate) fn replace_all(&self, items: impl IntoIterator<Item = (K, T)>) {
        let mut incoming = HashSet::new();
        for (id, entity) in items {
            incoming.insert(id);
            self.upsert(id, entity);
        }
        let stale: Vec<K> = self
            .by_id
            .iter()
            .map(|r| *r.key())
            .filter(|id| !incoming.contains(id))
            .collect();
        for id in stale {
            self.by_id.remove(&id);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    #[allow(dead_code)]
    pub(crate) fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
