//! Keyed pyramid storage.
//!
//! Each pyramid sits behind its own `RwLock`: one writer per subject at a
//! time, readers take cloned snapshots under the read guard so they never
//! observe a half-applied update. The map itself is a `DashMap`; entries are
//! cloned out as `Arc` handles before any `.await`.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use pyramid_core::Pyramid;

/// Shared handle to one pyramid.
pub type PyramidHandle = Arc<RwLock<Pyramid>>;

/// Registry of pyramids indexed by id.
#[derive(Default)]
pub struct PyramidRegistry {
    pyramids: DashMap<String, PyramidHandle>,
}

impl PyramidRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pyramids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pyramids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pyramids.contains_key(id)
    }

    /// Handle for a pyramid, if registered.
    pub fn handle(&self, id: &str) -> Option<PyramidHandle> {
        self.pyramids.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Register a pyramid unless its id is taken.
    ///
    /// Returns the handle now stored under the id and whether it is the
    /// one just inserted.
    pub fn insert_if_absent(&self, pyramid: Pyramid) -> (PyramidHandle, bool) {
        match self.pyramids.entry(pyramid.base.id.clone()) {
            Entry::Occupied(existing) => (Arc::clone(existing.get()), false),
            Entry::Vacant(slot) => {
                debug!(pyramid_id = %pyramid.base.id, "Registered pyramid");
                let handle = Arc::new(RwLock::new(pyramid));
                slot.insert(Arc::clone(&handle));
                (handle, true)
            }
        }
    }

    /// Register a pyramid, replacing any previous one with the same id.
    pub fn replace(&self, pyramid: Pyramid) -> PyramidHandle {
        let id = pyramid.base.id.clone();
        let handle = Arc::new(RwLock::new(pyramid));
        self.pyramids.insert(id, Arc::clone(&handle));
        handle
    }

    /// Consistent copy of one pyramid.
    pub async fn snapshot(&self, id: &str) -> Option<Pyramid> {
        let handle = self.handle(id)?;
        let pyramid = handle.read().await;
        Some(pyramid.clone())
    }

    /// Consistent copies of every pyramid, ordered by id.
    pub async fn snapshots(&self) -> Vec<Pyramid> {
        let handles: Vec<PyramidHandle> = self
            .pyramids
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut pyramids = Vec::with_capacity(handles.len());
        for handle in handles {
            pyramids.push(handle.read().await.clone());
        }
        pyramids.sort_by(|a, b| a.base.id.cmp(&b.base.id));
        pyramids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pyramid_core::RelationshipKind;

    #[tokio::test]
    async fn test_insert_if_absent_keeps_first() {
        let registry = PyramidRegistry::new();
        let first = Pyramid::relationship("Bob", RelationshipKind::Friend, Utc::now());
        let second = Pyramid::relationship("Bob", RelationshipKind::Family, Utc::now());

        let (_, inserted) = registry.insert_if_absent(first);
        assert!(inserted);
        let (handle, inserted) = registry.insert_if_absent(second);
        assert!(!inserted);
        assert_eq!(registry.len(), 1);

        let stored = handle.read().await;
        let kind = stored.as_relationship().map(|r| r.relationship_kind);
        assert_eq!(kind, Some(RelationshipKind::Friend));
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let registry = PyramidRegistry::new();
        registry.insert_if_absent(Pyramid::relationship("Bob", RelationshipKind::Friend, Utc::now()));

        let snapshot = registry.snapshot("relationship_bob").await.unwrap();
        {
            let handle = registry.handle("relationship_bob").unwrap();
            let mut pyramid = handle.write().await;
            pyramid.archive(Utc::now());
        }
        assert_ne!(snapshot.status(), pyramid_core::PyramidStatus::Archived);
        assert!(registry.snapshot("relationship_alice").await.is_none());
    }

    #[tokio::test]
    async fn test_snapshots_sorted() {
        let registry = PyramidRegistry::new();
        registry.insert_if_absent(Pyramid::relationship("Zoe", RelationshipKind::Friend, Utc::now()));
        registry.insert_if_absent(Pyramid::relationship("Al", RelationshipKind::Friend, Utc::now()));
        let ids: Vec<String> = registry
            .snapshots()
            .await
            .into_iter()
            .map(|p| p.base.id)
            .collect();
        assert_eq!(ids, vec!["relationship_al", "relationship_zoe"]);
    }
}
