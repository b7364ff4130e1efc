//! Versioned pyramid snapshots.
//!
//! A store keeps the latest snapshot per pyramid. Writes are optimistic:
//! a snapshot older than the stored one is rejected with
//! [`EngineError::Conflict`], so a slow writer cannot clobber newer state.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use pyramid_core::Pyramid;

use crate::types::{EngineError, Result};

/// Snapshot format version.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// One stored pyramid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidSnapshot {
    pub schema_version: u32,
    /// Pyramid version at the time of the snapshot
    pub version: u64,
    pub saved_at: DateTime<Utc>,
    pub pyramid: Pyramid,
}

impl PyramidSnapshot {
    pub fn new(pyramid: Pyramid, saved_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            version: pyramid.base.version,
            saved_at,
            pyramid,
        }
    }

    pub fn pyramid_id(&self) -> &str {
        self.pyramid.id()
    }
}

/// Persistence seam for pyramid snapshots.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store a snapshot unless a newer version is already stored.
    async fn put(&self, snapshot: PyramidSnapshot) -> Result<()>;

    /// Latest snapshot for a pyramid.
    async fn get(&self, pyramid_id: &str) -> Result<Option<PyramidSnapshot>>;

    /// Every stored snapshot.
    async fn list(&self) -> Result<Vec<PyramidSnapshot>>;
}

fn check_version(pyramid_id: &str, stored: u64, attempted: u64) -> Result<()> {
    if stored > attempted {
        warn!(pyramid_id = %pyramid_id, stored, attempted, "Rejected stale snapshot");
        return Err(EngineError::Conflict {
            pyramid_id: pyramid_id.to_string(),
            stored,
            attempted,
        });
    }
    Ok(())
}

/// In-memory store.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: DashMap<String, PyramidSnapshot>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put(&self, snapshot: PyramidSnapshot) -> Result<()> {
        match self.snapshots.entry(snapshot.pyramid_id().to_string()) {
            Entry::Occupied(mut existing) => {
                check_version(existing.key(), existing.get().version, snapshot.version)?;
                existing.insert(snapshot);
            }
            Entry::Vacant(slot) => {
                slot.insert(snapshot);
            }
        }
        Ok(())
    }

    async fn get(&self, pyramid_id: &str) -> Result<Option<PyramidSnapshot>> {
        Ok(self.snapshots.get(pyramid_id).map(|s| s.value().clone()))
    }

    async fn list(&self) -> Result<Vec<PyramidSnapshot>> {
        let mut snapshots: Vec<PyramidSnapshot> =
            self.snapshots.iter().map(|s| s.value().clone()).collect();
        snapshots.sort_by(|a, b| a.pyramid_id().cmp(b.pyramid_id()));
        Ok(snapshots)
    }
}

/// One pretty-printed JSON file per pyramid in a directory.
pub struct JsonFileSnapshotStore {
    dir: PathBuf,
    /// Serializes read-check-write sequences
    write_lock: Mutex<()>,
}

impl JsonFileSnapshotStore {
    /// Open (and create if needed) a snapshot directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineError::Store(format!("create {}: {}", dir.display(), e)))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File for a pyramid id. Bytes outside `[A-Za-z0-9_-]` are written as
    /// `%XX`, so distinct ids never share a file.
    fn path_for(&self, pyramid_id: &str) -> PathBuf {
        let mut file_name = String::with_capacity(pyramid_id.len());
        for byte in pyramid_id.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                file_name.push(byte as char);
            } else {
                file_name.push_str(&format!("%{:02X}", byte));
            }
        }
        self.dir.join(format!("{}.json", file_name))
    }

    async fn read(&self, path: &Path) -> Result<Option<PyramidSnapshot>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::Store(format!("read {}: {}", path.display(), e))),
        }
    }
}

#[async_trait::async_trait]
impl SnapshotStore for JsonFileSnapshotStore {
    async fn put(&self, snapshot: PyramidSnapshot) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(snapshot.pyramid_id());

        if let Some(existing) = self.read(&path).await? {
            check_version(snapshot.pyramid_id(), existing.version, snapshot.version)?;
        }

        let json = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| EngineError::Store(format!("write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| EngineError::Store(format!("rename {}: {}", path.display(), e)))?;

        debug!(pyramid_id = %snapshot.pyramid_id(), version = snapshot.version, "Saved snapshot");
        Ok(())
    }

    async fn get(&self, pyramid_id: &str) -> Result<Option<PyramidSnapshot>> {
        self.read(&self.path_for(pyramid_id)).await
    }

    async fn list(&self) -> Result<Vec<PyramidSnapshot>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| EngineError::Store(format!("list {}: {}", self.dir.display(), e)))?;

        let mut snapshots = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| EngineError::Store(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            if let Some(snapshot) = self.read(&path).await? {
                snapshots.push(snapshot);
            }
        }
        snapshots.sort_by(|a, b| a.pyramid_id().cmp(b.pyramid_id()));
        Ok(snapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyramid_core::RelationshipKind;

    fn snapshot(version: u64) -> PyramidSnapshot {
        let mut pyramid = Pyramid::relationship("Bob", RelationshipKind::Friend, Utc::now());
        pyramid.base.version = version;
        PyramidSnapshot::new(pyramid, Utc::now())
    }

    #[tokio::test]
    async fn test_memory_store_rejects_stale_write() {
        let store = MemorySnapshotStore::new();
        store.put(snapshot(3)).await.unwrap();
        store.put(snapshot(3)).await.unwrap();

        let err = store.put(snapshot(2)).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Conflict {
                stored: 3,
                attempted: 2,
                ..
            }
        ));
        let stored = store.get("relationship_bob").await.unwrap().unwrap();
        assert_eq!(stored.version, 3);
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSnapshotStore::open(dir.path().join("snapshots"))
            .await
            .unwrap();

        store.put(snapshot(1)).await.unwrap();
        store.put(snapshot(4)).await.unwrap();
        assert!(store.put(snapshot(2)).await.is_err());

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].version, 4);
        assert_eq!(listed[0].schema_version, SNAPSHOT_SCHEMA_VERSION);
        assert!(store.get("relationship_alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_keeps_similar_ids_apart() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileSnapshotStore::open(dir.path()).await.unwrap();

        let now = Utc::now();
        for name in ["Zoë", "Zoé", "Zo_"] {
            let pyramid = Pyramid::relationship(name, RelationshipKind::Friend, now);
            store.put(PyramidSnapshot::new(pyramid, now)).await.unwrap();
        }

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 3);
        for id in ["relationship_zoë", "relationship_zoé", "relationship_zo_"] {
            let stored = store.get(id).await.unwrap().unwrap();
            assert_eq!(stored.pyramid_id(), id);
        }
    }
}
