//! # Index Cache
//!
//! Each entity kind keeps an `id → { path, lastUpdated }` table in
//! `<kind>/<kind>-index.json`. The index is a **cache**, never the source of
//! truth: the documents on disk are. An entry whose document has vanished is
//! stale and must be treated as absent by every reader.
//!
//! ## Memory Cache
//!
//! Lookups happen on every id-based read, so the parsed index is held in
//! memory for a bounded freshness window (`index_ttl_secs`, default 30 s).
//! Writers always re-read the file before modifying it, so the window only
//! bounds how stale a *reader's* view can be.
//!
//! - [`EntityIndex::invalidate`]: the next `load` hits disk.
//! - [`EntityIndex::clear`]: drop the cached view entirely (after migrations,
//!   in tests).
//!
//! ## Write Discipline
//!
//! Every mutation is a read-modify-write of the whole file followed by an
//! atomic replace. Concurrent writers race last-writer-wins; a lost entry is
//! harmless because a missing entry sends readers to the scan fallback, which
//! feeds the result back in. Paths are validated before they are persisted:
//! a malformed path never reaches disk.

use super::backend::StorageBackend;
use super::paths::{self, KindLayout};
use crate::error::{Result, StoreError};
use crate::model::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub path: String,
    pub last_updated: DateTime<Utc>,
}

pub type IndexMap = BTreeMap<String, IndexEntry>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SetEntryOptions {
    /// Refuse to index a path whose document does not exist.
    pub verify_on_disk: bool,
}

struct CachedIndex {
    entries: IndexMap,
    loaded_at: Instant,
    fresh: bool,
}

pub struct EntityIndex<B: StorageBackend> {
    backend: B,
    layout: KindLayout,
    ttl: Duration,
    cache: RefCell<Option<CachedIndex>>,
}

impl<B: StorageBackend> EntityIndex<B> {
    pub fn new(backend: B, layout: KindLayout, ttl: Duration) -> Self {
        Self {
            backend,
            layout,
            ttl,
            cache: RefCell::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn exists_on_disk(&self) -> bool {
        self.backend.is_file(&self.layout.index_file())
    }

    /// The index, served from memory while the cached view is fresh.
    pub fn load(&self) -> Result<IndexMap> {
        if let Some(cached) = self.cache.borrow().as_ref() {
            if cached.fresh && cached.loaded_at.elapsed() < self.ttl {
                debug!(kind = %self.layout.kind, "index cache hit");
                return Ok(cached.entries.clone());
            }
        }
        let entries = self.read_from_disk()?;
        self.remember(&entries);
        Ok(entries)
    }

    /// Overwrite the whole index atomically.
    pub fn save(&self, entries: &IndexMap) -> Result<()> {
        for (id, entry) in entries {
            validate(id, &entry.path)?;
        }
        let content = serde_json::to_vec_pretty(entries)?;
        self.backend
            .write_atomic(&self.layout.index_file(), &content)?;
        self.remember(entries);
        Ok(())
    }

    pub fn get_entry(&self, id: &EntityId) -> Result<Option<IndexEntry>> {
        Ok(self.load()?.remove(id.as_str()))
    }

    pub fn set_entry(&self, id: &EntityId, path: &str, opts: SetEntryOptions) -> Result<()> {
        validate(id.as_str(), path)?;
        if opts.verify_on_disk && !self.backend.is_file(&self.layout.entity_file(path)) {
            return Err(StoreError::not_found(self.layout.kind.singular(), id));
        }

        let mut entries = self.load_for_write()?;
        entries.insert(
            id.to_string(),
            IndexEntry {
                path: path.to_string(),
                last_updated: Utc::now(),
            },
        );
        self.save(&entries)
    }

    /// Like [`Self::set_entry`], but leaves the file untouched when the id
    /// already maps to `path`. Returns whether the index changed.
    pub fn set_entry_if_changed(&self, id: &EntityId, path: &str) -> Result<bool> {
        validate(id.as_str(), path)?;
        let mut entries = self.load_for_write()?;
        if entries.get(id.as_str()).is_some_and(|e| e.path == path) {
            return Ok(false);
        }
        entries.insert(
            id.to_string(),
            IndexEntry {
                path: path.to_string(),
                last_updated: Utc::now(),
            },
        );
        self.save(&entries)?;
        Ok(true)
    }

    pub fn remove_entry(&self, id: &EntityId) -> Result<bool> {
        let mut entries = self.load_for_write()?;
        if entries.remove(id.as_str()).is_none() {
            return Ok(false);
        }
        self.save(&entries)?;
        Ok(true)
    }

    /// Force the next `load` to read from disk.
    pub fn invalidate(&self) {
        if let Some(cached) = self.cache.borrow_mut().as_mut() {
            cached.fresh = false;
        }
    }

    /// Drop the cached view entirely.
    pub fn clear(&self) {
        *self.cache.borrow_mut() = None;
    }

    fn remember(&self, entries: &IndexMap) {
        *self.cache.borrow_mut() = Some(CachedIndex {
            entries: entries.clone(),
            loaded_at: Instant::now(),
            fresh: true,
        });
    }

    fn read_from_disk(&self) -> Result<IndexMap> {
        let file = self.layout.index_file();
        let Some(bytes) = self.backend.read(&file)? else {
            return Ok(IndexMap::new());
        };
        let raw: IndexMap =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::CorruptDocument {
                path: self.backend.display_path(&file),
                source,
            })?;

        Ok(raw
            .into_iter()
            .filter(|(id, entry)| match validate(id, &entry.path) {
                Ok(()) => true,
                Err(e) => {
                    warn!(kind = %self.layout.kind, %id, error = %e, "ignoring malformed index entry");
                    false
                }
            })
            .collect())
    }

    /// Writers start from the on-disk state. A corrupt index is rebuilt from
    /// scratch: losing entries only costs readers a scan.
    fn load_for_write(&self) -> Result<IndexMap> {
        match self.read_from_disk() {
            Ok(entries) => Ok(entries),
            Err(StoreError::CorruptDocument { path, source }) => {
                warn!(path = %path.display(), error = %source, "index is corrupt, starting a fresh one");
                Ok(IndexMap::new())
            }
            Err(e) => Err(e),
        }
    }
}

fn validate(id: &str, path: &str) -> Result<()> {
    match paths::id_of(path) {
        Some(segment) if segment == id => Ok(()),
        _ => Err(StoreError::InvalidPath(path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKind;
    use crate::store::mem_backend::MemBackend;
    use std::path::Path;

    fn make_index(ttl: Duration) -> (MemBackend, EntityIndex<MemBackend>) {
        let backend = MemBackend::new();
        let index = EntityIndex::new(backend.clone(), KindLayout::new(EntityKind::Gig), ttl);
        (backend, index)
    }

    fn put_doc(backend: &MemBackend, rel: &str) {
        let layout = KindLayout::new(EntityKind::Gig);
        backend
            .write_atomic(&layout.entity_file(rel), b"{}")
            .unwrap();
    }

    #[test]
    fn test_missing_index_loads_empty() {
        let (_backend, index) = make_index(DEFAULT_TTL);
        assert!(index.load().unwrap().is_empty());
        assert!(!index.exists_on_disk());
    }

    #[test]
    fn test_set_get_remove() {
        let (_backend, index) = make_index(DEFAULT_TTL);
        let id = EntityId::from("42");

        index
            .set_entry(&id, "2024/03/05/42", SetEntryOptions::default())
            .unwrap();
        assert_eq!(
            index.get_entry(&id).unwrap().unwrap().path,
            "2024/03/05/42"
        );
        assert!(index.exists_on_disk());

        assert!(index.remove_entry(&id).unwrap());
        assert!(index.get_entry(&id).unwrap().is_none());
        assert!(!index.remove_entry(&id).unwrap());
    }

    #[test]
    fn test_set_entry_rejects_malformed_paths() {
        let (backend, index) = make_index(DEFAULT_TTL);
        let id = EntityId::from("42");

        for bad in ["24/3/5/42", "2024/3/05/42", "2024/03/05/43", "a/b"] {
            let err = index
                .set_entry(&id, bad, SetEntryOptions::default())
                .unwrap_err();
            assert!(matches!(err, StoreError::InvalidPath(_)), "{bad}");
        }
        assert!(backend.file_paths().is_empty());
    }

    #[test]
    fn test_verify_on_disk_refuses_phantoms() {
        let (backend, index) = make_index(DEFAULT_TTL);
        let id = EntityId::from("42");
        let verify = SetEntryOptions {
            verify_on_disk: true,
        };

        let err = index.set_entry(&id, "2024/03/05/42", verify).unwrap_err();
        assert!(err.is_not_found());

        put_doc(&backend, "2024/03/05/42");
        index.set_entry(&id, "2024/03/05/42", verify).unwrap();
    }

    #[test]
    fn test_cache_serves_until_invalidated() {
        let (backend, index) = make_index(Duration::from_secs(3600));
        let id = EntityId::from("1");
        index
            .set_entry(&id, "2024/01/01/1", SetEntryOptions::default())
            .unwrap();

        // Another process rewrites the index behind our back.
        backend
            .write_atomic(Path::new("gigs/gigs-index.json"), b"{}")
            .unwrap();
        assert!(index.get_entry(&id).unwrap().is_some());

        index.invalidate();
        assert!(index.get_entry(&id).unwrap().is_none());
    }

    #[test]
    fn test_zero_ttl_always_reads_disk() {
        let (backend, index) = make_index(Duration::ZERO);
        let id = EntityId::from("1");
        index
            .set_entry(&id, "2024/01/01/1", SetEntryOptions::default())
            .unwrap();
        backend
            .write_atomic(Path::new("gigs/gigs-index.json"), b"{}")
            .unwrap();
        assert!(index.get_entry(&id).unwrap().is_none());
    }

    #[test]
    fn test_corrupt_index_is_an_error_for_readers_but_not_writers() {
        let (backend, index) = make_index(DEFAULT_TTL);
        backend
            .write_atomic(Path::new("gigs/gigs-index.json"), b"{not json")
            .unwrap();

        assert!(matches!(
            index.load().unwrap_err(),
            StoreError::CorruptDocument { .. }
        ));

        let id = EntityId::from("9");
        index
            .set_entry(&id, "2024/01/01/9", SetEntryOptions::default())
            .unwrap();
        index.clear();
        assert_eq!(index.load().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_entries_on_disk_are_ignored() {
        let (backend, index) = make_index(DEFAULT_TTL);
        let raw = r#"{
            "1": {"path": "2024/01/01/1", "lastUpdated": "2024-01-01T00:00:00Z"},
            "2": {"path": "24/1/1/2", "lastUpdated": "2024-01-01T00:00:00Z"}
        }"#;
        backend
            .write_atomic(Path::new("gigs/gigs-index.json"), raw.as_bytes())
            .unwrap();

        let loaded = index.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("1"));
    }

    #[test]
    fn test_set_entry_if_changed_avoids_churn() {
        let (_backend, index) = make_index(DEFAULT_TTL);
        let id = EntityId::from("5");
        assert!(index.set_entry_if_changed(&id, "2024/02/02/5").unwrap());
        let before = index.get_entry(&id).unwrap().unwrap();

        assert!(!index.set_entry_if_changed(&id, "2024/02/02/5").unwrap());
        assert_eq!(index.get_entry(&id).unwrap().unwrap(), before);
    }
}
