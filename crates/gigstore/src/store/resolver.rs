//! # Canonical Path Resolver
//!
//! Turns an entity id into the one authoritative location of its document.
//! Sources are tried in order, stopping at the first hit:
//!
//! 1. **Index**: the entry is trusted only if its document exists on disk. A
//!    stale entry falls through.
//! 2. **Scan**: walk `YYYY/MM/DD/<id>` directories. A candidate counts only if
//!    its document parses and carries the requested id, so a directory whose
//!    name disagrees with its content is never returned.
//! 3. **Legacy fallback**: the flat `<id>/` directory.
//!
//! The resolver never writes. Feeding scan hits back into the index is the
//! caller's job (see [`super::EntityStore::read`]). Errors are contained: a
//! corrupt index behaves like an empty one, and a corrupt or unreadable
//! candidate is a miss, so one bad file cannot make other ids unresolvable.

use super::backend::StorageBackend;
use super::index::EntityIndex;
use super::paths::{self, KindLayout};
use crate::error::{Result, StoreError};
use crate::model::{id_from_value, EntityId};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolveSource {
    Index,
    Scan,
    LegacyFallback,
}

impl fmt::Display for ResolveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResolveSource::Index => "index",
            ResolveSource::Scan => "scan",
            ResolveSource::LegacyFallback => "legacy-fallback",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolved {
    /// Relative path: `YYYY/MM/DD/<id>` or, for legacy documents, `<id>`.
    pub path: String,
    pub source: ResolveSource,
}

pub struct Resolver<'a, B: StorageBackend> {
    backend: &'a B,
    layout: KindLayout,
    index: &'a EntityIndex<B>,
}

impl<'a, B: StorageBackend> Resolver<'a, B> {
    pub fn new(backend: &'a B, layout: KindLayout, index: &'a EntityIndex<B>) -> Self {
        Self {
            backend,
            layout,
            index,
        }
    }

    pub fn resolve(&self, id: &EntityId) -> Option<Resolved> {
        let kind = self.layout.kind;

        match self.index.get_entry(id) {
            Ok(Some(entry)) => {
                if self.backend.is_file(&self.layout.entity_file(&entry.path)) {
                    debug!(%kind, %id, path = %entry.path, "resolved from index");
                    return Some(Resolved {
                        path: entry.path,
                        source: ResolveSource::Index,
                    });
                }
                warn!(%kind, %id, path = %entry.path, "stale index entry, falling back to scan");
            }
            Ok(None) => {}
            Err(e) => warn!(%kind, %id, error = %e, "index unreadable, falling back to scan"),
        }

        if let Some(path) = self.scan_for(id) {
            debug!(%kind, %id, %path, "resolved by scan");
            return Some(Resolved {
                path,
                source: ResolveSource::Scan,
            });
        }

        if paths::is_legacy_path(id.as_str()) && self.backend.is_file(&self.layout.legacy_file(id))
        {
            debug!(%kind, %id, "resolved from legacy layout");
            return Some(Resolved {
                path: id.to_string(),
                source: ResolveSource::LegacyFallback,
            });
        }

        debug!(%kind, %id, "not found");
        None
    }

    /// Walk the hierarchy looking for `<day>/<id>` directories whose document
    /// carries `id`.
    pub fn scan_for(&self, id: &EntityId) -> Option<String> {
        if !id.is_valid_segment() {
            return None;
        }
        self.day_dirs().into_iter().find_map(|day| {
            let rel = format!("{}/{}", day, id);
            match self.check_candidate(&rel, id) {
                Ok(true) => Some(rel),
                Ok(false) => None,
                Err(e) => {
                    warn!(kind = %self.layout.kind, path = %rel, error = %e, "skipping unreadable candidate");
                    None
                }
            }
        })
    }

    /// Every hierarchically stored `(id, path)` pair whose document is sound.
    pub fn scan_all(&self) -> Vec<(EntityId, String)> {
        let mut found = Vec::new();
        for day in self.day_dirs() {
            let day_path = self.layout.entity_dir(&day);
            for entry in self.list(&day_path) {
                if !entry.is_dir || !paths::is_id_segment(&entry.name) {
                    continue;
                }
                let id = EntityId::new(entry.name);
                let rel = format!("{}/{}", day, id);
                match self.check_candidate(&rel, &id) {
                    Ok(true) => found.push((id, rel)),
                    Ok(false) => {
                        if self.backend.is_file(&self.layout.entity_file(&rel)) {
                            warn!(kind = %self.layout.kind, path = %rel, "document id does not match its directory");
                        }
                    }
                    Err(e) => {
                        warn!(kind = %self.layout.kind, path = %rel, error = %e, "skipping unreadable document")
                    }
                }
            }
        }
        found
    }

    /// Ids of flat legacy directories that still hold a document.
    pub fn legacy_ids(&self) -> Vec<EntityId> {
        self.list(&self.layout.root())
            .into_iter()
            .filter(|e| e.is_dir && paths::is_legacy_path(&e.name))
            .map(|e| EntityId::new(e.name))
            .filter(|id| self.backend.is_file(&self.layout.legacy_file(id)))
            .collect()
    }

    fn day_dirs(&self) -> Vec<String> {
        let mut days = Vec::new();
        let root = self.layout.root();
        for year in self.list(&root) {
            if !year.is_dir || !paths::is_year_segment(&year.name) {
                continue;
            }
            for month in self.list(&root.join(&year.name)) {
                if !month.is_dir || !paths::is_month_segment(&month.name) {
                    continue;
                }
                for day in self.list(&root.join(&year.name).join(&month.name)) {
                    if day.is_dir && paths::is_day_segment(&day.name) {
                        days.push(format!("{}/{}/{}", year.name, month.name, day.name));
                    }
                }
            }
        }
        days
    }

    fn list(&self, dir: &Path) -> Vec<super::backend::DirEntry> {
        self.backend.list_dir(dir).unwrap_or_else(|e| {
            warn!(dir = %dir.display(), error = %e, "cannot list directory");
            Vec::new()
        })
    }

    fn check_candidate(&self, rel: &str, id: &EntityId) -> Result<bool> {
        let file = self.layout.entity_file(rel);
        let Some(bytes) = self.backend.read(&file)? else {
            return Ok(false);
        };
        let value: Value =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::CorruptDocument {
                path: self.backend.display_path(&file),
                source,
            })?;
        Ok(id_from_value(&value).as_ref() == Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityKind;
    use crate::store::index::{SetEntryOptions, DEFAULT_TTL};
    use crate::store::mem_backend::MemBackend;
    use serde_json::json;

    struct Fixture {
        backend: MemBackend,
        layout: KindLayout,
        index: EntityIndex<MemBackend>,
    }

    impl Fixture {
        fn new() -> Self {
            let backend = MemBackend::new();
            let layout = KindLayout::new(EntityKind::Gig);
            let index = EntityIndex::new(backend.clone(), layout, DEFAULT_TTL);
            Self {
                backend,
                layout,
                index,
            }
        }

        fn resolver(&self) -> Resolver<'_, MemBackend> {
            Resolver::new(&self.backend, self.layout, &self.index)
        }

        fn put(&self, rel: &str, doc: Value) {
            self.backend
                .write_atomic(
                    &self.layout.entity_file(rel),
                    serde_json::to_vec(&doc).unwrap().as_slice(),
                )
                .unwrap();
        }
    }

    #[test]
    fn test_scan_then_index() {
        let fx = Fixture::new();
        let id = EntityId::from("42");
        fx.put("2024/03/05/42", json!({"id": 42}));

        let resolved = fx.resolver().resolve(&id).unwrap();
        assert_eq!(resolved.source, ResolveSource::Scan);
        assert_eq!(resolved.path, "2024/03/05/42");

        fx.index
            .set_entry(&id, &resolved.path, SetEntryOptions::default())
            .unwrap();
        let again = fx.resolver().resolve(&id).unwrap();
        assert_eq!(again.source, ResolveSource::Index);
        assert_eq!(again.path, "2024/03/05/42");
    }

    #[test]
    fn test_stale_index_entry_is_not_trusted() {
        let fx = Fixture::new();
        let id = EntityId::from("7");
        fx.index
            .set_entry(&id, "2024/01/01/7", SetEntryOptions::default())
            .unwrap();

        assert_eq!(fx.resolver().resolve(&id), None);
    }

    #[test]
    fn test_stale_index_falls_through_to_real_location() {
        let fx = Fixture::new();
        let id = EntityId::from("7");
        fx.index
            .set_entry(&id, "2024/01/01/7", SetEntryOptions::default())
            .unwrap();
        fx.put("2024/06/30/7", json!({"id": "7"}));

        let resolved = fx.resolver().resolve(&id).unwrap();
        assert_eq!(resolved.source, ResolveSource::Scan);
        assert_eq!(resolved.path, "2024/06/30/7");
    }

    #[test]
    fn test_legacy_fallback() {
        let fx = Fixture::new();
        let id = EntityId::from("legacy1");
        fx.backend
            .write_atomic(&fx.layout.legacy_file(&id), br#"{"id": "legacy1"}"#)
            .unwrap();

        let resolved = fx.resolver().resolve(&id).unwrap();
        assert_eq!(resolved.source, ResolveSource::LegacyFallback);
        assert_eq!(resolved.path, "legacy1");
    }

    #[test]
    fn test_mismatched_content_is_rejected() {
        let fx = Fixture::new();
        fx.put("2024/03/05/42", json!({"id": 43}));
        assert_eq!(fx.resolver().resolve(&EntityId::from("42")), None);
    }

    #[test]
    fn test_corrupt_candidate_does_not_block_others() {
        let fx = Fixture::new();
        fx.backend
            .write_atomic(&fx.layout.entity_file("2024/03/05/1"), b"{broken")
            .unwrap();
        fx.put("2024/03/05/2", json!({"id": 2}));

        assert_eq!(fx.resolver().resolve(&EntityId::from("1")), None);
        assert!(fx.resolver().resolve(&EntityId::from("2")).is_some());

        let all = fx.resolver().scan_all();
        assert_eq!(all, vec![(EntityId::from("2"), "2024/03/05/2".to_string())]);
    }

    #[test]
    fn test_corrupt_index_does_not_abort_resolution() {
        let fx = Fixture::new();
        fx.backend
            .write_atomic(&fx.layout.index_file(), b"[[[")
            .unwrap();
        fx.put("2024/03/05/2", json!({"id": 2}));

        let resolved = fx.resolver().resolve(&EntityId::from("2")).unwrap();
        assert_eq!(resolved.source, ResolveSource::Scan);
    }

    #[test]
    fn test_malformed_shard_dirs_are_ignored() {
        let fx = Fixture::new();
        fx.backend
            .write_atomic(Path::new("gigs/24/3/5/9/gig.json"), br#"{"id": 9}"#)
            .unwrap();
        assert_eq!(fx.resolver().resolve(&EntityId::from("9")), None);
    }

    #[test]
    fn test_legacy_ids_skip_year_dirs() {
        let fx = Fixture::new();
        fx.put("2024/03/05/1", json!({"id": 1}));
        fx.backend
            .write_atomic(&fx.layout.legacy_file(&EntityId::from("5")), br#"{"id": 5}"#)
            .unwrap();

        assert_eq!(fx.resolver().legacy_ids(), vec![EntityId::from("5")]);
    }
}
