use super::backend::{copy_tree, StorageBackend};
use super::index::{EntityIndex, IndexEntry, IndexMap, SetEntryOptions, DEFAULT_TTL};
use super::paths::{self, KindLayout, PathShape};
use super::resolver::{ResolveSource, Resolved, Resolver};
use super::Marker;
use crate::error::{Result, StoreError};
use crate::model::{id_from_json, Entity, EntityId, EntityKind, Project, Task};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub index_ttl: Duration,
    /// Refuse to index a document that cannot be found after writing it.
    pub verify_index_writes: bool,
    /// Feed scan results back into the index on read.
    pub write_back_scan_hits: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            index_ttl: DEFAULT_TTL,
            verify_index_writes: true,
            write_back_scan_hits: true,
        }
    }
}

/// Report from [`EntityStore::reindex`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub indexed: usize,
    /// Documents found on disk without a (correct) index entry.
    pub adopted: usize,
    /// Index entries whose document no longer exists.
    pub removed: usize,
}

/// What adopting a legacy directory did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LegacyAdoption {
    pub subresources: usize,
    pub marker_written: bool,
}

/// Typed document store for one entity kind.
///
/// All stores of a data directory share one backend; each owns the index of
/// its kind.
pub struct EntityStore<T: Entity, B: StorageBackend> {
    pub(crate) backend: B,
    layout: KindLayout,
    index: EntityIndex<B>,
    options: StoreOptions,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity, B: StorageBackend> EntityStore<T, B> {
    pub fn new(backend: B, options: StoreOptions) -> Self {
        let layout = KindLayout::new(T::KIND);
        let index = EntityIndex::new(backend.clone(), layout, options.index_ttl);
        Self {
            backend,
            layout,
            index,
            options,
            _entity: PhantomData,
        }
    }

    pub fn kind(&self) -> EntityKind {
        T::KIND
    }

    pub fn layout(&self) -> KindLayout {
        self.layout
    }

    pub fn index(&self) -> &EntityIndex<B> {
        &self.index
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn resolver(&self) -> Resolver<'_, B> {
        Resolver::new(&self.backend, self.layout, &self.index)
    }

    pub fn resolve(&self, id: &EntityId) -> Option<Resolved> {
        self.resolver().resolve(id)
    }

    /// Backend path of the document an id resolves to.
    pub fn document_path(&self, id: &EntityId) -> Option<PathBuf> {
        self.resolve(id)
            .map(|r| self.backend.display_path(&self.layout.entity_file(&r.path)))
    }

    /// Write `entity` to the shard derived from its id and creation time and
    /// index it. Returns the relative path.
    ///
    /// When a changed creation time moves the entity to another shard, its
    /// sub-resources follow and the old shard copy is removed.
    pub fn save(&self, entity: &T) -> Result<String> {
        let id = entity.id();
        if !id.is_valid_segment() {
            return Err(StoreError::InvalidPath(id.to_string()));
        }
        let rel = paths::derive_path(id, entity.created_at());
        let previous = self
            .resolve(id)
            .filter(|r| r.source != ResolveSource::LegacyFallback && r.path != rel);
        if let Some(old) = &previous {
            self.carry_subresources(&old.path, &rel)?;
        }
        self.write_document(&rel, entity)?;
        if let Some(old) = previous {
            self.remove_entity_dir_contents(&old.path)?;
            self.prune_empty_dirs(&old.path);
            info!(kind = %T::KIND, %id, from = %old.path, to = %rel, "moved to new shard");
        }

        if self.has_live_legacy_copy(id) {
            if let Err(e) = self.adopt_legacy(id, &rel) {
                warn!(kind = %T::KIND, %id, error = %e, "could not retire legacy copy");
            }
        }
        debug!(kind = %T::KIND, %id, path = %rel, "saved");
        Ok(rel)
    }

    /// Read by id. Any failure is logged and reads as absent.
    pub fn read(&self, id: &EntityId) -> Option<T> {
        match self.read_strict(id) {
            Ok(found) => found,
            Err(e) => {
                warn!(kind = %T::KIND, %id, error = %e, "read failed");
                None
            }
        }
    }

    /// Like [`Self::read`], but corrupt documents and I/O failures are errors.
    pub fn read_strict(&self, id: &EntityId) -> Result<Option<T>> {
        let Some(resolved) = self.resolve_and_heal(id) else {
            return Ok(None);
        };
        self.read_document(&resolved.path, id)
    }

    /// The raw JSON document and where it was found.
    pub fn read_value(&self, id: &EntityId) -> Result<Option<(Resolved, Value)>> {
        let Some(resolved) = self.resolve_and_heal(id) else {
            return Ok(None);
        };
        let file = self.layout.entity_file(&resolved.path);
        let Some(bytes) = self.backend.read(&file)? else {
            return Ok(None);
        };
        let value = serde_json::from_slice(&bytes).map_err(|source| {
            StoreError::CorruptDocument {
                path: self.backend.display_path(&file),
                source,
            }
        })?;
        Ok(Some((resolved, value)))
    }

    /// Shallow-merge `patch` into the stored document.
    ///
    /// The id and the creation timestamp are fixed: the timestamp decides the
    /// shard, so changing it would strand the document. A document only found
    /// in legacy storage is written to its hierarchical path.
    pub fn update(&self, id: &EntityId, patch: Map<String, Value>) -> Result<T> {
        let (resolved, current) = self
            .read_value(id)?
            .ok_or_else(|| StoreError::not_found(T::KIND.singular(), id))?;
        let Value::Object(mut doc) = current else {
            return Err(StoreError::InvalidUpdate(format!(
                "{} {} is not a JSON object",
                T::KIND,
                id
            )));
        };

        let ts_field = T::KIND.timestamp_field();
        for (key, value) in patch {
            if key == "id" && id_from_json(&value).as_ref() != Some(id) {
                return Err(StoreError::InvalidUpdate("id cannot be changed".into()));
            }
            if key == ts_field && !same_instant(doc.get(ts_field), &value) {
                return Err(StoreError::InvalidUpdate(format!(
                    "{} cannot be changed",
                    ts_field
                )));
            }
            doc.insert(key, value);
        }

        let entity: T = serde_json::from_value(Value::Object(doc)).map_err(|e| {
            StoreError::InvalidUpdate(format!("patched {} is invalid: {}", T::KIND, e))
        })?;
        self.persist_update(&resolved, &entity)?;
        Ok(entity)
    }

    /// Typed read-modify-write.
    pub fn update_with<F>(&self, id: &EntityId, f: F) -> Result<T>
    where
        F: FnOnce(&mut T),
    {
        let resolved = self
            .resolve_and_heal(id)
            .ok_or_else(|| StoreError::not_found(T::KIND.singular(), id))?;
        let mut entity = self
            .read_document(&resolved.path, id)?
            .ok_or_else(|| StoreError::not_found(T::KIND.singular(), id))?;

        let created_at = entity.created_at();
        f(&mut entity);
        if entity.id() != id {
            return Err(StoreError::InvalidUpdate("id cannot be changed".into()));
        }
        if entity.created_at() != created_at {
            return Err(StoreError::InvalidUpdate(format!(
                "{} cannot be changed",
                T::KIND.timestamp_field()
            )));
        }
        self.persist_update(&resolved, &entity)?;
        Ok(entity)
    }

    /// Remove the document, its sub-resources and its index entry.
    ///
    /// A retired legacy copy of the id is removed too (its marker stays), so
    /// the legacy fallback cannot bring the entity back.
    pub fn delete(&self, id: &EntityId) -> Result<()> {
        let resolved = self
            .resolve_and_heal(id)
            .ok_or_else(|| StoreError::not_found(T::KIND.singular(), id))?;

        self.remove_entity_dir_contents(&resolved.path)?;
        if resolved.source != ResolveSource::LegacyFallback
            && self.backend.is_file(&self.layout.legacy_file(id))
        {
            self.remove_entity_dir_contents(id.as_str())?;
        }

        if let Err(e) = self.index.remove_entry(id) {
            warn!(kind = %T::KIND, %id, error = %e, "could not remove index entry");
        }
        self.prune_empty_dirs(&resolved.path);
        info!(kind = %T::KIND, %id, path = %resolved.path, "deleted");
        Ok(())
    }

    /// Every live document, newest first (ties broken by id).
    ///
    /// Driven by the index; falls back to a full scan when the index is
    /// missing, empty or unreadable. Unmigrated legacy documents are included
    /// either way.
    pub fn read_all(&self) -> Vec<T> {
        let mut found: Vec<T> = Vec::new();

        let entries = match self.index.load() {
            Ok(entries) if !entries.is_empty() => Some(entries),
            Ok(_) => None,
            Err(e) => {
                warn!(kind = %T::KIND, error = %e, "index unreadable, scanning");
                None
            }
        };

        match entries {
            Some(entries) => {
                let mut stale = Vec::new();
                for (key, entry) in entries {
                    let id = EntityId::new(key);
                    match self.read_document(&entry.path, &id) {
                        Ok(Some(entity)) => found.push(entity),
                        Ok(None) => stale.push(id),
                        Err(e) => warn!(kind = %T::KIND, %id, error = %e, "skipping document"),
                    }
                }
                for id in stale {
                    self.heal_stale(&id);
                }
            }
            None => {
                for (id, rel) in self.resolver().scan_all() {
                    match self.read_document(&rel, &id) {
                        Ok(Some(entity)) => found.push(entity),
                        Ok(None) => {}
                        Err(e) => warn!(kind = %T::KIND, %id, error = %e, "skipping document"),
                    }
                }
            }
        }

        let mut seen: BTreeSet<EntityId> = found.iter().map(|e| e.id().clone()).collect();
        for id in self.resolver().legacy_ids() {
            if seen.contains(&id) || self.marker_of(&id).is_some() {
                continue;
            }
            match self.read_document(id.as_str(), &id) {
                Ok(Some(entity)) => {
                    seen.insert(id);
                    found.push(entity);
                }
                Ok(None) => {}
                Err(e) => warn!(kind = %T::KIND, %id, error = %e, "skipping legacy document"),
            }
        }

        found.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        found
    }

    pub fn read_by_parent(&self, parent_id: &EntityId) -> Vec<T> {
        self.read_all()
            .into_iter()
            .filter(|e| e.parent_id() == Some(parent_id))
            .collect()
    }

    /// Rebuild the index from a full scan of the shards.
    pub fn reindex(&self) -> Result<ReindexReport> {
        self.index.invalidate();
        let (previous, unreadable) = match self.index.load() {
            Ok(entries) => (entries, false),
            Err(e) => {
                warn!(kind = %T::KIND, error = %e, "rebuilding unreadable index");
                (IndexMap::new(), true)
            }
        };

        let mut report = ReindexReport::default();
        let mut rebuilt = IndexMap::new();
        for (id, rel) in self.resolver().scan_all() {
            if let Some(existing) = rebuilt.get(id.as_str()) {
                warn!(kind = %T::KIND, %id, kept = %existing.path, duplicate = %rel, "document stored twice");
                continue;
            }
            let entry = match previous.get(id.as_str()) {
                Some(entry) if entry.path == rel => entry.clone(),
                _ => {
                    report.adopted += 1;
                    IndexEntry {
                        path: rel,
                        last_updated: Utc::now(),
                    }
                }
            };
            rebuilt.insert(id.to_string(), entry);
        }
        report.removed = previous
            .keys()
            .filter(|id| !rebuilt.contains_key(*id))
            .count();
        report.indexed = rebuilt.len();

        let needs_write = rebuilt != previous
            || unreadable
            || (!rebuilt.is_empty() && !self.index.exists_on_disk());
        if needs_write {
            self.index.save(&rebuilt)?;
        }
        info!(
            kind = %T::KIND,
            indexed = report.indexed,
            adopted = report.adopted,
            removed = report.removed,
            "reindexed"
        );
        Ok(report)
    }

    /// The marker present in the legacy directory of `id`, if any.
    pub fn marker_of(&self, id: &EntityId) -> Option<Marker> {
        let dir = self.layout.legacy_dir(id);
        Marker::ALL
            .into_iter()
            .find(|m| self.backend.is_file(&dir.join(m.file_name())))
    }

    /// A legacy document with no marker: nothing has superseded it yet.
    pub fn has_live_legacy_copy(&self, id: &EntityId) -> bool {
        self.backend.is_file(&self.layout.legacy_file(id)) && self.marker_of(id).is_none()
    }

    pub(crate) fn write_marker(&self, id: &EntityId, marker: Marker, target: &str) -> Result<()> {
        let file = self.layout.legacy_dir(id).join(marker.file_name());
        let body = marker.body(T::KIND, id, target);
        self.backend.write_atomic(&file, body.as_bytes())
    }

    /// Copy the legacy sub-resources of `id` next to its hierarchical copy at
    /// `rel` and mark the legacy directory as migrated.
    pub(crate) fn adopt_legacy(&self, id: &EntityId, rel: &str) -> Result<LegacyAdoption> {
        let mut adoption = LegacyAdoption::default();
        let legacy_dir = self.layout.legacy_dir(id);
        let target_dir = self.layout.entity_dir(rel);
        for sub in T::KIND.subresource_dirs() {
            let from = legacy_dir.join(sub);
            if self.backend.is_dir(&from) {
                adoption.subresources += copy_tree(&self.backend, &from, &target_dir.join(sub))?;
            }
        }
        if self.marker_of(id).is_none() {
            self.write_marker(id, Marker::Migrated, rel)?;
            adoption.marker_written = true;
        }
        Ok(adoption)
    }

    /// Write a raw document at `rel` and index it.
    pub(crate) fn write_value(&self, rel: &str, id: &EntityId, doc: &Value) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        self.backend
            .write_atomic(&self.layout.entity_file(rel), &bytes)?;
        self.index.set_entry(
            id,
            rel,
            SetEntryOptions {
                verify_on_disk: self.options.verify_index_writes,
            },
        )
    }

    fn write_document(&self, rel: &str, entity: &T) -> Result<()> {
        let doc = serde_json::to_value(entity)?;
        self.write_value(rel, entity.id(), &doc)
    }

    fn persist_update(&self, resolved: &Resolved, entity: &T) -> Result<String> {
        match resolved.source {
            ResolveSource::LegacyFallback => {
                let rel = paths::derive_path(entity.id(), entity.created_at());
                self.write_document(&rel, entity)?;
                self.adopt_legacy(entity.id(), &rel)?;
                info!(kind = %T::KIND, id = %entity.id(), path = %rel, "promoted legacy document");
                Ok(rel)
            }
            ResolveSource::Index | ResolveSource::Scan => {
                self.write_document(&resolved.path, entity)?;
                Ok(resolved.path.clone())
            }
        }
    }

    fn read_document(&self, rel: &str, id: &EntityId) -> Result<Option<T>> {
        let file = self.layout.entity_file(rel);
        let Some(bytes) = self.backend.read(&file)? else {
            return Ok(None);
        };
        let entity: T =
            serde_json::from_slice(&bytes).map_err(|source| StoreError::CorruptDocument {
                path: self.backend.display_path(&file),
                source,
            })?;
        if entity.id() != id {
            warn!(kind = %T::KIND, %id, found = %entity.id(), path = %rel, "document id does not match its location");
            return Ok(None);
        }
        Ok(Some(entity))
    }

    /// Resolve, then repair the index with what resolution learned.
    fn resolve_and_heal(&self, id: &EntityId) -> Option<Resolved> {
        let resolved = self.resolve(id);
        match &resolved {
            None => self.heal_stale(id),
            Some(r) if r.source == ResolveSource::Scan && self.options.write_back_scan_hits => {
                if let Err(e) = self.index.set_entry_if_changed(id, &r.path) {
                    warn!(kind = %T::KIND, %id, error = %e, "could not index scan hit");
                }
            }
            Some(r) if r.source == ResolveSource::LegacyFallback => self.heal_stale(id),
            Some(_) => {}
        }
        resolved
    }

    fn heal_stale(&self, id: &EntityId) {
        if !matches!(self.index.get_entry(id), Ok(Some(_))) {
            return;
        }
        match self.index.remove_entry(id) {
            Ok(_) => info!(kind = %T::KIND, %id, "removed stale index entry"),
            Err(e) => warn!(kind = %T::KIND, %id, error = %e, "could not remove stale index entry"),
        }
    }

    fn carry_subresources(&self, from_rel: &str, to_rel: &str) -> Result<usize> {
        let from_dir = self.layout.entity_dir(from_rel);
        let to_dir = self.layout.entity_dir(to_rel);
        let mut copied = 0;
        for sub in T::KIND.subresource_dirs() {
            let from = from_dir.join(sub);
            if self.backend.is_dir(&from) {
                copied += copy_tree(&self.backend, &from, &to_dir.join(sub))?;
            }
        }
        Ok(copied)
    }

    fn remove_entity_dir_contents(&self, rel: &str) -> Result<()> {
        let dir = self.layout.entity_dir(rel);
        self.backend.remove_file(&self.layout.entity_file(rel))?;
        for sub in T::KIND.subresource_dirs() {
            self.backend.remove_dir_all(&dir.join(sub))?;
        }
        Ok(())
    }

    /// Best effort: drop the entity directory and any shard directories it
    /// leaves empty.
    fn prune_empty_dirs(&self, rel: &str) {
        let mut dir = self.layout.entity_dir(rel);
        let levels = match paths::classify(rel) {
            Some(PathShape::Hierarchical) => 4,
            _ => 1,
        };
        for _ in 0..levels {
            match self.backend.remove_dir_if_empty(&dir) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    debug!(dir = %dir.display(), error = %e, "leaving directory in place");
                    break;
                }
            }
            if !dir.pop() {
                break;
            }
        }
    }
}

/// Task sub-resources live in the `tasks/` directory of their project.
impl<B: StorageBackend> EntityStore<Project, B> {
    pub fn save_task(&self, task: &Task) -> Result<()> {
        if !task.id.is_valid_segment() {
            return Err(StoreError::InvalidPath(task.id.to_string()));
        }
        let rel = self.writable_project_path(&task.project_id)?;
        let file = self.tasks_dir(&rel).join(format!("{}.json", task.id));
        self.backend
            .write_atomic(&file, &serde_json::to_vec_pretty(task)?)?;
        debug!(project = %task.project_id, task = %task.id, "saved task");
        Ok(())
    }

    /// Tasks of a project in display order. Unreadable task files are skipped.
    pub fn read_tasks(&self, project_id: &EntityId) -> Vec<Task> {
        let Some(resolved) = self.resolve(project_id) else {
            return Vec::new();
        };
        let dir = self.tasks_dir(&resolved.path);
        let listed = match self.backend.list_dir(&dir) {
            Ok(listed) => listed,
            Err(e) => {
                warn!(project = %project_id, error = %e, "cannot list tasks");
                return Vec::new();
            }
        };

        let mut tasks: Vec<Task> = listed
            .into_iter()
            .filter(|e| !e.is_dir && e.name.ends_with(".json"))
            .filter_map(|e| {
                let file = dir.join(&e.name);
                let bytes = match self.backend.read(&file) {
                    Ok(bytes) => bytes?,
                    Err(err) => {
                        warn!(path = %file.display(), error = %err, "cannot read task");
                        return None;
                    }
                };
                match serde_json::from_slice::<Task>(&bytes) {
                    Ok(task) => Some(task),
                    Err(err) => {
                        warn!(path = %file.display(), error = %err, "skipping corrupt task");
                        None
                    }
                }
            })
            .collect();
        tasks.sort_by(|a, b| {
            a.order
                .cmp(&b.order)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });
        tasks
    }

    pub fn delete_task(&self, project_id: &EntityId, task_id: &EntityId) -> Result<()> {
        let resolved = self
            .resolve(project_id)
            .ok_or_else(|| StoreError::not_found("project", project_id))?;
        let file = self
            .tasks_dir(&resolved.path)
            .join(format!("{}.json", task_id));
        if !self.backend.is_file(&file) {
            return Err(StoreError::not_found("task", task_id));
        }
        self.backend.remove_file(&file)
    }

    fn tasks_dir(&self, rel: &str) -> PathBuf {
        self.layout().entity_dir(rel).join("tasks")
    }

    /// Location tasks may be written to. A project that only exists in legacy
    /// storage is promoted first, since marked directories are read-only.
    fn writable_project_path(&self, project_id: &EntityId) -> Result<String> {
        let resolved = self
            .resolve(project_id)
            .ok_or_else(|| StoreError::not_found("project", project_id))?;
        if resolved.source != ResolveSource::LegacyFallback {
            return Ok(resolved.path);
        }
        let project = self
            .read_document(&resolved.path, project_id)?
            .ok_or_else(|| StoreError::not_found("project", project_id))?;
        self.persist_update(&resolved, &project)
    }
}

fn same_instant(current: Option<&Value>, proposed: &Value) -> bool {
    if current == Some(proposed) {
        return true;
    }
    let parse = |v: &Value| {
        v.as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
    };
    match (current.and_then(parse), parse(proposed)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
