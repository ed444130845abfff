//! # Legacy Migration
//!
//! Moves documents from the flat legacy layout (`<kind>/<id>/`) to their date
//! shards. The routine is safe to re-run: a second run finds every legacy
//! directory marked and changes nothing.
//!
//! For each entity kind:
//!
//! 1. **Index the shards.** Every hierarchically stored id gets an index entry
//!    (unchanged entries are not rewritten).
//! 2. **Walk the legacy directories.**
//!    - Marked directories were handled before and are skipped.
//!    - If a hierarchical twin exists, the legacy copy is left as is and gets a
//!      `_legacy.DO_NOT_WRITE` marker.
//!    - Otherwise the document is written to the shard of its creation date,
//!      its sub-resources are copied along, and the legacy directory gets a
//!      `_migrated.README` marker.
//!
//! Legacy originals are never deleted. A document without a creation
//! timestamp is dated by the file's creation (or modification) time, which is
//! then stamped into the migrated copy.
//!
//! Failures are per id: they are collected in the [`MigrationReport`] and the
//! batch carries on.

use crate::error::{Result, StoreError};
use crate::model::{id_from_value, Entity, EntityId, EntityKind};
use crate::store::backend::StorageBackend;
use crate::store::{paths, EntityStore, Marker};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateOptions {
    /// Report what would happen without writing anything.
    pub dry_run: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub indexed: usize,
    pub migrated: usize,
    pub skipped: usize,
    pub subresources_migrated: usize,
    pub markers_written: usize,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl MigrationReport {
    pub fn merge(&mut self, other: MigrationReport) {
        self.indexed += other.indexed;
        self.migrated += other.migrated;
        self.skipped += other.skipped;
        self.subresources_migrated += other.subresources_migrated;
        self.markers_written += other.markers_written;
        self.warnings.extend(other.warnings);
        self.errors.extend(other.errors);
    }

    /// Whether the run changed (or, dry, would change) anything.
    pub fn has_changes(&self) -> bool {
        self.indexed + self.migrated + self.markers_written > 0
    }
}

/// Per-kind reports plus their total.
#[derive(Debug, Default, Clone, Serialize)]
pub struct MigrationSummary {
    pub dry_run: bool,
    pub kinds: Vec<(EntityKind, MigrationReport)>,
    pub total: MigrationReport,
}

impl MigrationSummary {
    pub fn push(&mut self, kind: EntityKind, report: MigrationReport) {
        self.total.merge(report.clone());
        self.kinds.push((kind, report));
    }
}

pub fn migrate<T: Entity, B: StorageBackend>(
    store: &EntityStore<T, B>,
    options: MigrateOptions,
) -> MigrationReport {
    let kind = T::KIND;
    let mut report = MigrationReport::default();

    let mut hierarchical: BTreeMap<EntityId, String> = BTreeMap::new();
    for (id, rel) in store.resolver().scan_all() {
        let changed = if options.dry_run {
            !matches!(store.index().get_entry(&id), Ok(Some(entry)) if entry.path == rel)
        } else {
            match store.index().set_entry_if_changed(&id, &rel) {
                Ok(changed) => changed,
                Err(e) => {
                    report.errors.push(format!("{} {}: indexing failed: {}", kind, id, e));
                    false
                }
            }
        };
        if changed {
            report.indexed += 1;
        }
        hierarchical.entry(id).or_insert(rel);
    }

    for id in store.resolver().legacy_ids() {
        if store.marker_of(&id).is_some() {
            report.skipped += 1;
            continue;
        }

        if let Some(twin) = hierarchical.get(&id) {
            report.skipped += 1;
            if options.dry_run {
                report.markers_written += 1;
                continue;
            }
            match store.write_marker(&id, Marker::LegacyDoNotWrite, twin) {
                Ok(()) => report.markers_written += 1,
                Err(e) => report
                    .errors
                    .push(format!("{} {}: could not write marker: {}", kind, id, e)),
            }
            continue;
        }

        match migrate_one(store, &id, options, &mut report) {
            Ok(rel) => {
                report.migrated += 1;
                info!(%kind, %id, path = %rel, dry_run = options.dry_run, "migrated legacy document");
            }
            Err(e) => {
                warn!(%kind, %id, error = %e, "migration failed");
                report.errors.push(format!("{} {}: {}", kind, id, e));
            }
        }
    }

    if !options.dry_run {
        store.index().clear();
    }
    info!(
        %kind,
        indexed = report.indexed,
        migrated = report.migrated,
        skipped = report.skipped,
        errors = report.errors.len(),
        "migration pass finished"
    );
    report
}

fn migrate_one<T: Entity, B: StorageBackend>(
    store: &EntityStore<T, B>,
    id: &EntityId,
    options: MigrateOptions,
    report: &mut MigrationReport,
) -> Result<String> {
    let kind = T::KIND;
    let layout = store.layout();
    let backend = store.backend();
    let file = layout.legacy_file(id);

    let bytes = backend
        .read(&file)?
        .ok_or_else(|| StoreError::not_found(kind.singular(), id))?;
    let mut doc: Value =
        serde_json::from_slice(&bytes).map_err(|source| StoreError::CorruptDocument {
            path: backend.display_path(&file),
            source,
        })?;

    match id_from_value(&doc) {
        Some(found) if &found == id => {}
        Some(found) => {
            return Err(StoreError::Store(format!(
                "document id {} does not match its directory {}",
                found, id
            )))
        }
        None => {
            report
                .warnings
                .push(format!("{} {}: document had no id, using directory name", kind, id));
        }
    }

    let ts_field = kind.timestamp_field();
    let stamped = doc.get(ts_field).and_then(parse_timestamp);
    let Some(obj) = doc.as_object_mut() else {
        return Err(StoreError::Store(format!(
            "{} is not a JSON object",
            backend.display_path(&file).display()
        )));
    };
    obj.insert("id".into(), Value::String(id.to_string()));

    let created_at = match stamped {
        Some(t) => {
            if !is_rfc3339(obj.get(ts_field)) {
                obj.insert(
                    ts_field.into(),
                    Value::String(t.to_rfc3339_opts(SecondsFormat::Millis, true)),
                );
                report.warnings.push(format!(
                    "{} {}: {} normalized to {}",
                    kind,
                    id,
                    ts_field,
                    t.to_rfc3339()
                ));
            }
            t
        }
        None => {
            let t = backend.created_time(&file)?.unwrap_or_else(Utc::now);
            obj.insert(
                ts_field.into(),
                Value::String(t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            );
            report.warnings.push(format!(
                "{} {}: no {}, dated by file time {}",
                kind,
                id,
                ts_field,
                t.to_rfc3339()
            ));
            t
        }
    };

    // Never write a copy the typed readers would treat as corrupt.
    if let Err(e) = serde_json::from_value::<T>(doc.clone()) {
        return Err(StoreError::Store(format!(
            "document would not load after migration: {}",
            e
        )));
    }

    let rel = paths::derive_path(id, created_at);
    if options.dry_run {
        report.markers_written += 1;
        report.subresources_migrated += kind
            .subresource_dirs()
            .iter()
            .map(|sub| count_files(backend, &layout.legacy_dir(id).join(sub)))
            .sum::<usize>();
        return Ok(rel);
    }

    store.write_value(&rel, id, &doc)?;
    let adoption = store.adopt_legacy(id, &rel)?;
    report.subresources_migrated += adoption.subresources;
    if adoption.marker_written {
        report.markers_written += 1;
    }
    Ok(rel)
}

/// Accepts RFC 3339, naive date-times and dates (read as UTC), and epoch
/// milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|t| t.and_utc())
            })
            .or_else(|| {
                NaiveDate::parse_from_str(s, "%Y-%m-%d")
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
                    .map(|t| t.and_utc())
            }),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn is_rfc3339(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok())
}

fn count_files<B: StorageBackend>(backend: &B, dir: &Path) -> usize {
    backend
        .list_dir(dir)
        .unwrap_or_default()
        .into_iter()
        .map(|e| {
            if e.is_dir {
                count_files(backend, &dir.join(&e.name))
            } else {
                1
            }
        })
        .sum()
}
