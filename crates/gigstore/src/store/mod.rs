//! # Storage Layer
//!
//! Documents are JSON files on disk, one directory per entity, sharded by the
//! UTC date the entity was created. Each entity kind keeps a JSON index that
//! maps ids to their shard.
//!
//! ## Files Are Truth
//!
//! Like any cache, the index can be wrong: entries may point at documents that
//! were deleted, and documents may exist that were never indexed. Every reader
//! therefore goes through the [`resolver`], which trusts an index entry only
//! after checking the document exists, and otherwise scans the shards. Writers
//! repair what readers find:
//!
//! 1. **Scan hits** are written back to the index, so the next lookup is cheap.
//! 2. **Stale entries** (document gone) are removed when a read misses.
//! 3. **Reindex** rebuilds the whole index from a scan (orphans adopted, zombies
//!    dropped).
//!
//! ## Storage Layout
//!
//! ```text
//! data/
//! └── <kind>/
//!     ├── <kind>-index.json             # id → { path, lastUpdated }
//!     ├── 2024/03/05/<id>/
//!     │   ├── <singular>.json           # the document
//!     │   └── tasks/<taskId>.json       # project sub-resources
//!     └── <id>/                         # legacy, pre-migration
//!         ├── <singular>.json
//!         └── _migrated.README          # marker
//! ```
//!
//! ## Legacy Markers
//!
//! A legacy directory and a hierarchical directory for the same id must never
//! both look live. Once a hierarchical copy exists the legacy directory gets a
//! [`Marker`], and nothing writes into a marked directory again. Legacy
//! originals are kept as read-only fallbacks.
//!
//! ## Implementations
//!
//! - [`fs_backend::FsBackend`]: production, atomic writes under a data root.
//! - [`mem_backend::MemBackend`]: in-memory with fault injection, for tests.

pub mod atomic;
pub mod backend;
pub mod entity_store;
pub mod fs_backend;
pub mod index;
pub mod mem_backend;
pub mod paths;
pub mod resolver;

pub use backend::StorageBackend;
pub use entity_store::{EntityStore, ReindexReport, StoreOptions};
pub use index::{EntityIndex, IndexEntry, IndexMap, SetEntryOptions};
pub use resolver::{ResolveSource, Resolved, Resolver};

use crate::model::{EntityId, EntityKind};
use chrono::Utc;

/// Sentinel files placed in legacy directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// The entity was moved to its hierarchical path; this copy is historical.
    Migrated,
    /// A hierarchical twin already existed; this copy is a fallback-only duplicate.
    LegacyDoNotWrite,
}

impl Marker {
    pub const ALL: [Marker; 2] = [Marker::Migrated, Marker::LegacyDoNotWrite];

    pub fn file_name(self) -> &'static str {
        match self {
            Marker::Migrated => "_migrated.README",
            Marker::LegacyDoNotWrite => "_legacy.DO_NOT_WRITE",
        }
    }

    pub fn body(self, kind: EntityKind, id: &EntityId, target: &str) -> String {
        let now = Utc::now().to_rfc3339();
        match self {
            Marker::Migrated => format!(
                "This {kind} ({id}) was migrated to {target} on {now}.\n\
                 The copy in this directory is historical and must not be edited.\n"
            ),
            Marker::LegacyDoNotWrite => format!(
                "A hierarchical copy of this {kind} ({id}) already existed at {target} on {now}.\n\
                 The copy in this directory is a read-only fallback. Do not write here.\n"
            ),
        }
    }
}
