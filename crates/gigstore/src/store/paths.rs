//! # Hierarchical Path Scheme
//!
//! Documents are sharded by creation date so no directory grows without
//! bound:
//!
//! ```text
//! <kind>/YYYY/MM/DD/<id>/<singular>.json     # hierarchical
//! <kind>/<id>/<singular>.json                # legacy (pre-migration)
//! ```
//!
//! The relative part stored in the index is either `YYYY/MM/DD/<id>` or, for
//! legacy documents, the bare `<id>`. The validators here are deliberately
//! strict: a two-digit year or a single-digit month or day is neither shape,
//! and no writer may persist such a path into the index.

use crate::model::{EntityId, EntityKind};
use chrono::{DateTime, Datelike, Utc};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathShape {
    Hierarchical,
    Legacy,
}

/// `YYYY/MM/DD/<id>` for the UTC date of `created_at`.
pub fn derive_path(id: &EntityId, created_at: DateTime<Utc>) -> String {
    format!(
        "{:04}/{:02}/{:02}/{}",
        created_at.year(),
        created_at.month(),
        created_at.day(),
        id
    )
}

pub fn is_id_segment(s: &str) -> bool {
    !s.is_empty()
        && s != "."
        && s != ".."
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

pub fn is_year_segment(s: &str) -> bool {
    s.len() == 4 && s.chars().all(|c| c.is_ascii_digit())
}

pub fn is_month_segment(s: &str) -> bool {
    two_digits_in(s, 1, 12)
}

pub fn is_day_segment(s: &str) -> bool {
    two_digits_in(s, 1, 31)
}

fn two_digits_in(s: &str, min: u32, max: u32) -> bool {
    s.len() == 2
        && s.chars().all(|c| c.is_ascii_digit())
        && s.parse::<u32>().is_ok_and(|n| (min..=max).contains(&n))
}

pub fn is_hierarchical_path(s: &str) -> bool {
    let segments: Vec<&str> = s.split('/').collect();
    matches!(
        segments.as_slice(),
        [year, month, day, id]
            if is_year_segment(year)
                && is_month_segment(month)
                && is_day_segment(day)
                && is_id_segment(id)
    )
}

pub fn is_legacy_path(s: &str) -> bool {
    !s.contains('/') && is_id_segment(s)
}

pub fn classify(s: &str) -> Option<PathShape> {
    if is_hierarchical_path(s) {
        Some(PathShape::Hierarchical)
    } else if is_legacy_path(s) {
        Some(PathShape::Legacy)
    } else {
        None
    }
}

/// The id segment of a valid path.
pub fn id_of(s: &str) -> Option<&str> {
    classify(s)?;
    s.rsplit('/').next()
}

/// Maps relative index paths to backend paths for one entity kind.
#[derive(Debug, Clone, Copy)]
pub struct KindLayout {
    pub kind: EntityKind,
}

impl KindLayout {
    pub fn new(kind: EntityKind) -> Self {
        Self { kind }
    }

    pub fn root(&self) -> PathBuf {
        PathBuf::from(self.kind.dir_name())
    }

    pub fn index_file(&self) -> PathBuf {
        self.root().join(self.kind.index_file_name())
    }

    /// Directory of an entity given its relative (hierarchical or legacy) path.
    pub fn entity_dir(&self, rel: &str) -> PathBuf {
        rel.split('/').fold(self.root(), |acc, seg| acc.join(seg))
    }

    pub fn entity_file(&self, rel: &str) -> PathBuf {
        self.entity_dir(rel).join(self.kind.file_name())
    }

    pub fn legacy_dir(&self, id: &EntityId) -> PathBuf {
        self.root().join(id.as_str())
    }

    pub fn legacy_file(&self, id: &EntityId) -> PathBuf {
        self.legacy_dir(id).join(self.kind.file_name())
    }
}
