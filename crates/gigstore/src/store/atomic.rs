//! # Atomic File Primitive
//!
//! Every document and index write ends in a `rename(2)` over the destination.
//! The new bytes go to a uniquely named temp file in the *same* directory
//! (rename is only atomic within a filesystem), are flushed and synced, and
//! only then replace the destination. After a crash the destination holds
//! either the previous content or the complete new content, never a prefix.
//!
//! The write is split in two phases, [`StagedWrite::stage`] and
//! [`StagedWrite::commit`], so callers and tests can observe the state between
//! them. A staged write that is dropped without being committed removes its
//! temp file and leaves the destination untouched.

use crate::error::{Result, StoreError};
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Prefix shared by all temp files, so scans can skip them.
pub const TEMP_PREFIX: &str = ".tmp-";

pub struct StagedWrite {
    tmp: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl StagedWrite {
    /// Write `bytes` to a temp file next to `dest`. The destination is not touched.
    pub fn stage(dest: &Path, bytes: &[u8]) -> Result<Self> {
        let dir = dest
            .parent()
            .ok_or_else(|| StoreError::InvalidPath(dest.display().to_string()))?;
        ensure_dir(dir)?;

        let name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("document");
        let tmp = dir.join(format!("{}{}-{}", TEMP_PREFIX, name, Uuid::new_v4().simple()));

        let mut file = File::create(&tmp).map_err(|e| StoreError::io("create temp", &tmp, e))?;
        let staged = Self {
            tmp,
            dest: dest.to_path_buf(),
            committed: false,
        };
        file.write_all(bytes)
            .map_err(|e| StoreError::io("write temp", &staged.tmp, e))?;
        file.sync_all()
            .map_err(|e| StoreError::io("sync temp", &staged.tmp, e))?;
        Ok(staged)
    }

    pub fn temp_path(&self) -> &Path {
        &self.tmp
    }

    /// Rename the temp file over the destination.
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.tmp, &self.dest).map_err(|e| StoreError::io("rename", &self.dest, e))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<()> {
    StagedWrite::stage(dest, bytes)?.commit()
}

pub fn write_json_atomic<T: serde::Serialize + ?Sized>(dest: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)?;
    write_atomic(dest, &content)
}

/// Read a JSON document. Missing file is `Ok(None)`; unparsable content is
/// [`StoreError::CorruptDocument`], never silently treated as missing.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io("read", path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| StoreError::CorruptDocument {
            path: path.to_path_buf(),
            source,
        })
}

pub fn read_json_or<T: DeserializeOwned>(path: &Path, fallback: T) -> Result<T> {
    Ok(read_json(path)?.unwrap_or(fallback))
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| StoreError::io("create dir", path, e))
}

pub fn file_exists(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tempfile::tempdir;

    fn leftover_temps(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n.starts_with(TEMP_PREFIX))
            .collect()
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/doc.json");

        write_json_atomic(&path, &json!({"id": 1})).unwrap();

        let value: Value = read_json(&path).unwrap().unwrap();
        assert_eq!(value["id"], json!(1));
        assert!(leftover_temps(path.parent().unwrap()).is_empty());
    }

    #[test]
    fn test_uncommitted_write_keeps_previous_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &json!({"version": 1})).unwrap();

        let staged = StagedWrite::stage(&path, br#"{"version": 2, "trunc"#).unwrap();
        assert!(staged.temp_path().exists());
        drop(staged);

        let value: Value = read_json(&path).unwrap().unwrap();
        assert_eq!(value["version"], json!(1));
        assert!(leftover_temps(dir.path()).is_empty());
    }

    #[test]
    fn test_uncommitted_first_write_leaves_nothing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("doc.json");

        drop(StagedWrite::stage(&path, b"{}").unwrap());

        assert!(!path.exists());
        assert!(read_json::<Value>(&path).unwrap().is_none());
    }

    #[test]
    fn test_missing_and_corrupt_are_distinct() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(read_json::<Value>(&missing).unwrap().is_none());
        assert_eq!(read_json_or(&missing, json!([])).unwrap(), json!([]));

        let corrupt = dir.path().join("corrupt.json");
        fs::write(&corrupt, "{\"id\": ").unwrap();
        let err = read_json::<Value>(&corrupt).unwrap_err();
        assert!(matches!(err, StoreError::CorruptDocument { .. }));
    }

    #[test]
    fn test_ensure_dir_is_idempotent() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("x/y/z");
        ensure_dir(&nested).unwrap();
        ensure_dir(&nested).unwrap();
        assert!(nested.is_dir());
        assert!(!file_exists(&nested));
    }
}
