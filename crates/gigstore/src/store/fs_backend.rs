use super::atomic::{self, TEMP_PREFIX};
use super::backend::{DirEntry, StorageBackend};
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Production backend: relative paths resolve under a data root on disk.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

impl StorageBackend for FsBackend {
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let full = self.full(path);
        match fs::read(&full) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io("read", full, e)),
        }
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        atomic::write_atomic(&self.full(path), bytes)
    }

    fn is_file(&self, path: &Path) -> bool {
        atomic::file_exists(&self.full(path))
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.full(path).is_dir()
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let full = self.full(path);
        let entries = match fs::read_dir(&full) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io("list dir", full, e)),
        };

        let mut listed = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io("list dir", &full, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(TEMP_PREFIX) {
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            listed.push(DirEntry { name, is_dir });
        }
        listed.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(listed)
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let full = self.full(path);
        match fs::remove_file(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io("remove file", full, e)),
        }
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let full = self.full(path);
        match fs::remove_dir_all(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io("remove dir", full, e)),
        }
    }

    fn remove_dir_if_empty(&self, path: &Path) -> Result<bool> {
        let full = self.full(path);
        if !full.is_dir() {
            return Ok(false);
        }
        let is_empty = fs::read_dir(&full)
            .map_err(|e| StoreError::io("list dir", &full, e))?
            .next()
            .is_none();
        if !is_empty {
            return Ok(false);
        }
        match fs::remove_dir(&full) {
            Ok(()) => Ok(true),
            // Lost a race with a concurrent writer; the directory is in use again.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(_) if full.is_dir() => Ok(false),
            Err(e) => Err(StoreError::io("remove dir", full, e)),
        }
    }

    fn ensure_dir(&self, path: &Path) -> Result<()> {
        atomic::ensure_dir(&self.full(path))
    }

    fn created_time(&self, path: &Path) -> Result<Option<DateTime<Utc>>> {
        let full = self.full(path);
        let meta = match fs::metadata(&full) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io("stat", full, e)),
        };
        let time = meta
            .created()
            .or_else(|_| meta.modified())
            .map_err(|e| StoreError::io("stat", &full, e))?;
        Ok(Some(time.into()))
    }

    fn display_path(&self, path: &Path) -> PathBuf {
        self.full(path)
    }
}
