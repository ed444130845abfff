use crate::error::Result;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Abstract interface for raw storage I/O.
///
/// This trait handles the "how" of storage (filesystem vs memory), while
/// [`super::EntityStore`] handles the "what" (paths, index, resolution).
/// All paths are relative to the backend's data root.
pub trait StorageBackend: Clone {
    /// Read raw bytes. Returns `Ok(None)` if the file does not exist.
    /// Returns `Err` only on actual I/O errors (permissions, disk failure).
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>>;

    /// Write bytes, creating parent directories.
    /// MUST be atomic (write to tmp then rename) to avoid partial writes.
    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()>;

    fn is_file(&self, path: &Path) -> bool;

    fn is_dir(&self, path: &Path) -> bool;

    /// Immediate children of a directory. A missing directory lists as empty.
    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>>;

    /// Remove a file. Missing files are not an error.
    fn remove_file(&self, path: &Path) -> Result<()>;

    /// Remove a directory tree. Missing directories are not an error.
    fn remove_dir_all(&self, path: &Path) -> Result<()>;

    /// Remove a directory only if it is empty. Returns whether it was removed.
    fn remove_dir_if_empty(&self, path: &Path) -> Result<bool>;

    fn ensure_dir(&self, path: &Path) -> Result<()>;

    /// Creation time of a file, falling back to modification time where the
    /// platform does not record birth time.
    fn created_time(&self, path: &Path) -> Result<Option<DateTime<Utc>>>;

    /// Human-readable location of a relative path (real path or virtual URI).
    fn display_path(&self, path: &Path) -> PathBuf;
}

/// Recursively copy a directory tree from `from` to `to` through the backend.
/// Returns the number of files copied.
pub fn copy_tree<B: StorageBackend>(backend: &B, from: &Path, to: &Path) -> Result<usize> {
    let mut copied = 0;
    for entry in backend.list_dir(from)? {
        let src = from.join(&entry.name);
        let dst = to.join(&entry.name);
        if entry.is_dir {
            copied += copy_tree(backend, &src, &dst)?;
        } else if let Some(bytes) = backend.read(&src)? {
            backend.write_atomic(&dst, &bytes)?;
            copied += 1;
        }
    }
    Ok(copied)
}
