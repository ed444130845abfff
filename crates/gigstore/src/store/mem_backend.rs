use super::backend::{DirEntry, StorageBackend};
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Clone)]
struct MemFile {
    bytes: Vec<u8>,
    created: DateTime<Utc>,
}

#[derive(Default)]
struct MemState {
    files: BTreeMap<PathBuf, MemFile>,
    dirs: BTreeSet<PathBuf>,
    simulate_write_error: bool,
    fail_writes_containing: Vec<String>,
    drop_writes_containing: Vec<String>,
    fail_removes_containing: Vec<String>,
    fail_reads_containing: Vec<String>,
}

impl MemState {
    fn check_remove(&self, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        if self
            .fail_removes_containing
            .iter()
            .any(|n| path_str.contains(n.as_str()))
        {
            return Err(StoreError::Store(format!(
                "Simulated remove error: {}",
                path.display()
            )));
        }
        Ok(())
    }

    fn add_ancestors(&mut self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir.as_os_str().is_empty() {
                break;
            }
            self.dirs.insert(dir.to_path_buf());
            current = dir.parent();
        }
    }
}

/// In-memory storage backend for testing.
///
/// Uses `Rc<RefCell<..>>` since the store is single-threaded: clones share the
/// same state, so several entity stores can sit on one backend just like they
/// share one data directory on disk.
///
/// Supports fault injection so guard and rollback paths can be exercised:
/// writes can be made to fail, or to be silently lost.
#[derive(Clone, Default)]
pub struct MemBackend {
    state: Rc<RefCell<MemState>>,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail.
    pub fn set_simulate_write_error(&self, simulate: bool) {
        self.state.borrow_mut().simulate_write_error = simulate;
    }

    /// Make writes to paths containing `needle` fail.
    pub fn fail_writes_containing(&self, needle: impl Into<String>) {
        self.state
            .borrow_mut()
            .fail_writes_containing
            .push(needle.into());
    }

    /// Make writes to paths containing `needle` report success without persisting.
    pub fn drop_writes_containing(&self, needle: impl Into<String>) {
        self.state
            .borrow_mut()
            .drop_writes_containing
            .push(needle.into());
    }

    /// Make removals of paths containing `needle` fail.
    pub fn fail_removes_containing(&self, needle: impl Into<String>) {
        self.state
            .borrow_mut()
            .fail_removes_containing
            .push(needle.into());
    }

    /// Make reads of paths containing `needle` fail.
    pub fn fail_reads_containing(&self, needle: impl Into<String>) {
        self.state
            .borrow_mut()
            .fail_reads_containing
            .push(needle.into());
    }

    pub fn clear_faults(&self) {
        let mut state = self.state.borrow_mut();
        state.simulate_write_error = false;
        state.fail_writes_containing.clear();
        state.drop_writes_containing.clear();
        state.fail_removes_containing.clear();
        state.fail_reads_containing.clear();
    }

    /// Test helper to backdate a file, as if it had been written long ago.
    pub fn set_created_time(&self, path: &Path, created: DateTime<Utc>) -> bool {
        match self.state.borrow_mut().files.get_mut(path) {
            Some(file) => {
                file.created = created;
                true
            }
            None => false,
        }
    }

    /// All stored file paths, sorted.
    pub fn file_paths(&self) -> Vec<PathBuf> {
        self.state.borrow().files.keys().cloned().collect()
    }

    /// Snapshot of every file and its content, for comparing store states.
    pub fn snapshot(&self) -> BTreeMap<PathBuf, Vec<u8>> {
        self.state
            .borrow()
            .files
            .iter()
            .map(|(p, f)| (p.clone(), f.bytes.clone()))
            .collect()
    }
}

impl StorageBackend for MemBackend {
    fn read(&self, path: &Path) -> Result<Option<Vec<u8>>> {
        let state = self.state.borrow();
        let path_str = path.to_string_lossy();
        if state
            .fail_reads_containing
            .iter()
            .any(|n| path_str.contains(n.as_str()))
        {
            return Err(StoreError::Store(format!(
                "Simulated read error: {}",
                path.display()
            )));
        }
        Ok(state.files.get(path).map(|f| f.bytes.clone()))
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let path_str = path.to_string_lossy();
        if state.simulate_write_error
            || state
                .fail_writes_containing
                .iter()
                .any(|n| path_str.contains(n.as_str()))
        {
            return Err(StoreError::Store(format!(
                "Simulated write error: {}",
                path.display()
            )));
        }
        if state
            .drop_writes_containing
            .iter()
            .any(|n| path_str.contains(n.as_str()))
        {
            return Ok(());
        }

        state.add_ancestors(path);
        let created = state
            .files
            .get(path)
            .map(|f| f.created)
            .unwrap_or_else(Utc::now);
        state.files.insert(
            path.to_path_buf(),
            MemFile {
                bytes: bytes.to_vec(),
                created,
            },
        );
        Ok(())
    }

    fn is_file(&self, path: &Path) -> bool {
        self.state.borrow().files.contains_key(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.as_os_str().is_empty() || self.state.borrow().dirs.contains(path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let state = self.state.borrow();
        let mut listed: BTreeMap<String, bool> = BTreeMap::new();

        for dir in &state.dirs {
            if dir.parent() == Some(path) {
                if let Some(name) = dir.file_name() {
                    listed.insert(name.to_string_lossy().to_string(), true);
                }
            }
        }
        for file in state.files.keys() {
            if file.parent() == Some(path) {
                if let Some(name) = file.file_name() {
                    listed.insert(name.to_string_lossy().to_string(), false);
                }
            }
        }

        Ok(listed
            .into_iter()
            .map(|(name, is_dir)| DirEntry { name, is_dir })
            .collect())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_remove(path)?;
        state.files.remove(path);
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check_remove(path)?;
        state.files.retain(|p, _| !p.starts_with(path));
        state.dirs.retain(|p| !p.starts_with(path));
        Ok(())
    }

    fn remove_dir_if_empty(&self, path: &Path) -> Result<bool> {
        let mut state = self.state.borrow_mut();
        if !state.dirs.contains(path) {
            return Ok(false);
        }
        let has_children = state.files.keys().any(|p| p.parent() == Some(path))
            || state.dirs.iter().any(|p| p.parent() == Some(path));
        if has_children {
            return Ok(false);
        }
        state.dirs.remove(path);
        Ok(true)
    }

    fn ensure_dir(&self, path: &Path) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if !path.as_os_str().is_empty() {
            state.add_ancestors(path);
            state.dirs.insert(path.to_path_buf());
        }
        Ok(())
    }

    fn created_time(&self, path: &Path) -> Result<Option<DateTime<Utc>>> {
        Ok(self.state.borrow().files.get(path).map(|f| f.created))
    }

    fn display_path(&self, path: &Path) -> PathBuf {
        PathBuf::from(format!("memory://{}", path.display()))
    }
}
