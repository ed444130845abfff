//! # Data Directory and Context Setup
//!
//! A gigstore data directory holds one sub-directory per entity kind
//! (`projects/`, `gigs/`, ...) and, optionally, a `gigstore.toml` next to
//! them.
//!
//! ## Data Directory Resolution
//!
//! 1. An explicit `data_override` (the CLI's `--data` flag).
//! 2. The `GIGSTORE_DATA` environment variable.
//! 3. `<cwd>/data`.
//!
//! ## Config Resolution
//!
//! Config files are merged, later ones winning:
//! 1. The user config directory (via `directories`).
//! 2. `<data>/gigstore.toml`.
//!
//! Environment variables (`GIGSTORE__INDEX_TTL_SECS`, ...) override both.
//! A missing or broken config never prevents opening the store: compiled
//! defaults are used instead.

use crate::api::Marketplace;
use crate::config::{StoreConfig, CONFIG_FILE_NAME};
use crate::store::fs_backend::FsBackend;
use clapfig::{Clapfig, SearchMode, SearchPath};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DATA_DIR_ENV: &str = "GIGSTORE_DATA";
pub const DEFAULT_DATA_DIR: &str = "data";

pub struct GigstoreContext {
    pub api: Marketplace<FsBackend>,
    pub config: StoreConfig,
    pub data_dir: PathBuf,
}

/// OS-appropriate per-user config directory, if the platform has one.
pub fn user_config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "gigstore", "gigstore").map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn resolve_data_dir(cwd: &Path, data_override: Option<PathBuf>) -> PathBuf {
    let dir = data_override
        .or_else(|| std::env::var_os(DATA_DIR_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
    if dir.is_absolute() {
        dir
    } else {
        cwd.join(dir)
    }
}

/// Config search paths, lowest priority first.
pub fn config_search_paths(data_dir: &Path) -> Vec<SearchPath> {
    let mut paths = Vec::new();
    if let Some(user_dir) = user_config_dir() {
        paths.push(SearchPath::Path(user_dir));
    }
    paths.push(SearchPath::Path(data_dir.to_path_buf()));
    paths
}

pub fn load_config(data_dir: &Path) -> StoreConfig {
    match Clapfig::builder()
        .app_name("gigstore")
        .file_name(CONFIG_FILE_NAME)
        .search_paths(config_search_paths(data_dir))
        .search_mode(SearchMode::Merge)
        .load()
    {
        Ok(config) => config,
        Err(e) => {
            warn!(data = %data_dir.display(), error = %e, "ignoring unreadable config, using defaults");
            StoreConfig::default()
        }
    }
}

/// Open the store rooted at the resolved data directory.
pub fn initialize(cwd: &Path, data_override: Option<PathBuf>) -> GigstoreContext {
    let data_dir = resolve_data_dir(cwd, data_override);
    let config = load_config(&data_dir);
    debug!(data = %data_dir.display(), ttl_secs = config.index_ttl_secs, "opening store");

    let api = Marketplace::new(FsBackend::new(data_dir.clone()), config.clone());
    GigstoreContext {
        api,
        config,
        data_dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_override_wins_and_relative_paths_join_cwd() {
        let cwd = Path::new("/srv/app");
        assert_eq!(
            resolve_data_dir(cwd, Some(PathBuf::from("/var/gigs"))),
            PathBuf::from("/var/gigs")
        );
        assert_eq!(
            resolve_data_dir(cwd, Some(PathBuf::from("store"))),
            PathBuf::from("/srv/app/store")
        );
    }

    #[test]
    fn test_data_dir_config_is_applied() {
        let temp = tempdir().unwrap();
        fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "index_ttl_secs = 0\nwrite_back_scan_hits = false\n",
        )
        .unwrap();

        let ctx = initialize(temp.path(), Some(temp.path().to_path_buf()));
        assert_eq!(ctx.config.index_ttl_secs, 0);
        assert!(!ctx.config.write_back_scan_hits);
        assert!(ctx.config.verify_index_writes);
        assert_eq!(ctx.data_dir, temp.path());
    }

    #[test]
    fn test_malformed_config_falls_back_to_defaults() {
        let temp = tempdir().unwrap();
        fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            "index_ttl_secs = \"soon\"\nverify_index_writes = [\n",
        )
        .unwrap();

        assert_eq!(load_config(temp.path()), StoreConfig::default());
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let temp = tempdir().unwrap();
        let ctx = initialize(temp.path(), Some(temp.path().join("fresh")));
        assert_eq!(ctx.config, StoreConfig::default());
    }
}
