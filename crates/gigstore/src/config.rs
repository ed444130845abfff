//! # Configuration
//!
//! Store configuration is managed by [`clapfig`], which handles layered loading
//! from TOML files, environment variables, and programmatic overrides.
//!
//! ## Storage Hierarchy
//!
//! Configuration is resolved in priority order:
//! 1. **Environment variables**: `GIGSTORE__INDEX_TTL_SECS`, `GIGSTORE__VERIFY_INDEX_WRITES`, etc.
//! 2. **Data directory config**: `<data>/gigstore.toml`, travels with the data.
//! 3. **User config**: OS-appropriate config directory (via `directories` crate).
//! 4. **Compiled defaults**: Built-in fallbacks via `#[config(default = ...)]`.
//!
//! ## Available Settings
//!
//! | Key | Default | Description |
//! |-----|---------|-------------|
//! | `index_ttl_secs` | `30` | How long a loaded index is served from memory (`0` disables caching) |
//! | `verify_index_writes` | `true` | Check a saved document exists before indexing it |
//! | `write_back_scan_hits` | `true` | Record ids found by scanning in the index |
//!
//! ## CLI Usage
//!
//! - `gigstore config`: Show all configuration values.
//! - `gigstore config get <key>`: Get a specific value.
//! - `gigstore config set <key> <value>`: Persist a value in the data directory.
//! - `gigstore config gen`: Generate a sample `gigstore.toml`.

use crate::store::StoreOptions;
use confique::Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "gigstore.toml";

/// Configuration for gigstore, stored in `gigstore.toml`.
#[derive(Config, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Seconds a loaded index stays fresh in memory. 0 disables caching.
    #[config(default = 30)]
    pub index_ttl_secs: u64,

    /// Verify that a saved document exists on disk before indexing it.
    #[config(default = true)]
    pub verify_index_writes: bool,

    /// Write ids found by the directory scan back into the index.
    #[config(default = true)]
    pub write_back_scan_hits: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            index_ttl_secs: 30,
            verify_index_writes: true,
            write_back_scan_hits: true,
        }
    }
}

impl StoreConfig {
    pub fn index_ttl(&self) -> Duration {
        Duration::from_secs(self.index_ttl_secs)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            index_ttl: self.index_ttl(),
            verify_index_writes: self.verify_index_writes,
            write_back_scan_hits: self.write_back_scan_hits,
        }
    }
}
