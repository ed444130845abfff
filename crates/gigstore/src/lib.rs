//! # gigstore Architecture
//!
//! gigstore is the persistence and consistency core of a freelance
//! marketplace: projects, gigs, applications, gig requests and notifications
//! stored as one JSON document per entity, with no database underneath.
//!
//! The filesystem is the source of truth. Everything else (indexes, the
//! in-memory cache, the guard's bookkeeping) is derived and repairable.
//!
//! ## Layers
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CLI (gigstore-cli crate)                                   │
//! │  - Parses arguments, renders CmdResult, owns exit codes     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  API (api.rs) and commands (commands/*.rs)                  │
//! │  - Marketplace facade, kind dispatch, structured results    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  guard.rs, validator.rs, migrate.rs                         │
//! │  - Cross-document sagas, audits, legacy migration           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Storage (store/)                                           │
//! │  - EntityStore per kind, index, resolver, path scheme       │
//! │  - StorageBackend: FsBackend (atomic writes), MemBackend    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## No I/O Assumptions in Core
//!
//! Nothing in this crate writes to stdout/stderr or exits the process.
//! Diagnostics go through `tracing`; installing a subscriber is the
//! embedding application's job.
//!
//! ## Concurrency
//!
//! The library is synchronous and single-threaded (stores are `!Sync`).
//! Several processes may share a data directory: single-file writes are
//! atomic renames, the index tolerates lost updates (last writer wins, and
//! readers fall back to scanning), and guard rollbacks are idempotent.
//!
//! ## Module Overview
//!
//! - [`model`]: entity records, ids, statuses
//! - [`store`]: storage backends, path scheme, index, resolver, entity stores
//! - [`migrate`]: legacy flat layout to date shards
//! - [`guard`]: project creation and cancellation as verified sagas
//! - [`validator`]: detect-and-report consistency audit
//! - [`commands`] / [`api`]: operator operations and the facade
//! - [`config`] / [`init`]: configuration and data directory setup

pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod guard;
pub mod init;
pub mod migrate;
pub mod model;
pub mod store;
pub mod validator;

pub use api::Marketplace;
pub use error::{Result, StoreError};
pub use model::{Entity, EntityId, EntityKind};
