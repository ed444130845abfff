//! # gigstore CLI
//!
//! An operator tool over the gigstore library: inspect where documents live,
//! repair indexes, migrate legacy data, audit consistency and run guarded
//! transitions by hand. The binary is thin: everything lives in `src/cli/`,
//! and this file only invokes `cli::run()` and handles process termination.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  CLI Layer (src/cli/)                                       │
//! │  - clap argument parsing (setup.rs)                         │
//! │  - context wiring + dispatch (commands.rs)                  │
//! │  - terminal / JSON rendering (render.rs, styles.rs)         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  gigstore::Marketplace → commands → store / guard / ...     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Library diagnostics arrive as `tracing` events and are written to stderr;
//! `RUST_LOG` takes precedence over `-v`.

mod cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
