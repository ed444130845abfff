use clap::{ArgAction, Parser, Subcommand};
use gigstore::EntityKind;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "gigstore",
    bin_name = "gigstore",
    version,
    disable_help_subcommand = true
)]
#[command(about = "Inspect, repair and audit a gigstore data directory", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory (default: $GIGSTORE_DATA, else ./data)
    #[arg(long, global = true, value_name = "DIR", help_heading = "Options")]
    pub data: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true, help_heading = "Options")]
    pub json: bool,

    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = ArgAction::Count, help_heading = "Options")]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show where a document lives and how it was found
    #[command(display_order = 1)]
    Resolve {
        /// Entity kind (project, gig, application, gig-request, notification)
        kind: EntityKind,
        id: String,
    },

    /// Print one document
    #[command(display_order = 2)]
    Show { kind: EntityKind, id: String },

    /// List documents of a kind, newest first
    #[command(display_order = 3)]
    List {
        kind: EntityKind,

        /// Only documents whose parent reference matches
        #[arg(long, value_name = "ID")]
        parent: Option<String>,
    },

    /// Rebuild indexes from the documents on disk
    #[command(display_order = 10)]
    Reindex {
        /// Only this kind
        kind: Option<EntityKind>,
    },

    /// Move legacy documents to their date shards
    #[command(display_order = 11)]
    Migrate {
        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Audit cross-entity consistency (reports, never fixes)
    #[command(display_order = 12)]
    Validate {
        /// Exit with an error when issues are found
        #[arg(long)]
        strict: bool,
    },

    /// Create a project for a freelancer on a gig
    #[command(display_order = 20)]
    Match {
        #[arg(long, value_name = "ID")]
        gig: String,
        #[arg(long, value_name = "ID")]
        freelancer: String,
        #[arg(long, value_name = "ID")]
        commissioner: String,
        /// Application to accept
        #[arg(long, value_name = "ID")]
        application: Option<String>,
        /// Gig request to accept
        #[arg(long, value_name = "ID")]
        request: Option<String>,
        /// Project title (default: the gig title)
        #[arg(long)]
        title: Option<String>,
        /// Task title, repeatable
        #[arg(long = "task", value_name = "TITLE")]
        tasks: Vec<String>,
        /// Acting user
        #[arg(long, value_name = "ID")]
        actor: Option<String>,
    },

    /// Turn a pending gig request into a project
    #[command(display_order = 21)]
    AcceptRequest {
        id: String,
        #[arg(long = "task", value_name = "TITLE")]
        tasks: Vec<String>,
        #[arg(long, value_name = "ID")]
        actor: Option<String>,
    },

    /// Cancel a project and reopen its gig
    #[command(display_order = 22)]
    CancelProject {
        id: String,
        #[arg(long, value_name = "ID")]
        actor: Option<String>,
    },

    /// Show or change configuration
    #[command(display_order = 30)]
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Generate a sample gigstore.toml
    Gen {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print one value
    Get { key: String },
    /// Persist a value in the data directory's gigstore.toml
    Set { key: String, value: String },
}
