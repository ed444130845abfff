use super::render::print_result;
use super::setup::{Cli, Commands, ConfigCommands};
use anyhow::{bail, Context, Result};
use clap::Parser;
use clapfig::{Clapfig, ConfigAction, SearchPath};
use gigstore::config::{StoreConfig, CONFIG_FILE_NAME};
use gigstore::guard::MatchRequest;
use gigstore::init::{config_search_paths, initialize, load_config};
use gigstore::migrate::MigrateOptions;
use gigstore::EntityId;
use std::path::Path;
use tracing_subscriber::EnvFilter;

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    let ctx = initialize(&cwd, cli.data.clone());
    let api = &ctx.api;

    let result = match cli.command {
        Commands::Resolve { kind, id } => api.resolve(kind, &EntityId::from(id))?,
        Commands::Show { kind, id } => api.show(kind, &EntityId::from(id))?,
        Commands::List { kind, parent } => {
            let parent = parent.map(EntityId::from);
            api.list(kind, parent.as_ref())?
        }
        Commands::Reindex { kind } => api.reindex(kind)?,
        Commands::Migrate { dry_run } => api.migrate(MigrateOptions { dry_run })?,
        Commands::Validate { strict } => {
            let (result, report) = api.validate()?;
            print_result(&result, cli.json)?;
            if strict && !report.is_clean() {
                bail!("{} inconsistency(ies) found", report.issues.len());
            }
            return Ok(());
        }
        Commands::Match {
            gig,
            freelancer,
            commissioner,
            application,
            request,
            title,
            tasks,
            actor,
        } => {
            let mut req = MatchRequest::new(gig, freelancer, commissioner).with_tasks(tasks);
            if let Some(application) = application {
                req = req.with_application(application);
            }
            if let Some(request) = request {
                req = req.with_request(request);
            }
            if let Some(title) = title {
                req = req.with_title(title);
            }
            if let Some(actor) = actor {
                req = req.acted_by(actor);
            }
            api.match_freelancer(&req)?
        }
        Commands::AcceptRequest { id, tasks, actor } => {
            api.accept_request(&EntityId::from(id), &tasks, actor.map(EntityId::from))?
        }
        Commands::CancelProject { id, actor } => {
            api.cancel_project(&EntityId::from(id), actor.map(EntityId::from))?
        }
        Commands::Config { action } => {
            return handle_config_command(action.as_ref(), &ctx.data_dir);
        }
    };

    print_result(&result, cli.json)?;
    if result.has_errors() {
        bail!("command finished with errors");
    }
    Ok(())
}

/// `RUST_LOG` wins; otherwise `-v` raises the level from `warn`.
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();
}

fn handle_config_command(action: Option<&ConfigCommands>, data_dir: &Path) -> Result<()> {
    match action {
        None => {
            let config = load_config(data_dir);

            let table = toml::Value::try_from(&config)?;
            if let toml::Value::Table(t) = table {
                for (k, v) in &t {
                    println!("{} = {}", k, format_toml_value(v));
                }
            }
            Ok(())
        }
        Some(ConfigCommands::Gen { output }) => {
            let action = ConfigAction::Gen {
                output: output.clone(),
            };
            let result = Clapfig::builder::<StoreConfig>()
                .app_name("gigstore")
                .file_name(CONFIG_FILE_NAME)
                .search_paths(config_search_paths(data_dir))
                .no_env()
                .strict(false)
                .handle(&action)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            print!("{result}");
            Ok(())
        }
        Some(ConfigCommands::Get { key }) => {
            let action = ConfigAction::Get {
                key: key.clone(),
                scope: None,
            };
            let result = Clapfig::builder::<StoreConfig>()
                .app_name("gigstore")
                .file_name(CONFIG_FILE_NAME)
                .search_paths(config_search_paths(data_dir))
                .no_env()
                .strict(false)
                .handle(&action)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{result}");
            Ok(())
        }
        Some(ConfigCommands::Set { key, value }) => {
            // Writes go to the first search path: the data directory.
            let action = ConfigAction::Set {
                key: key.clone(),
                value: value.clone(),
                scope: None,
            };
            let result = Clapfig::builder::<StoreConfig>()
                .app_name("gigstore")
                .file_name(CONFIG_FILE_NAME)
                .search_paths(vec![SearchPath::Path(data_dir.to_path_buf())])
                .no_env()
                .strict(false)
                .handle(&action)
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
            println!("{result}");
            Ok(())
        }
    }
}

fn format_toml_value(v: &toml::Value) -> String {
    match v {
        toml::Value::String(s) => format!("\"{}\"", s),
        toml::Value::Array(_) => toml::to_string(v).unwrap_or_else(|_| format!("{:?}", v)),
        other => other.to_string(),
    }
}
