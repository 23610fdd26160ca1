//! CLI command definitions and dispatch.

pub mod container;
pub mod project;
pub mod reconcile;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use dodoco_common::config::DodocoConfig;
use dodoco_common::types::Requester;
use dodoco_engine::client::EngineClient;
use dodoco_engine::docker::DockerClient;
use dodoco_engine::memory::MemoryEngine;
use dodoco_orchestrator::Orchestrator;
use dodoco_store::Store;

/// Dodoco — container lifecycle and port-allocation orchestrator.
#[derive(Parser, Debug)]
#[command(name = "dodoco", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to a JSON configuration file.
    #[arg(long, global = true, env = "DODOCO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Container engine to talk to.
    #[arg(long, global = true, value_enum, default_value_t = EngineKind::Docker)]
    pub engine: EngineKind,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// User id the request runs as.
    #[arg(long, global = true, env = "DODOCO_USER", default_value_t = 0)]
    pub user: i64,

    /// Run with admin rights.
    #[arg(long, global = true)]
    pub admin: bool,

    /// Print results as JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,
}

/// Engine backends selectable from the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineKind {
    /// Docker Engine HTTP API.
    Docker,
    /// In-process engine and in-memory store; nothing persists.
    Memory,
}

/// Log formats.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage containers.
    Container(container::ContainerArgs),
    /// Manage projects and memberships.
    Project(project::ProjectArgs),
    /// Reconcile every record against the engine.
    ReconcileAll(reconcile::ReconcileAllArgs),
}

/// Shared state handed to every command.
pub struct Context {
    /// Orchestrator bound to the configured store and engine.
    pub orchestrator: Orchestrator,
    /// Identity of the caller.
    pub requester: Requester,
    /// Emit JSON output.
    pub json: bool,
}

impl Context {
    fn build(cli: &Cli) -> anyhow::Result<Self> {
        let config = match &cli.config {
            Some(path) => DodocoConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => DodocoConfig::default(),
        }
        .apply_env();

        let (store, engine): (Store, Arc<dyn EngineClient>) = match cli.engine {
            EngineKind::Docker => {
                let store = Store::open(&config.database_path)?;
                let engine = DockerClient::connect(&config.engine)?;
                tracing::debug!(url = %engine.base_url(), "using docker engine");
                (store, Arc::new(engine))
            }
            EngineKind::Memory => {
                let registry = config.images.0.keys().map(|base| format!("{base}:latest"));
                (
                    Store::in_memory()?,
                    Arc::new(MemoryEngine::with_registry(registry)),
                )
            }
        };

        let requester = if cli.admin {
            Requester::admin(cli.user)
        } else {
            Requester::user(cli.user)
        };
        Ok(Self {
            orchestrator: Orchestrator::new(store, engine, &config),
            requester,
            json: cli.json,
        })
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if setup or the command fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let ctx = Context::build(&cli)?;
    match cli.command {
        Command::Container(args) => container::execute(&ctx, args),
        Command::Project(args) => project::execute(&ctx, args),
        Command::ReconcileAll(args) => reconcile::execute(&ctx, &args),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "dodoco",
            "reconcile-all",
            "--engine",
            "memory",
            "--log-format",
            "json",
            "--admin",
        ])
        .expect("parse");
        assert_eq!(cli.engine, EngineKind::Memory);
        assert_eq!(cli.log_format, LogFormat::Json);
        assert!(cli.admin);
    }
}
