pub mod env;
pub mod init;
pub mod lineage;
pub mod status;
pub mod track;

use std::path::Path;

use anyhow::Context;
use clap::{Subcommand, ValueEnum};

use dpt_core::Tracker;
use dpt_core::config::DptConfig;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the database and a default dpt.toml
    Init(init::InitArgs),
    /// Record a file as a data product of a new session
    Track(track::TrackArgs),
    /// Resolve the current execution environment
    Env(env::EnvArgs),
    /// Show the ancestors of a tracked file
    Lineage(lineage::LineageArgs),
    /// Show row counts for the provenance database
    Status(status::StatusArgs),
}

/// Output format shared by the reporting commands.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub fn run(cmd: Command, config_path: &Path) -> anyhow::Result<()> {
    match cmd {
        Command::Init(args) => init::run(args, config_path),
        Command::Track(args) => track::run(args, config_path),
        Command::Env(args) => env::run(args, config_path),
        Command::Lineage(args) => lineage::run(args, config_path),
        Command::Status(args) => status::run(args, config_path),
    }
}

/// Load the config file, or the defaults when it does not exist.
pub(crate) fn load_config(config_path: &Path) -> anyhow::Result<DptConfig> {
    DptConfig::load_or_default(config_path)
        .with_context(|| format!("Cannot load config {}", config_path.display()))
}

pub(crate) fn open_tracker(config: &DptConfig) -> anyhow::Result<Tracker> {
    Tracker::from_config(config)
        .with_context(|| format!("Cannot open database: {}", config.store.path.display()))
}

/// Fail unless the configured database already exists.
pub(crate) fn require_database(config: &DptConfig) -> anyhow::Result<()> {
    if !config.store.path.exists() {
        anyhow::bail!(
            "Database not found: {}. Run `dpt init` first.",
            config.store.path.display()
        );
    }
    Ok(())
}
