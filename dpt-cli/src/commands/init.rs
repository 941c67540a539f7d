use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;

use dpt_core::config::DptConfig;
use dpt_core::store::SqliteStore;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Database location, relative to the config file (default: dpt.db)
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Rewrite the config file even if it exists
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs, config_path: &Path) -> anyhow::Result<()> {
    if config_path.exists() && !args.force {
        if args.db.is_some() {
            tracing::warn!(
                config = %config_path.display(),
                "Config already exists; ignoring --db (use --force to rewrite)"
            );
        }
    } else {
        let mut config = DptConfig::default();
        if let Some(db) = args.db {
            config.store.path = db;
        }
        config.validate().context("Invalid config")?;
        if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create {}", parent.display()))?;
        }
        std::fs::write(config_path, config.to_toml()?)
            .with_context(|| format!("Cannot write config {}", config_path.display()))?;
        println!("Wrote {}", config_path.display());
    }

    let config = DptConfig::load(config_path)
        .with_context(|| format!("Cannot load config {}", config_path.display()))?;
    if let Some(parent) = config.store.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create database directory {}", parent.display()))?;
    }
    let store = SqliteStore::open_with_config(&config.store)
        .with_context(|| format!("Cannot open database: {}", config.store.path.display()))?;
    let stats = store.stats().context("Cannot read database")?;

    println!(
        "Initialized dpt database at {} ({} data products)",
        config.store.path.display(),
        stats.data_products
    );
    Ok(())
}
