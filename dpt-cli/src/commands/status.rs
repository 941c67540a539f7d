use std::path::Path;

use anyhow::Context;
use clap::Args;

use dpt_core::store::SqliteStore;

use super::OutputFormat;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub fn run(args: StatusArgs, config_path: &Path) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    super::require_database(&config)?;
    let db_path = &config.store.path;

    let store = SqliteStore::open_with_config(&config.store)
        .with_context(|| format!("Cannot open database: {}", db_path.display()))?;
    let stats = store.stats().context("Failed to read store stats")?;

    if args.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("dpt status");
    println!();
    println!("  Database: {}", db_path.display());
    if let Ok(meta) = std::fs::metadata(db_path) {
        println!("  Size:     {}", format_bytes(meta.len()));
    }
    println!();
    println!("  {:<16} {:>8}", "Facts", stats.facts);
    println!("  {:<16} {:>8}", "Environments", stats.environments);
    println!("  {:<16} {:>8}", "Invocations", stats.invocations);
    println!("  {:<16} {:>8}", "Data products", stats.data_products);
    println!("  {:<16} {:>8}", "Dependencies", stats.dependencies);

    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
