use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;

use dpt_core::graph;
use dpt_core::tracker::normalize_path;

use super::OutputFormat;

#[derive(Args, Debug)]
pub struct LineageArgs {
    /// Tracked file whose ancestors to show
    pub path: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub fn run(args: LineageArgs, config_path: &Path) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    super::require_database(&config)?;
    let tracker = super::open_tracker(&config)?;

    let path = normalize_path(&args.path)
        .with_context(|| format!("Cannot resolve path: {}", args.path.display()))?;
    let Some(latest) = tracker
        .store()
        .read(|conn| graph::find_latest_by_path(conn, &path))?
    else {
        anyhow::bail!("No data product recorded at {}", path.display());
    };

    let chain = tracker
        .store()
        .read(|conn| graph::lineage(conn, latest.id))
        .with_context(|| format!("Cannot load lineage of {}", path.display()))?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&chain)?),
        OutputFormat::Text => {
            println!("Lineage of {} ({} products)", path.display(), chain.len());
            for product in &chain {
                let parents = tracker
                    .store()
                    .read(|conn| graph::parents_of(conn, product.id))?;
                let short: String = product.content_hash.as_str().chars().take(12).collect();
                print!("  [{}] {} {}", product.id, product.path.display(), short);
                if parents.is_empty() {
                    println!();
                } else {
                    let list: Vec<String> = parents.iter().map(ToString::to_string).collect();
                    println!(" <- {}", list.join(", "));
                }
            }
        }
    }
    Ok(())
}
