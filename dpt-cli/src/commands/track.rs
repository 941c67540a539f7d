use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;

use dpt_core::ParentRef;
use dpt_core::graph;
use dpt_core::hash::ContentHash;

use super::OutputFormat;

#[derive(Args, Debug)]
pub struct TrackArgs {
    /// File to record
    pub path: PathBuf,

    /// File this one was derived from (repeatable)
    #[arg(short, long = "parent")]
    pub parents: Vec<PathBuf>,

    /// Label stored on the invocation
    #[arg(long, default_value = "dpt track")]
    pub label: String,

    /// Record this content hash instead of hashing the file
    #[arg(long)]
    pub hash: Option<String>,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub fn run(args: TrackArgs, config_path: &Path) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let tracker = super::open_tracker(&config)?;

    let mut session = tracker.open(args.label.as_str()).context("Cannot open session")?;
    let environment = session.environment();
    let parents: Vec<ParentRef> = args.parents.into_iter().map(ParentRef::Path).collect();

    let registered = match &args.hash {
        Some(hash) => session.register(&args.path, &ContentHash::from(hash.as_str()), &parents),
        None => session.register_file(&args.path, &parents),
    };
    // Close even when registration failed so the invocation gets an end time.
    session.close().context("Cannot close session")?;
    let id = registered.with_context(|| format!("Cannot register {}", args.path.display()))?;

    let product = tracker
        .store()
        .read(|conn| graph::get_data_product(conn, id))?
        .with_context(|| format!("Data product {id} vanished after commit"))?;

    match args.format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "product": product,
                "environment": environment,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!(
                "Recorded {} as data product {} (invocation {})",
                product.path.display(),
                product.id,
                product.invocation_id
            );
            println!("  hash: {}", product.content_hash);
            if let Some(env) = environment {
                println!("  environment: {} ({} facts)", env.id, env.fact_count);
            }
        }
    }
    Ok(())
}
