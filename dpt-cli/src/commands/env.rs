use std::path::Path;

use anyhow::Context;
use clap::Args;

use dpt_core::facts::facts_of_environment;

use super::OutputFormat;

#[derive(Args, Debug)]
pub struct EnvArgs {
    /// List every library and variable of the environment
    #[arg(long)]
    pub facts: bool,

    /// Output format
    #[arg(long, value_enum, default_value_t)]
    pub format: OutputFormat,
}

pub fn run(args: EnvArgs, config_path: &Path) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let tracker = super::open_tracker(&config)?;

    let resolved = tracker
        .current_environment()
        .context("Cannot resolve environment")?;
    let facts = if args.facts {
        tracker
            .store()
            .read(|conn| facts_of_environment(conn, resolved.id))?
    } else {
        Vec::new()
    };

    match args.format {
        OutputFormat::Json => {
            let out = serde_json::json!({
                "id": resolved.id,
                "created": resolved.created,
                "fact_count": resolved.fact_count,
                "facts": facts.iter().map(|f| &f.key).collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!(
                "Environment {} ({}, {} facts)",
                resolved.id,
                if resolved.created { "created" } else { "existing" },
                resolved.fact_count
            );
            for fact in &facts {
                println!(
                    "  {:<9} {} = {}",
                    fact.key.kind, fact.key.name, fact.key.value
                );
            }
        }
    }
    Ok(())
}
