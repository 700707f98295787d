//! `refine config` implementation.

use anyhow::Result;
use colored::Colorize;
use refinery_core::RefineryConfig;

pub fn show(config: &RefineryConfig, json_output: bool) -> Result<()> {
    if json_output {
        println!("{}", serde_json::to_string_pretty(config)?);
        return Ok(());
    }

    println!("{}", "# Effective configuration".dimmed());
    println!("{}", format!("# workspace: {}", config.workspace_root().display()).dimmed());
    println!("{}", format!("# database:  {}", config.database_path().display()).dimmed());
    println!();
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
