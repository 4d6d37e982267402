//! Configuration view and validation commands: `codesage config`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use codesage::config::{CONFIG_FILE_NAME, ServiceConfig};

use super::super::ConfigCommands;

pub fn cmd_config(
    config: &ServiceConfig,
    explicit: Option<&Path>,
    command: Option<ConfigCommands>,
) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("CodeSage Configuration (effective, with env/CLI overrides)");
            println!("==========================================================");
            println!();
            let rendered =
                toml::to_string_pretty(config).context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            let problems = config.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration problems:");
                for problem in &problems {
                    println!("  - {}", problem);
                }
                anyhow::bail!("{} configuration problem(s)", problems.len());
            }
        }
        Some(ConfigCommands::Init) => {
            let path = explicit
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            if path.exists() {
                println!("{} already exists.", path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            let rendered = toml::to_string_pretty(&ServiceConfig::default())
                .context("Failed to render default configuration")?;
            std::fs::write(&path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Created {}", path.display());
        }
    }
    Ok(())
}
