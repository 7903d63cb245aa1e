//! Configuration view and validation commands: `unitforge config`.

use anyhow::{Result, bail};
use std::path::Path;
use unitforge::config::{CONFIG_FILE_NAME, CompilerConfig};

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(working_dir: &Path, cli: &Cli, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| working_dir.join(CONFIG_FILE_NAME));

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Unitforge Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found, using defaults", config_path.display());
            }
            println!();

            let config = CompilerConfig::resolve(cli.config.as_deref(), working_dir, cli.workers)?;
            print!("{}", config.to_toml()?);
            println!();
            println!("Effective values (with env/CLI overrides):");
            println!("  workers = {}", config.effective_workers());
            println!("  translators = {}", config.translators.enabled.join(", "));

            let warnings = config.validate();
            if !warnings.is_empty() {
                println!();
                println!("Warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE_NAME);
                return Ok(());
            }

            let config = CompilerConfig::load(&config_path)?;
            let warnings = config.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                bail!(
                    "{} already exists at {}. Delete it first if you want to recreate it.",
                    CONFIG_FILE_NAME,
                    config_path.display()
                );
            }

            CompilerConfig::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE_NAME, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [pool] workers, core_multiplier");
            println!("  - [translators] enabled");
            println!();
        }
    }

    Ok(())
}
