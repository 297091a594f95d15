//! Configuration view and init commands: `kiln config`.

use anyhow::Result;
use std::path::{Path, PathBuf};

use kiln::config::{CONFIG_FILE_NAME, KilnConfig};

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(cli: &Cli, command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let config = KilnConfig::resolve(cli.config.as_deref())?;
            let source = match cli.config.as_deref() {
                Some(path) => path.display().to_string(),
                None if Path::new(CONFIG_FILE_NAME).exists() => CONFIG_FILE_NAME.to_string(),
                None => "built-in defaults".to_string(),
            };

            println!("# Effective configuration (source: {}, with KILN_* overrides)", source);
            println!();
            print!("{}", config.to_toml()?);
        }
        ConfigCommands::Init { force } => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));
            init_config(&path, force)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite it.",
            path.display()
        );
    }
    KilnConfig::default().save(path)
}
