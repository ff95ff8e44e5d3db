//! Config command implementations

use std::path::Path;

use anyhow::{Context, Result};
use wsc_core::config::{self, ResolverConfig};

use crate::output::{print_error, print_info, print_success};

/// Print the config file location
pub fn config_path(path: &Path) -> Result<()> {
    println!("{}", path.display());
    if !path.exists() {
        print_info("File does not exist yet, defaults are in effect");
    }
    Ok(())
}

/// Show the effective configuration, defaults included
pub fn config_show(path: &Path, config: &ResolverConfig, key: Option<&str>) -> Result<()> {
    let value = toml::Value::try_from(config).context("Failed to serialize configuration")?;

    let Some(key) = key else {
        if path.exists() {
            print_info(&format!("Configuration file: {}", path.display()));
        } else {
            print_info("No configuration file, showing defaults");
        }
        println!("{}", toml::to_string_pretty(&value)?);
        return Ok(());
    };

    // Dotted path, e.g. "timeouts.handshake"
    let mut current = &value;
    for part in key.split('.') {
        match current.as_table().and_then(|t| t.get(part)) {
            Some(v) => current = v,
            None => anyhow::bail!("Key not found: {}", key),
        }
    }

    match current {
        toml::Value::String(s) => println!("{}", s),
        toml::Value::Table(_) => println!("{}", toml::to_string_pretty(current)?),
        other => println!("{}", other),
    }
    Ok(())
}

/// Write a default configuration file
pub fn config_init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        print_error(&format!("Config file already exists: {}", path.display()));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    config::save_config(path, &ResolverConfig::default())
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    print_success(&format!("Created configuration file: {}", path.display()));
    Ok(())
}
