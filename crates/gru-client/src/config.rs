use std::path::Path;

use anyhow::Context;
use gru_core::SessionConfig;

use crate::cli::Cli;

/// Read a TOML settings file. Missing keys keep their defaults.
pub fn load_config_file(path: &Path) -> anyhow::Result<SessionConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    SessionConfig::from_toml_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

/// Defaults, then the config file, then CLI flags.
pub fn resolve_config(cli: &Cli) -> anyhow::Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => SessionConfig::default(),
    };
    cli.apply_overrides(&mut config);
    config.validate().context("invalid session settings")?;
    Ok(config)
}
