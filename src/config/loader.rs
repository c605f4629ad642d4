use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::{models::ServerConfig, validation::ServerConfigValidator};

/// Prefix of environment variables overriding file values, e.g.
/// `SLUICE_FILTERS__EXCESSIVE_EXEC_TIME_MS=250`.
pub const ENV_PREFIX: &str = "SLUICE";

/// Load and validate configuration from a file.
pub fn load_config(config_path: &str) -> Result<ServerConfig> {
    let config = load_config_unchecked(config_path)?;
    ServerConfigValidator::validate(&config)
        .with_context(|| format!("Invalid configuration in {config_path}"))?;
    Ok(config)
}

/// Load configuration without validation (used by the validate command).
/// Supports TOML, YAML, JSON and INI, chosen by file extension.
pub fn load_config_unchecked(config_path: &str) -> Result<ServerConfig> {
    let path = Path::new(config_path);

    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            path.to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", path.display()))?,
            format,
        ))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .with_context(|| format!("Failed to build config from {}", path.display()))?;

    settings
        .try_deserialize::<ServerConfig>()
        .with_context(|| format!("Failed to deserialize config from {}", path.display()))
}
