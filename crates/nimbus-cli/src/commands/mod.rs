//! CLI command implementations.

pub mod catalog;
pub mod check;
pub mod classify;
pub mod serve;

use anyhow::{Context, Result};
use nimbus_core::NimbusConfig;
use std::path::Path;

/// Load the configuration file (if any) and apply environment overrides.
pub fn load_config(path: Option<&Path>) -> Result<NimbusConfig> {
    let config = NimbusConfig::load(path).with_context(|| match path {
        Some(path) => format!("Failed to load configuration from {}", path.display()),
        None => "Failed to apply environment overrides to the default configuration".to_string(),
    })?;
    tracing::debug!(config = ?path, mode = %config.safety.default_mode, "Configuration loaded");
    Ok(config)
}
