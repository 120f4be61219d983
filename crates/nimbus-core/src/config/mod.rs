//! Configuration types for Nimbus.
//!
//! Configuration is loaded from a single YAML file (`nimbus.yaml` by default)
//! and then adjusted by environment variables. Every section and field has a
//! default, so an empty file, or no file at all, yields a working setup that
//! starts in read-only mode.
//!
//! # Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `NIMBUS_SAFETY_MODE` | `safety.default_mode` |
//! | `NIMBUS_DEFAULT_REGION` (or `AWS_DEFAULT_REGION`) | `execution.default_region` |
//! | `NIMBUS_MAX_PAGES` | `execution.max_pages` |

pub mod audit;
pub mod catalog;
pub mod execution;
pub mod graph;
pub mod mcp;
pub mod safety;

use crate::error::ConfigError;
use crate::request::SafetyMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use audit::AuditConfig;
pub use catalog::{CatalogConfig, CatalogSource};
pub use execution::ExecutionConfig;
pub use graph::GraphConfig;
pub use mcp::{McpConfig, Transport};
pub use safety::SafetyConfig;

/// Complete Nimbus configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NimbusConfig {
    /// Safety policy settings.
    #[serde(default)]
    pub safety: SafetyConfig,

    /// Execution, pagination and retry settings.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Dependency graph settings.
    #[serde(default)]
    pub graph: GraphConfig,

    /// Operation catalog source.
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// MCP server settings.
    #[serde(default)]
    pub mcp: McpConfig,

    /// Audit settings.
    #[serde(default)]
    pub audit: AuditConfig,
}

impl NimbusConfig {
    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text)
    }

    /// Load a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional file, then apply process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup function.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("NIMBUS_SAFETY_MODE") {
            self.safety.default_mode =
                mode.parse::<SafetyMode>()
                    .map_err(|e| ConfigError::InvalidValue {
                        field: "NIMBUS_SAFETY_MODE".to_string(),
                        reason: e.to_string(),
                    })?;
        }

        if let Some(region) = lookup("NIMBUS_DEFAULT_REGION").or_else(|| lookup("AWS_DEFAULT_REGION"))
        {
            self.execution.default_region = region;
        }

        if let Some(pages) = lookup("NIMBUS_MAX_PAGES") {
            self.execution.max_pages =
                pages
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| ConfigError::InvalidValue {
                        field: "NIMBUS_MAX_PAGES".to_string(),
                        reason: format!("'{}' is not a positive integer", pages),
                    })?;
        }

        self.validate()
    }

    /// Reject values that would make the runtime misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("execution.max_pages", self.execution.max_pages),
            ("execution.max_attempts", self.execution.max_attempts as usize),
            ("execution.worker_pool_size", self.execution.worker_pool_size),
            (
                "execution.per_service_concurrency",
                self.execution.per_service_concurrency,
            ),
            ("graph.max_fan_out", self.graph.max_fan_out),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.execution.base_delay_ms > self.execution.max_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "execution.base_delay_ms".to_string(),
                reason: "must not exceed execution.max_delay_ms".to_string(),
            });
        }
        Ok(())
    }
}

pub(crate) fn default_true() -> bool {
    true
}
