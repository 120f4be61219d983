//! Safety policy configuration.

use crate::request::{OperationType, SafetyMode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Settings for the safety policy engine and validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Mode every new session starts in.
    #[serde(default)]
    pub default_mode: SafetyMode,

    /// Lifetime of a confirmation token, in seconds.
    #[serde(default = "default_confirmation_ttl_secs")]
    pub confirmation_ttl_secs: u64,

    /// Upper bound on resources a single bulk request may name.
    #[serde(default = "default_max_resources")]
    pub max_resources_per_operation: usize,

    /// Inject the provider's `DryRun` flag when a dry run is requested and supported.
    #[serde(default = "super::default_true")]
    pub dry_run_when_available: bool,

    /// Additional `service.operation` entries appended to the built-in denylist.
    #[serde(default)]
    pub extra_denied: Vec<String>,

    /// Additional classifier overrides keyed by `service.operation`.
    #[serde(default)]
    pub classification_overrides: HashMap<String, OperationType>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            default_mode: SafetyMode::default(),
            confirmation_ttl_secs: default_confirmation_ttl_secs(),
            max_resources_per_operation: default_max_resources(),
            dry_run_when_available: true,
            extra_denied: Vec::new(),
            classification_overrides: HashMap::new(),
        }
    }
}

fn default_confirmation_ttl_secs() -> u64 {
    15 * 60
}

fn default_max_resources() -> usize {
    50
}
