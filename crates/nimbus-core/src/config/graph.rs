//! Dependency graph configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings for the dependency graph builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Default traversal depth when the caller does not pass one.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Candidate neighbours considered per node before marking it truncated.
    #[serde(default = "default_max_fan_out")]
    pub max_fan_out: usize,

    /// Relationship rules file replacing the built-in table.
    #[serde(default)]
    pub rules_file: Option<PathBuf>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_fan_out: default_max_fan_out(),
            rules_file: None,
        }
    }
}

fn default_max_depth() -> usize {
    3
}

fn default_max_fan_out() -> usize {
    25
}
