//! Audit configuration.

use serde::{Deserialize, Serialize};

/// Configuration for pipeline audit events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether audit events are emitted.
    #[serde(default = "super::default_true")]
    pub enabled: bool,

    /// Whether request parameters are copied into audit events
    /// (they may contain sensitive values).
    #[serde(default)]
    pub include_parameters: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            include_parameters: false,
        }
    }
}
