//! Execution, pagination and retry configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Settings for the execution orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Region used when a request does not name one.
    #[serde(default = "default_region")]
    pub default_region: String,

    /// Maximum pages fetched for one paginated read before returning PARTIAL.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Maximum items merged across pages before returning PARTIAL.
    #[serde(default = "default_max_items")]
    pub max_items: usize,

    /// Attempts per call, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First backoff step in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Retry network failures only for reads and idempotent operations.
    /// Off by default: every network failure is retried up to the cap.
    #[serde(default)]
    pub idempotent_network_retries_only: bool,

    /// Outbound calls in flight per session.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Outbound calls in flight per target service.
    #[serde(default = "default_per_service_concurrency")]
    pub per_service_concurrency: usize,

    /// Per-service overrides of `per_service_concurrency`.
    #[serde(default)]
    pub service_concurrency: HashMap<String, usize>,

    /// Hard timeout for one investigation (discovery or graph build), in seconds.
    #[serde(default = "default_investigation_timeout_secs")]
    pub investigation_timeout_secs: u64,
}

impl ExecutionConfig {
    /// Concurrency ceiling for a target service.
    pub fn concurrency_for(&self, service: &str) -> usize {
        self.service_concurrency
            .get(service)
            .copied()
            .filter(|n| *n > 0)
            .unwrap_or(self.per_service_concurrency)
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_region: default_region(),
            max_pages: default_max_pages(),
            max_items: default_max_items(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            idempotent_network_retries_only: false,
            worker_pool_size: default_worker_pool_size(),
            per_service_concurrency: default_per_service_concurrency(),
            service_concurrency: HashMap::new(),
            investigation_timeout_secs: default_investigation_timeout_secs(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_pages() -> usize {
    100
}

fn default_max_items() -> usize {
    1000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    20_000
}

fn default_worker_pool_size() -> usize {
    16
}

fn default_per_service_concurrency() -> usize {
    4
}

fn default_investigation_timeout_secs() -> u64 {
    120
}
