//! Operation catalog configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where service definitions come from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CatalogSource {
    /// The catalog document compiled into the binary.
    #[default]
    Builtin,
    /// A YAML or JSON catalog document on disk.
    Document { path: PathBuf },
    /// A directory of provider service models (`<service>/service-2.json`).
    ServiceModels { dir: PathBuf },
}

/// Catalog settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub source: CatalogSource,

    /// Seconds a loaded service definition stays cached. Unset keeps it for
    /// the life of the process.
    #[serde(default)]
    pub refresh_secs: Option<u64>,
}
