//! Operation catalog adapter.
//!
//! The catalog answers, per `(service, operation)`: does it exist, which
//! parameters are required or optional and with which types, is it
//! idempotent, and how does it paginate. It is read-only and may be cached
//! for the life of the process.
//!
//! Backends:
//!
//! | Backend | Source |
//! |---------|--------|
//! | [`DocumentCatalog`] | A YAML/JSON catalog document (the built-in one, or a file) |
//! | [`ServiceModelCatalog`] | A directory of provider service models (`service-2.json`) |
//! | [`CachedCatalog`] | Wraps another backend with a per-service TTL cache |

mod cache;
mod document;
mod service_model;

pub use cache::CachedCatalog;
pub use document::DocumentCatalog;
pub use service_model::ServiceModelCatalog;

use crate::config::{CatalogConfig, CatalogSource};
use crate::request::to_snake_case;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading service definitions.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog source {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse catalog source {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("invalid parameter type '{0}'")]
    InvalidType(String),
}

/// Declared type of an operation parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Long,
    Float,
    Double,
    Boolean,
    Timestamp,
    Blob,
    List(Box<ParamType>),
    Map,
    Structure,
    /// No constraint (used when a model does not say).
    Any,
}

impl ParamType {
    /// Type name as it appears in catalog documents.
    pub fn name(&self) -> String {
        match self {
            ParamType::String => "string".into(),
            ParamType::Integer => "integer".into(),
            ParamType::Long => "long".into(),
            ParamType::Float => "float".into(),
            ParamType::Double => "double".into(),
            ParamType::Boolean => "boolean".into(),
            ParamType::Timestamp => "timestamp".into(),
            ParamType::Blob => "blob".into(),
            ParamType::List(inner) => format!("list<{}>", inner.name()),
            ParamType::Map => "map".into(),
            ParamType::Structure => "structure".into(),
            ParamType::Any => "any".into(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl FromStr for ParamType {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if let Some(inner) = s.strip_prefix("list<").and_then(|rest| rest.strip_suffix('>')) {
            return Ok(ParamType::List(Box::new(inner.parse()?)));
        }
        match s.as_str() {
            "string" | "character" => Ok(ParamType::String),
            "integer" => Ok(ParamType::Integer),
            "long" => Ok(ParamType::Long),
            "float" => Ok(ParamType::Float),
            "double" => Ok(ParamType::Double),
            "boolean" => Ok(ParamType::Boolean),
            "timestamp" => Ok(ParamType::Timestamp),
            "blob" => Ok(ParamType::Blob),
            "list" => Ok(ParamType::List(Box::new(ParamType::Any))),
            "map" => Ok(ParamType::Map),
            "structure" => Ok(ParamType::Structure),
            "any" => Ok(ParamType::Any),
            _ => Err(CatalogError::InvalidType(s)),
        }
    }
}

impl Serialize for ParamType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for ParamType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    /// Value filled in by the validator when the caller omits the parameter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// How a paginated read passes its continuation cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationSpec {
    /// Request parameter carrying the cursor.
    pub input_token: String,
    /// Response field carrying the next cursor.
    pub output_token: String,
    /// Response field holding the page's items, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
}

/// Everything the catalog knows about one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDescription {
    pub service: String,
    pub operation: String,
    pub exists: bool,
    #[serde(default)]
    pub required: Vec<ParamSpec>,
    #[serde(default)]
    pub optional: Vec<ParamSpec>,
    #[serde(default)]
    pub idempotent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationSpec>,
}

impl OperationDescription {
    /// Description for an operation the catalog does not know.
    pub fn missing(service: &str, operation: &str) -> Self {
        Self {
            service: service.to_string(),
            operation: operation.to_string(),
            exists: false,
            required: Vec::new(),
            optional: Vec::new(),
            idempotent: false,
            pagination: None,
        }
    }

    /// Look up a declared parameter by name.
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.required
            .iter()
            .chain(self.optional.iter())
            .find(|p| p.name == name)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|p| p.name == name)
    }

    /// Declared type of every parameter.
    pub fn param_types(&self) -> BTreeMap<&str, &ParamType> {
        self.required
            .iter()
            .chain(self.optional.iter())
            .map(|p| (p.name.as_str(), &p.param_type))
            .collect()
    }
}

/// All operations of one service.
#[derive(Debug, Clone, Default)]
pub struct ServiceDefinition {
    pub name: String,
    pub operations: BTreeMap<String, OperationDescription>,
}

/// Read-only access to service definitions.
pub trait OperationCatalog: Send + Sync {
    /// Load one service. `Ok(None)` means the service is unknown.
    fn load_service(&self, service: &str) -> Result<Option<Arc<ServiceDefinition>>, CatalogError>;

    /// Names of every known service.
    fn list_services(&self) -> Result<Vec<String>, CatalogError>;

    /// Describe one operation. Unknown services and operations yield `exists: false`.
    fn describe_operation(
        &self,
        service: &str,
        operation: &str,
    ) -> Result<OperationDescription, CatalogError> {
        let service = service.to_ascii_lowercase();
        let operation = to_snake_case(operation);
        let described = self
            .load_service(&service)?
            .and_then(|def| def.operations.get(&operation).cloned());
        Ok(described.unwrap_or_else(|| OperationDescription::missing(&service, &operation)))
    }

    /// Operation names of a service, sorted. Unknown services yield an empty list.
    fn list_operations(&self, service: &str) -> Result<Vec<String>, CatalogError> {
        Ok(self
            .load_service(&service.to_ascii_lowercase())?
            .map(|def| def.operations.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// Operations of `service` that look like what the caller meant.
pub fn similar_operations(
    catalog: &dyn OperationCatalog,
    service: &str,
    operation: &str,
) -> Vec<String> {
    let wanted = to_snake_case(operation);
    let (verb, noun) = wanted.split_once('_').unwrap_or((wanted.as_str(), ""));
    let Ok(operations) = catalog.list_operations(service) else {
        return Vec::new();
    };
    operations
        .into_iter()
        .filter(|candidate| {
            (!noun.is_empty() && candidate.contains(noun))
                || (candidate.starts_with(verb) && !verb.is_empty())
        })
        .take(3)
        .collect()
}

/// Build the catalog named by the configuration.
pub fn from_config(config: &CatalogConfig) -> Result<Arc<dyn OperationCatalog>, CatalogError> {
    let ttl = config.refresh_secs.map(Duration::from_secs);
    let catalog: Arc<dyn OperationCatalog> = match &config.source {
        CatalogSource::Builtin => Arc::new(DocumentCatalog::builtin()?),
        CatalogSource::Document { path } => Arc::new(DocumentCatalog::from_file(path)?),
        CatalogSource::ServiceModels { dir } => {
            Arc::new(CachedCatalog::new(ServiceModelCatalog::new(dir), ttl))
        }
    };
    tracing::info!(source = ?config.source, "Operation catalog ready");
    Ok(catalog)
}
