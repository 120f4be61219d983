//! Catalog backed by provider service models on disk.
//!
//! The directory layout follows the provider SDK data directories:
//!
//! ```text
//! <dir>/ec2/service-2.json
//! <dir>/ec2/paginators-1.json            (optional)
//! <dir>/s3/2006-03-01/service-2.json     (versioned layout, newest wins)
//! ```
//!
//! Only what validation needs is read: operation names, the input shape's
//! `required` list and member types, `idempotencyToken` members and the
//! paginator tokens. Nothing is cached here; wrap the catalog in a
//! [`CachedCatalog`](super::CachedCatalog).

use super::{
    CatalogError, OperationCatalog, OperationDescription, PaginationSpec, ParamSpec, ParamType,
    ServiceDefinition,
};
use crate::request::to_snake_case;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const SERVICE_FILE: &str = "service-2.json";
const PAGINATORS_FILE: &str = "paginators-1.json";

/// Reads `service-2.json` models from a directory.
#[derive(Debug, Clone)]
pub struct ServiceModelCatalog {
    root: PathBuf,
}

impl ServiceModelCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory that holds the model files for a service, if any.
    fn model_dir(&self, service: &str) -> Result<Option<PathBuf>, CatalogError> {
        let service_dir = self.root.join(service);
        if service_dir.join(SERVICE_FILE).is_file() {
            return Ok(Some(service_dir));
        }
        if !service_dir.is_dir() {
            return Ok(None);
        }

        let entries = std::fs::read_dir(&service_dir).map_err(|source| CatalogError::Io {
            path: service_dir.clone(),
            source,
        })?;
        let mut versions: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.join(SERVICE_FILE).is_file())
            .collect();
        versions.sort();
        Ok(versions.pop())
    }
}

fn read_json(path: &Path) -> Result<Value, CatalogError> {
    let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|e| CatalogError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Resolve a shape name to a parameter type.
fn shape_type(shapes: &Value, shape_name: &str, depth: usize) -> ParamType {
    let Some(shape) = shapes.get(shape_name) else {
        return ParamType::Any;
    };
    match shape.get("type").and_then(Value::as_str).unwrap_or_default() {
        "list" if depth < 8 => {
            let member = shape
                .pointer("/member/shape")
                .and_then(Value::as_str)
                .map(|m| shape_type(shapes, m, depth + 1))
                .unwrap_or(ParamType::Any);
            ParamType::List(Box::new(member))
        }
        other => other.parse().unwrap_or(ParamType::Any),
    }
}

/// First string of a field that may be a string or an array of strings.
fn first_token(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn parse_model(
    service: &str,
    model: &Value,
    paginators: Option<&Value>,
) -> ServiceDefinition {
    let shapes = model.get("shapes").cloned().unwrap_or(Value::Null);
    let mut operations = BTreeMap::new();

    let Some(ops) = model.get("operations").and_then(Value::as_object) else {
        return ServiceDefinition {
            name: service.to_string(),
            operations,
        };
    };

    for (api_name, op) in ops {
        let input = op
            .pointer("/input/shape")
            .and_then(Value::as_str)
            .and_then(|name| shapes.get(name));

        let required: Vec<String> = input
            .and_then(|shape| shape.get("required"))
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut required_specs = Vec::new();
        let mut optional_specs = Vec::new();
        let mut has_idempotency_token = false;

        if let Some(members) = input
            .and_then(|shape| shape.get("members"))
            .and_then(Value::as_object)
        {
            for (member_name, member) in members {
                if member.get("idempotencyToken").and_then(Value::as_bool) == Some(true) {
                    has_idempotency_token = true;
                }
                let param_type = member
                    .get("shape")
                    .and_then(Value::as_str)
                    .map(|s| shape_type(&shapes, s, 0))
                    .unwrap_or(ParamType::Any);
                let spec = ParamSpec {
                    name: member_name.clone(),
                    param_type,
                    default: None,
                };
                if required.contains(member_name) {
                    required_specs.push(spec);
                } else {
                    optional_specs.push(spec);
                }
            }
        }

        let pagination = paginators
            .and_then(|p| p.pointer(&format!("/pagination/{}", api_name)))
            .and_then(|p| {
                Some(PaginationSpec {
                    input_token: first_token(p.get("input_token"))?,
                    output_token: first_token(p.get("output_token"))?,
                    result_key: first_token(p.get("result_key")),
                })
            });

        let operation = to_snake_case(api_name);
        operations.insert(
            operation.clone(),
            OperationDescription {
                service: service.to_string(),
                operation,
                exists: true,
                required: required_specs,
                optional: optional_specs,
                idempotent: has_idempotency_token
                    || op.get("idempotent").and_then(Value::as_bool) == Some(true),
                pagination,
            },
        );
    }

    ServiceDefinition {
        name: service.to_string(),
        operations,
    }
}

impl OperationCatalog for ServiceModelCatalog {
    fn load_service(&self, service: &str) -> Result<Option<Arc<ServiceDefinition>>, CatalogError> {
        let Some(dir) = self.model_dir(service)? else {
            tracing::debug!(service, "No service model found");
            return Ok(None);
        };

        let model = read_json(&dir.join(SERVICE_FILE))?;
        let paginators_path = dir.join(PAGINATORS_FILE);
        let paginators = if paginators_path.is_file() {
            Some(read_json(&paginators_path)?)
        } else {
            None
        };

        let definition = parse_model(service, &model, paginators.as_ref());
        tracing::debug!(
            service,
            operations = definition.operations.len(),
            "Loaded service model"
        );
        Ok(Some(Arc::new(definition)))
    }

    fn list_services(&self) -> Result<Vec<String>, CatalogError> {
        let entries = std::fs::read_dir(&self.root).map_err(|source| CatalogError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut services: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
            .collect();
        services.sort();
        Ok(services)
    }
}
