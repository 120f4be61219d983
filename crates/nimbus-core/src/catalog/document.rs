//! Catalog backed by a single YAML or JSON document.
//!
//! ```yaml
//! services:
//!   ec2:
//!     operations:
//!       describe_instances:
//!         optional:
//!           InstanceIds: list<string>
//!           MaxResults: { type: integer, default: 100 }
//!         pagination: { input_token: NextToken, output_token: NextToken, result_key: Reservations }
//!       terminate_instances:
//!         required:
//!           InstanceIds: list<string>
//!         idempotent: true
//! ```

use super::{
    CatalogError, OperationCatalog, OperationDescription, PaginationSpec, ParamSpec, ParamType,
    ServiceDefinition,
};
use crate::request::to_snake_case;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

const BUILTIN_CATALOG: &str = include_str!("../../assets/catalog.yaml");

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    services: BTreeMap<String, ServiceDocument>,
}

#[derive(Debug, Deserialize)]
struct ServiceDocument {
    #[serde(default)]
    operations: BTreeMap<String, OperationDocument>,
}

#[derive(Debug, Default, Deserialize)]
struct OperationDocument {
    #[serde(default)]
    required: BTreeMap<String, ParamDecl>,
    #[serde(default)]
    optional: BTreeMap<String, ParamDecl>,
    #[serde(default)]
    idempotent: bool,
    #[serde(default)]
    pagination: Option<PaginationSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ParamDecl {
    Short(ParamType),
    Full {
        #[serde(rename = "type")]
        param_type: ParamType,
        #[serde(default)]
        default: Option<Value>,
    },
}

impl ParamDecl {
    fn into_spec(self, name: String) -> ParamSpec {
        match self {
            ParamDecl::Short(param_type) => ParamSpec {
                name,
                param_type,
                default: None,
            },
            ParamDecl::Full {
                param_type,
                default,
            } => ParamSpec {
                name,
                param_type,
                default,
            },
        }
    }
}

/// In-memory catalog parsed from a document.
#[derive(Debug, Clone, Default)]
pub struct DocumentCatalog {
    services: BTreeMap<String, Arc<ServiceDefinition>>,
}

impl DocumentCatalog {
    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self, CatalogError> {
        Self::from_yaml_str(BUILTIN_CATALOG, Path::new("<builtin catalog>"))
    }

    /// Load a `.yaml`, `.yml` or `.json` document.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        // YAML is a superset of JSON, one parser covers both.
        Self::from_yaml_str(&text, path)
    }

    /// Parse a catalog document. `origin` is only used in error messages.
    pub fn from_yaml_str(text: &str, origin: &Path) -> Result<Self, CatalogError> {
        let document: CatalogDocument =
            serde_yaml::from_str(text).map_err(|e| CatalogError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?;

        let services = document
            .services
            .into_iter()
            .map(|(name, service)| {
                let name = name.to_ascii_lowercase();
                let definition = build_service(&name, service);
                (name, Arc::new(definition))
            })
            .collect();

        Ok(Self { services })
    }

    /// Number of services in the document.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

fn build_service(name: &str, service: ServiceDocument) -> ServiceDefinition {
    let operations = service
        .operations
        .into_iter()
        .map(|(op_name, op)| {
            let op_name = to_snake_case(&op_name);
            let description = OperationDescription {
                service: name.to_string(),
                operation: op_name.clone(),
                exists: true,
                required: op
                    .required
                    .into_iter()
                    .map(|(n, decl)| decl.into_spec(n))
                    .collect(),
                optional: op
                    .optional
                    .into_iter()
                    .map(|(n, decl)| decl.into_spec(n))
                    .collect(),
                idempotent: op.idempotent,
                pagination: op.pagination,
            };
            (op_name, description)
        })
        .collect();

    ServiceDefinition {
        name: name.to_string(),
        operations,
    }
}

impl OperationCatalog for DocumentCatalog {
    fn load_service(&self, service: &str) -> Result<Option<Arc<ServiceDefinition>>, CatalogError> {
        Ok(self.services.get(service).cloned())
    }

    fn list_services(&self) -> Result<Vec<String>, CatalogError> {
        Ok(self.services.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DOC: &str = r#"
services:
  EC2:
    operations:
      DescribeInstances:
        optional:
          InstanceIds: list<string>
          MaxResults: { type: integer, default: 100 }
        pagination: { input_token: NextToken, output_token: NextToken, result_key: Reservations }
      terminate_instances:
        required:
          InstanceIds: list<string>
        idempotent: true
"#;

    #[test]
    fn test_parse_document() {
        let catalog = DocumentCatalog::from_yaml_str(DOC, Path::new("test")).unwrap();
        assert_eq!(catalog.list_services().unwrap(), vec!["ec2".to_string()]);

        let describe = catalog.describe_operation("ec2", "DescribeInstances").unwrap();
        assert!(describe.exists);
        assert!(describe.required.is_empty());
        assert_eq!(
            describe.param("MaxResults").and_then(|p| p.default.clone()),
            Some(serde_json::json!(100))
        );
        assert_eq!(
            describe.pagination.as_ref().map(|p| p.input_token.as_str()),
            Some("NextToken")
        );

        let terminate = catalog.describe_operation("EC2", "terminate_instances").unwrap();
        assert!(terminate.idempotent);
        assert!(terminate.is_required("InstanceIds"));
    }

    #[test]
    fn test_bad_type_is_reported() {
        let doc = "services:\n  s3:\n    operations:\n      list_buckets:\n        optional:\n          X: quaternion\n";
        let result = DocumentCatalog::from_yaml_str(doc, Path::new("bad.yaml"));
        assert!(matches!(result, Err(CatalogError::Parse { .. })));
    }

    #[test]
    fn test_from_json_file() {
        let json = r#"{"services": {"sqs": {"operations": {"list_queues": {"optional": {"QueueNamePrefix": "string"}}}}}}"#;
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let catalog = DocumentCatalog::from_file(file.path()).unwrap();
        assert_eq!(catalog.list_operations("sqs").unwrap(), vec!["list_queues"]);
    }

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = DocumentCatalog::builtin().unwrap();
        assert!(!catalog.is_empty());
        let delete_bucket = catalog.describe_operation("s3", "delete_bucket").unwrap();
        assert!(delete_bucket.is_required("Bucket"));
    }
}
