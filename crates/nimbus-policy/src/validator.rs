//! Request validation against the operation catalog.
//!
//! The [`Validator`] checks a request before it touches the network:
//!
//! 1. **Existence** - the operation must be in the catalog
//! 2. **Required parameters** - every required parameter present and non-null
//! 3. **Types** - every declared parameter coercible to its type
//! 4. **Identifiers** - well-known identifier parameters have the right shape
//! 5. **Bulk limit** - resource lists stay under the configured maximum
//!
//! Every problem is collected; the result lists all of them. On success the
//! normalized request carries coerced values and filled-in defaults. Unknown
//! parameters are kept and reported as warnings.

use crate::coerce::coerce;
use crate::error::{ValidationError, ValidationErrorKind};
use nimbus_core::catalog::similar_operations;
use nimbus_core::{OperationCatalog, OperationRequest, Parameters};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Parameters holding lists of resources subject to the bulk limit.
const BULK_PARAMETERS: &[&str] = &["InstanceIds", "ResourceIds", "ResourceArns", "FunctionNames"];

/// Identifier parameters and the shape their values must have.
const IDENTIFIER_PATTERNS: &[(&str, &str, &str)] = &[
    ("InstanceId", r"^i-[0-9a-f]{8,17}$", "instance id"),
    ("InstanceIds", r"^i-[0-9a-f]{8,17}$", "instance id"),
    ("GroupId", r"^sg-[0-9a-f]{8,17}$", "security group id"),
    ("GroupIds", r"^sg-[0-9a-f]{8,17}$", "security group id"),
    ("SubnetId", r"^subnet-[0-9a-f]{8,17}$", "subnet id"),
    ("VpcId", r"^vpc-[0-9a-f]{8,17}$", "VPC id"),
    ("Bucket", r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$", "bucket name"),
];

/// Validation verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationStatus {
    Accepted,
    Rejected,
}

/// Outcome of validating one request.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub status: ValidationStatus,
    /// Present when accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_request: Option<OperationRequest>,
    pub errors: Vec<ValidationError>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Whether the catalog marks the operation idempotent.
    pub idempotent: bool,
}

impl ValidationResult {
    fn rejected(errors: Vec<ValidationError>, warnings: Vec<String>) -> Self {
        Self {
            status: ValidationStatus::Rejected,
            normalized_request: None,
            errors,
            warnings,
            idempotent: false,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == ValidationStatus::Accepted
    }

    /// Error kinds, in the order they were found.
    pub fn error_kinds(&self) -> Vec<ValidationErrorKind> {
        self.errors.iter().map(|e| e.kind).collect()
    }
}

/// Validates requests against an operation catalog.
pub struct Validator {
    catalog: Arc<dyn OperationCatalog>,
    max_resources: usize,
    patterns: Vec<(&'static str, Regex, &'static str)>,
}

impl Validator {
    /// Create a validator with a bulk limit of `max_resources` per request.
    pub fn new(catalog: Arc<dyn OperationCatalog>, max_resources: usize) -> Self {
        let patterns = IDENTIFIER_PATTERNS
            .iter()
            .filter_map(|(name, pattern, what)| {
                Regex::new(pattern).ok().map(|re| (*name, re, *what))
            })
            .collect();
        Self {
            catalog,
            max_resources,
            patterns,
        }
    }

    pub fn catalog(&self) -> &Arc<dyn OperationCatalog> {
        &self.catalog
    }

    /// Validate a request. Never touches the account.
    pub fn validate(&self, request: &OperationRequest) -> ValidationResult {
        let service = request.service();
        let operation = request.operation();

        let description = match self.catalog.describe_operation(service, operation) {
            Ok(description) => description,
            Err(e) => {
                return ValidationResult::rejected(
                    vec![ValidationError::catalog_unavailable(service, &e.to_string())],
                    Vec::new(),
                );
            }
        };

        if !description.exists {
            let similar = similar_operations(self.catalog.as_ref(), service, operation);
            return ValidationResult::rejected(
                vec![ValidationError::unknown_operation(service, operation, &similar)],
                Vec::new(),
            );
        }

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut normalized = Parameters::new();

        // Required parameters first so they lead the error list.
        for spec in &description.required {
            match request.parameters().get(&spec.name) {
                None | Some(Value::Null) => match &spec.default {
                    Some(default) => {
                        normalized.insert(spec.name.clone(), default.clone());
                    }
                    None => errors.push(ValidationError::missing_parameter(&spec.name)),
                },
                Some(_) => {}
            }
        }

        for (name, value) in request.parameters() {
            let Some(spec) = description.param(name) else {
                warnings.push(format!(
                    "Parameter '{}' is not declared for {}; passing it through unchanged",
                    name,
                    request.qualified_name()
                ));
                normalized.insert(name.clone(), value.clone());
                continue;
            };

            if value.is_null() {
                if !description.is_required(name) {
                    warnings.push(format!("Parameter '{}' is null and was dropped", name));
                }
                continue;
            }

            match coerce(value, &spec.param_type) {
                Ok(coerced) => {
                    normalized.insert(name.clone(), coerced);
                }
                Err(mismatch) => errors.push(ValidationError::type_mismatch(
                    &format!("{}{}", name, mismatch.path),
                    &mismatch.expected,
                    &mismatch.found,
                )),
            }
        }

        for spec in &description.optional {
            if let Some(default) = &spec.default
                && !normalized.contains_key(&spec.name)
            {
                normalized.insert(spec.name.clone(), default.clone());
            }
        }

        self.check_identifiers(&normalized, &mut errors);
        self.check_bulk_limit(&normalized, &mut errors);

        if !errors.is_empty() {
            tracing::debug!(
                operation = %request.qualified_name(),
                errors = errors.len(),
                "Request rejected by validation"
            );
            return ValidationResult::rejected(errors, warnings);
        }

        ValidationResult {
            status: ValidationStatus::Accepted,
            normalized_request: Some(request.with_parameters(normalized)),
            errors,
            warnings,
            idempotent: description.idempotent,
        }
    }

    fn check_identifiers(&self, params: &Parameters, errors: &mut Vec<ValidationError>) {
        for (name, regex, what) in &self.patterns {
            let values: Vec<&str> = match params.get(*name) {
                Some(Value::String(s)) => vec![s.as_str()],
                Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
                _ => continue,
            };
            for value in values {
                if !regex.is_match(value) {
                    errors.push(ValidationError::pattern_mismatch(name, value, what));
                }
            }
        }
    }

    fn check_bulk_limit(&self, params: &Parameters, errors: &mut Vec<ValidationError>) {
        let mut lists: Vec<(String, usize)> = BULK_PARAMETERS
            .iter()
            .filter_map(|name| {
                params
                    .get(*name)
                    .and_then(Value::as_array)
                    .map(|items| (name.to_string(), items.len()))
            })
            .collect();

        if let Some(objects) = params
            .get("Delete")
            .and_then(|d| d.get("Objects"))
            .and_then(Value::as_array)
        {
            lists.push(("Delete.Objects".to_string(), objects.len()));
        }

        for (name, count) in lists {
            if count > self.max_resources {
                errors.push(ValidationError::bulk_limit_exceeded(
                    &name,
                    count,
                    self.max_resources,
                ));
            }
        }
    }
}
