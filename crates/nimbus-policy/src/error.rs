//! Error types for policy enforcement and validation.
//!
//! Validation problems are values, not early returns: the validator collects
//! every [`ValidationError`] for a request and hands them back together.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One field-level validation problem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// The kind of validation error.
    pub kind: ValidationErrorKind,
    /// Parameter the problem is about, when there is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Human-readable error message.
    pub message: String,
}

impl ValidationError {
    /// Create a new validation error.
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            field: None,
            message: message.into(),
        }
    }

    /// Attach the parameter name.
    pub fn on_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    // =========================================================================
    // OPERATION ERRORS
    // =========================================================================

    /// The catalog does not know the operation.
    pub fn unknown_operation(service: &str, operation: &str, similar: &[String]) -> Self {
        let mut message = format!("Operation '{}.{}' does not exist", service, operation);
        if !similar.is_empty() {
            message.push_str(&format!(". Did you mean: {}?", similar.join(", ")));
        }
        Self::new(ValidationErrorKind::UnknownOperation, message)
    }

    /// The catalog could not be consulted.
    pub fn catalog_unavailable(service: &str, reason: &str) -> Self {
        Self::new(
            ValidationErrorKind::CatalogUnavailable,
            format!("Service definition for '{}' could not be loaded: {}", service, reason),
        )
    }

    // =========================================================================
    // PARAMETER ERRORS
    // =========================================================================

    /// A required parameter is absent (or null).
    pub fn missing_parameter(name: &str) -> Self {
        Self::new(
            ValidationErrorKind::MissingParameter,
            format!("Required parameter '{}' is missing", name),
        )
        .on_field(name)
    }

    /// A value cannot be coerced to the declared type.
    pub fn type_mismatch(name: &str, expected: &str, found: &str) -> Self {
        Self::new(
            ValidationErrorKind::TypeMismatch,
            format!(
                "Parameter '{}' expects {} but got {}",
                name, expected, found
            ),
        )
        .on_field(name)
    }

    /// A value does not look like the identifier it should be.
    pub fn pattern_mismatch(name: &str, value: &str, what: &str) -> Self {
        Self::new(
            ValidationErrorKind::PatternMismatch,
            format!("Parameter '{}' value '{}' is not a valid {}", name, value, what),
        )
        .on_field(name)
    }

    /// A bulk request names too many resources.
    pub fn bulk_limit_exceeded(name: &str, count: usize, max: usize) -> Self {
        Self::new(
            ValidationErrorKind::BulkLimitExceeded,
            format!(
                "Parameter '{}' names {} resources, more than the limit of {} per operation",
                name, count, max
            ),
        )
        .on_field(name)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Categories of validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// The operation is not in the catalog.
    UnknownOperation,
    /// The catalog backend failed.
    CatalogUnavailable,
    /// A required parameter is missing.
    MissingParameter,
    /// A value cannot be coerced to its declared type.
    TypeMismatch,
    /// An identifier parameter has the wrong shape.
    PatternMismatch,
    /// Too many resources in one request.
    BulkLimitExceeded,
}

/// Reasons a confirmation token is not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ConfirmationError {
    #[error("confirmation token '{token}' is unknown")]
    NotFound { token: String },

    #[error("confirmation token '{token}' has expired")]
    Expired { token: String },

    #[error("confirmation token '{token}' was already used")]
    AlreadyUsed { token: String },

    #[error("confirmation token '{token}' was issued for {confirmed}, not for this request")]
    Mismatch { token: String, confirmed: String },
}

/// Errors raised while loading the static policy tables.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("invalid {what} table: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid entry '{entry}' in {what}: expected service.operation")]
    InvalidEntry { what: &'static str, entry: String },
}
