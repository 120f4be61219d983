//! Graph error types.

use nimbus_core::{CoreError, ResourceRef};
use nimbus_runtime::ErrorInfo;
use std::path::PathBuf;
use thiserror::Error;

/// Problems with a relationship rule table.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid relationship rules: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("failed to read rules file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("resource type key '{0}' must look like service/type")]
    BadTypeKey(String),

    #[error("rule on {resource_type} points at unknown resource type '{target}'")]
    UnknownTarget { resource_type: String, target: String },

    #[error("rule on {resource_type} calls {operation}, which is not a read operation")]
    NonReadOperation {
        resource_type: String,
        operation: String,
    },

    #[error("rule on {resource_type} has an invalid request: {source}")]
    BadRequest {
        resource_type: String,
        #[source]
        source: CoreError,
    },
}

/// Failures of a graph build.
///
/// Only seed problems abort a build. Failures on other nodes mark them
/// truncated and the build carries on.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("no relationship rules for resource type {service}/{resource_type}")]
    UnsupportedType {
        service: String,
        resource_type: String,
    },

    #[error("resource {0} does not exist")]
    RootNotFound(ResourceRef),

    #[error("resource {resource} could not be described: {}", .error.message)]
    SeedUnavailable {
        resource: ResourceRef,
        error: Box<ErrorInfo>,
    },

    #[error(transparent)]
    Request(#[from] CoreError),
}
