//! Error types for the core crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building core values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A string could not be parsed into a safety mode.
    #[error("unknown safety mode '{0}' (expected read_only, standard or unrestricted)")]
    UnknownSafetyMode(String),

    /// An ARN did not have the `arn:partition:service:region:account:resource` shape.
    #[error("malformed ARN: {0}")]
    MalformedArn(String),

    /// A request was built with an empty service or operation.
    #[error("request is missing its {0}")]
    IncompleteRequest(&'static str),
}

/// Errors raised while loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file was not valid YAML for the expected structure.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A built-in or inline document could not be parsed.
    #[error("invalid {what}: {source}")]
    Embedded {
        what: &'static str,
        #[source]
        source: serde_yaml::Error,
    },

    /// A value was present but out of range.
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}
