//! Provider errors and their classification.
//!
//! Every failure a transport reports is a [`ProviderError`]. The orchestrator
//! classifies it into an [`ErrorClass`], which drives retries, and attaches an
//! [`ErrorInfo`] to the outcome with a category and a suggestion for the user.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A failure reported by the cloud provider transport.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ProviderError {
    /// Provider error code (`ThrottlingException`, `NoSuchBucket`, ...).
    pub code: String,
    pub message: String,
    /// HTTP status of the response, when one was received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// No response was received at all.
    #[serde(default)]
    pub network: bool,
}

impl ProviderError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            http_status: None,
            network: false,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    /// A connection-level failure (reset, DNS, timeout before a response).
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            code: "NetworkError".to_string(),
            message: message.into(),
            http_status: None,
            network: true,
        }
    }

    /// Whether the provider says the target does not exist.
    pub fn is_not_found(&self) -> bool {
        is_not_found_code(&self.code, self.http_status)
    }

    pub fn class(&self) -> ErrorClass {
        classify(self)
    }
}

impl From<anyhow::Error> for ProviderError {
    fn from(error: anyhow::Error) -> Self {
        ProviderError::network(format!("{:#}", error))
    }
}

/// Retry-relevant class of a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorClass {
    Throttled,
    TransientNetwork,
    PermanentClientError,
    PermanentServerError,
}

impl ErrorClass {
    /// Whether the class is retried at all (subject to idempotency).
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Throttled | ErrorClass::TransientNetwork)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Throttled => "THROTTLED",
            ErrorClass::TransientNetwork => "TRANSIENT_NETWORK",
            ErrorClass::PermanentClientError => "PERMANENT_CLIENT_ERROR",
            ErrorClass::PermanentServerError => "PERMANENT_SERVER_ERROR",
        };
        f.write_str(s)
    }
}

const THROTTLE_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestThrottled",
    "RequestThrottledException",
    "TooManyRequestsException",
    "ProvisionedThroughputExceededException",
    "TransactionInProgressException",
    "RequestLimitExceeded",
    "BandwidthLimitExceeded",
    "SlowDown",
    "EC2ThrottledException",
    "PriorRequestNotComplete",
];

const TRANSIENT_CODES: &[&str] = &[
    "NetworkError",
    "RequestTimeout",
    "RequestTimeoutException",
    "ServiceUnavailable",
    "ServiceUnavailableException",
    "IDPCommunicationError",
    "EndpointConnectionError",
    "ConnectTimeout",
    "ReadTimeout",
];

const SERVER_CODES: &[&str] = &[
    "InternalError",
    "InternalFailure",
    "InternalServerError",
    "InternalServiceError",
    "ServiceException",
];

/// Classify a provider error.
///
/// Codes win over HTTP statuses. Without a known code: 429 is throttling,
/// 502/503/504 are transient, other 5xx are permanent server errors and
/// everything else is a permanent client error.
pub fn classify(error: &ProviderError) -> ErrorClass {
    let code = error.code.as_str();
    if THROTTLE_CODES.contains(&code) {
        return ErrorClass::Throttled;
    }
    if error.network || TRANSIENT_CODES.contains(&code) {
        return ErrorClass::TransientNetwork;
    }
    if SERVER_CODES.contains(&code) {
        return ErrorClass::PermanentServerError;
    }
    match error.http_status {
        Some(429) => ErrorClass::Throttled,
        Some(502..=504) => ErrorClass::TransientNetwork,
        Some(500..=599) => ErrorClass::PermanentServerError,
        _ => ErrorClass::PermanentClientError,
    }
}

/// User-facing grouping of an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Auth,
    Resource,
    Validation,
    RateLimit,
    Service,
    Limit,
    Conflict,
    Network,
    Cancelled,
    Unknown,
}

/// Category and suggestion for a provider error code.
pub fn describe_code(code: &str, class: ErrorClass) -> (ErrorCategory, &'static str) {
    match code {
        "UnauthorizedAccess" => (
            ErrorCategory::Auth,
            "Check your credentials and IAM permissions",
        ),
        "AccessDenied" | "AccessDeniedException" | "UnauthorizedOperation" => (
            ErrorCategory::Auth,
            "You don't have permission for this operation. Check IAM policies.",
        ),
        "ExpiredToken" | "ExpiredTokenException" => (
            ErrorCategory::Auth,
            "Your credentials have expired. Refresh them and retry.",
        ),
        "InvalidIdentityToken" => (
            ErrorCategory::Auth,
            "The identity token is invalid. Try refreshing your credentials.",
        ),
        "SignatureDoesNotMatch" => (
            ErrorCategory::Auth,
            "Request signature doesn't match. Check your credentials and clock sync.",
        ),
        "NoSuchBucket" => (
            ErrorCategory::Resource,
            "The S3 bucket doesn't exist. Check the bucket name.",
        ),
        "NoSuchKey" => (
            ErrorCategory::Resource,
            "The S3 object doesn't exist. Check the key path.",
        ),
        "ResourceAlreadyExistsException" => (
            ErrorCategory::Resource,
            "A resource with this name already exists. Use a different name.",
        ),
        "BucketAlreadyExists" => (
            ErrorCategory::Resource,
            "This bucket name is already taken globally. Try a different name.",
        ),
        "BucketAlreadyOwnedByYou" => (
            ErrorCategory::Resource,
            "You already own this bucket. No action needed.",
        ),
        "ValidationException" | "ValidationError" => (
            ErrorCategory::Validation,
            "Request validation failed. Check parameter types and formats.",
        ),
        "InvalidParameterValue" | "InvalidParameterException" | "InvalidParameterCombination" => (
            ErrorCategory::Validation,
            "One or more parameters have invalid values.",
        ),
        "MissingParameter" => (ErrorCategory::Validation, "A required parameter is missing."),
        "MalformedQueryString" => (
            ErrorCategory::Validation,
            "The query string is malformed. Check the request format.",
        ),
        "ProvisionedThroughputExceededException" => (
            ErrorCategory::RateLimit,
            "DynamoDB throughput exceeded. Consider increasing capacity.",
        ),
        "RequestLimitExceeded" => (
            ErrorCategory::RateLimit,
            "Request limit exceeded. Reduce request frequency.",
        ),
        "LimitExceededException" => (
            ErrorCategory::Limit,
            "Service limit exceeded. Request a limit increase or delete unused resources.",
        ),
        "QuotaExceededException" | "ServiceQuotaExceededException" => (
            ErrorCategory::Limit,
            "Service quota exceeded. Request a quota increase.",
        ),
        "ConditionalCheckFailedException" => (
            ErrorCategory::Conflict,
            "A condition check failed. The resource may have been modified.",
        ),
        "ResourceInUseException" | "DependencyViolation" => (
            ErrorCategory::Conflict,
            "The resource is in use by another resource. Remove the dependency first.",
        ),
        "OptimisticLockException" => (
            ErrorCategory::Conflict,
            "Resource was modified by another process. Refresh and retry.",
        ),
        code if code.contains("NotFound") => (
            ErrorCategory::Resource,
            "The resource doesn't exist. Verify the identifier is correct.",
        ),
        _ => match class {
            ErrorClass::Throttled => (ErrorCategory::RateLimit, "Request was throttled. Wait and retry."),
            ErrorClass::TransientNetwork => (
                ErrorCategory::Network,
                "The service could not be reached. Retry later.",
            ),
            ErrorClass::PermanentServerError => (
                ErrorCategory::Service,
                "The provider reported an internal error. Retry later.",
            ),
            ErrorClass::PermanentClientError => (
                ErrorCategory::Unknown,
                "The provider rejected the request. Check the error message.",
            ),
        },
    }
}

/// Error detail attached to an execution outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Retry class; absent for cancellations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<ErrorClass>,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub category: ErrorCategory,
    pub suggestion: String,
    /// Attempts made for the failing call.
    pub attempts: u32,
    /// 1-based page the failure happened on.
    pub page: usize,
}

impl ErrorInfo {
    pub fn from_provider(error: &ProviderError, attempts: u32, page: usize) -> Self {
        let class = classify(error);
        let (category, suggestion) = describe_code(&error.code, class);
        Self {
            class: Some(class),
            code: error.code.clone(),
            message: error.message.clone(),
            http_status: error.http_status,
            category,
            suggestion: suggestion.to_string(),
            attempts,
            page,
        }
    }

    /// The caller aborted or the investigation deadline passed.
    pub fn cancelled(page: usize) -> Self {
        Self {
            class: None,
            code: "Cancelled".to_string(),
            message: "Operation cancelled before it completed".to_string(),
            http_status: None,
            category: ErrorCategory::Cancelled,
            suggestion: "Partial results are included; rerun with a longer timeout for more."
                .to_string(),
            attempts: 0,
            page,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.category == ErrorCategory::Cancelled
    }

    /// Whether the failure says the target does not exist.
    pub fn is_not_found(&self) -> bool {
        is_not_found_code(&self.code, self.http_status)
    }
}

fn is_not_found_code(code: &str, http_status: Option<u16>) -> bool {
    http_status == Some(404)
        || code.contains("NotFound")
        || code.contains("NonExistent")
        || code.starts_with("NoSuch")
}

/// Errors raised by the pipeline outside the per-request outcomes.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to load policy tables: {0}")]
    Tables(#[from] nimbus_policy::TableError),

    #[error("failed to load operation catalog: {0}")]
    Catalog(#[from] nimbus_core::CatalogError),

    /// Discovery only issues reads.
    #[error("{operation} is not a read operation and cannot be used for discovery")]
    NotReadOnly { operation: String },

    #[error("{operation} denied: {reason}")]
    Denied { operation: String, reason: String },

    #[error("{operation} is invalid: {}", .problems.join("; "))]
    Invalid {
        operation: String,
        problems: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_code() {
        assert_eq!(
            classify(&ProviderError::new("ThrottlingException", "slow down")),
            ErrorClass::Throttled
        );
        assert_eq!(
            classify(&ProviderError::new("ServiceUnavailable", "").with_status(503)),
            ErrorClass::TransientNetwork
        );
        assert_eq!(
            classify(&ProviderError::new("InternalError", "").with_status(500)),
            ErrorClass::PermanentServerError
        );
        assert_eq!(
            classify(&ProviderError::new("AccessDenied", "").with_status(403)),
            ErrorClass::PermanentClientError
        );
        assert_eq!(
            classify(&ProviderError::network("connection reset")),
            ErrorClass::TransientNetwork
        );
    }

    #[test]
    fn test_classify_by_status() {
        assert_eq!(
            classify(&ProviderError::new("Unknown", "").with_status(429)),
            ErrorClass::Throttled
        );
        assert_eq!(
            classify(&ProviderError::new("Unknown", "").with_status(504)),
            ErrorClass::TransientNetwork
        );
        assert_eq!(
            classify(&ProviderError::new("Unknown", "").with_status(501)),
            ErrorClass::PermanentServerError
        );
        assert_eq!(
            classify(&ProviderError::new("Unknown", "")),
            ErrorClass::PermanentClientError
        );
    }

    #[test]
    fn test_error_info_suggestions() {
        let info = ErrorInfo::from_provider(
            &ProviderError::new("NoSuchBucket", "bucket missing").with_status(404),
            1,
            1,
        );
        assert_eq!(info.category, ErrorCategory::Resource);
        assert!(info.suggestion.contains("bucket name"));

        let info = ErrorInfo::from_provider(
            &ProviderError::new("InvalidInstanceID.NotFound", "gone"),
            1,
            1,
        );
        assert_eq!(info.category, ErrorCategory::Resource);
        assert_eq!(info.class, Some(ErrorClass::PermanentClientError));
    }

    #[test]
    fn test_not_found_detection() {
        assert!(ProviderError::new("NoSuchBucket", "").is_not_found());
        assert!(ProviderError::new("InvalidGroup.NotFound", "").is_not_found());
        assert!(ProviderError::new("X", "").with_status(404).is_not_found());
        assert!(!ProviderError::new("AccessDenied", "").is_not_found());
    }
}
