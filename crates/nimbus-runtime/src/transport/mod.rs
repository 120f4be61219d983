//! Cloud provider transport seam.
//!
//! The runtime never talks to a provider SDK directly. Anything able to send
//! one `(service, operation, region, account, parameters)` call and return a
//! page (or a [`ProviderError`]) can back the orchestrator.

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

use crate::error::ProviderError;
use async_trait::async_trait;
use nimbus_core::OperationRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One page of a provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub data: Value,
    /// Continuation cursor; `None` on the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl Page {
    /// A final page.
    pub fn last(data: Value) -> Self {
        Self {
            data,
            next_cursor: None,
        }
    }

    /// A page followed by more.
    pub fn more(data: Value, cursor: impl Into<String>) -> Self {
        Self {
            data,
            next_cursor: Some(cursor.into()),
        }
    }
}

/// Sends single provider calls.
///
/// `cursor` is the continuation token from the previous page, if any. The
/// transport decides how to pass it (the orchestrator also injects it into the
/// request parameters when the catalog names the input token).
#[async_trait]
pub trait CloudTransport: Send + Sync {
    async fn call(
        &self,
        request: &OperationRequest,
        cursor: Option<&str>,
    ) -> Result<Page, ProviderError>;
}

/// Transport that refuses every call.
///
/// Used when no provider backend is configured; reads and writes fail with a
/// permanent client error instead of reaching anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineTransport;

#[async_trait]
impl CloudTransport for OfflineTransport {
    async fn call(
        &self,
        request: &OperationRequest,
        _cursor: Option<&str>,
    ) -> Result<Page, ProviderError> {
        Err(ProviderError::new(
            "TransportUnavailable",
            format!(
                "no cloud transport is configured; {} was not sent",
                request.qualified_name()
            ),
        ))
    }
}
