//! Execution orchestrator.
//!
//! Runs one validated request against the transport:
//!
//! - paginated reads are driven page by page, strictly in order, until the
//!   provider stops returning a cursor or a page/item cap is hit;
//! - each call is retried according to the [`RetryPolicy`];
//! - a failure after the first page keeps the pages already fetched;
//! - every call holds a slot in the session worker pool and in the target
//!   service's concurrency ceiling, released before any backoff sleep.

use crate::error::{ErrorInfo, ProviderError};
use crate::limiter::ServiceLimiter;
use crate::retry::RetryPolicy;
use crate::transport::{CloudTransport, Page};
use nimbus_core::catalog::PaginationSpec;
use nimbus_core::config::ExecutionConfig;
use nimbus_core::{OperationCatalog, OperationRequest, OperationType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Final status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Partial,
    Failed,
}

/// Why pagination stopped before the provider ran out of pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    PageLimit,
    ItemLimit,
    Error,
    Cancelled,
}

/// Result of executing one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    /// Response pages in arrival order.
    pub pages: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Cursor to resume from when the result is partial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    /// Response field holding each page's items, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_key: Option<String>,
    pub item_count: usize,
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    /// Items merged across pages.
    ///
    /// With a known result key the key's arrays are concatenated; otherwise
    /// the pages themselves are returned.
    pub fn items(&self) -> Vec<Value> {
        match &self.result_key {
            Some(key) => self
                .pages
                .iter()
                .filter_map(|page| page.get(key).and_then(Value::as_array))
                .flatten()
                .cloned()
                .collect(),
            None => self.pages.clone(),
        }
    }

    /// The first page, for non-paginated calls.
    pub fn first_page(&self) -> Option<&Value> {
        self.pages.first()
    }
}

/// Per-call execution context.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub operation_type: OperationType,
    /// The operation may be repeated safely after a network failure.
    pub idempotent: bool,
    /// Session worker pool; `None` runs without a session bound.
    pub worker_pool: Option<Arc<Semaphore>>,
    pub cancel: CancellationToken,
    /// Cursor from an earlier partial result.
    pub resume_cursor: Option<String>,
}

impl ExecutionContext {
    pub fn new(operation_type: OperationType) -> Self {
        Self {
            operation_type,
            idempotent: false,
            worker_pool: None,
            cancel: CancellationToken::new(),
            resume_cursor: None,
        }
    }

    pub fn idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = idempotent;
        self
    }

    pub fn with_worker_pool(mut self, pool: Arc<Semaphore>) -> Self {
        self.worker_pool = Some(pool);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn resume_from(mut self, cursor: Option<String>) -> Self {
        self.resume_cursor = cursor;
        self
    }
}

enum CallFailure {
    Provider { error: ProviderError, attempts: u32 },
    Cancelled,
}

/// Executes validated requests.
pub struct Orchestrator {
    transport: Arc<dyn CloudTransport>,
    catalog: Arc<dyn OperationCatalog>,
    config: ExecutionConfig,
    retry: RetryPolicy,
    limiter: ServiceLimiter,
}

impl Orchestrator {
    pub fn new(
        transport: Arc<dyn CloudTransport>,
        catalog: Arc<dyn OperationCatalog>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            transport,
            catalog,
            retry: RetryPolicy::from_config(&config),
            limiter: ServiceLimiter::new(config.clone()),
            config,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn OperationCatalog> {
        &self.catalog
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Execute a normalized request.
    ///
    /// Only READ operations follow cursors; a mutation is a single call and
    /// any cursor it returns is passed through untouched.
    pub async fn execute(&self, request: &OperationRequest, ctx: &ExecutionContext) -> ExecutionOutcome {
        let (pagination, catalog_idempotent) =
            match self.catalog.describe_operation(request.service(), request.operation()) {
                Ok(description) => (description.pagination, description.idempotent),
                Err(e) => {
                    tracing::debug!(
                        operation = %request.qualified_name(),
                        error = %e,
                        "Catalog lookup failed, executing without pagination metadata"
                    );
                    (None, false)
                }
            };
        let idempotent = ctx.idempotent || catalog_idempotent;
        let paginate = ctx.operation_type.is_read();
        let result_key = pagination.as_ref().and_then(|p| p.result_key.clone());

        let mut run = PageRun {
            pages: Vec::new(),
            item_count: 0,
            result_key: result_key.clone(),
        };
        let mut cursor = ctx.resume_cursor.clone();

        loop {
            let page_no = run.pages.len() + 1;
            let page_request = with_cursor(request, cursor.as_deref(), pagination.as_ref());

            let page = match self
                .call_with_retry(&page_request, cursor.as_deref(), ctx, idempotent)
                .await
            {
                Ok(page) => page,
                Err(CallFailure::Provider { error, attempts }) => {
                    let info = ErrorInfo::from_provider(&error, attempts, page_no);
                    tracing::warn!(
                        operation = %request.qualified_name(),
                        region = %request.region(),
                        page = page_no,
                        code = %error.code,
                        class = %error.class(),
                        attempts,
                        "Provider call failed"
                    );
                    return run.stopped(StopReason::Error, Some(info), cursor);
                }
                Err(CallFailure::Cancelled) => {
                    tracing::info!(
                        operation = %request.qualified_name(),
                        page = page_no,
                        "Execution cancelled"
                    );
                    return run.stopped(StopReason::Cancelled, Some(ErrorInfo::cancelled(page_no)), cursor);
                }
            };

            let next = page
                .next_cursor
                .clone()
                .or_else(|| cursor_in_body(&page.data, pagination.as_ref()));
            run.item_count += count_items(&page.data, result_key.as_deref());
            run.pages.push(page.data);

            let Some(next) = next else {
                return run.complete(None);
            };
            if !paginate {
                return run.complete(Some(next));
            }
            if cursor.as_deref() == Some(next.as_str()) {
                tracing::warn!(
                    operation = %request.qualified_name(),
                    page = page_no,
                    "Provider repeated its cursor, stopping pagination"
                );
                return run.complete(None);
            }
            if run.pages.len() >= self.config.max_pages {
                tracing::info!(
                    operation = %request.qualified_name(),
                    pages = run.pages.len(),
                    "Page limit reached"
                );
                return run.stopped(StopReason::PageLimit, None, Some(next));
            }
            if run.item_count >= self.config.max_items {
                tracing::info!(
                    operation = %request.qualified_name(),
                    items = run.item_count,
                    "Item limit reached"
                );
                return run.stopped(StopReason::ItemLimit, None, Some(next));
            }
            cursor = Some(next);
        }
    }

    async fn call_with_retry(
        &self,
        request: &OperationRequest,
        cursor: Option<&str>,
        ctx: &ExecutionContext,
        idempotent: bool,
    ) -> Result<Page, CallFailure> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(CallFailure::Cancelled),
                result = self.call_once(request, cursor, ctx) => result,
            };
            let error = match result {
                Ok(page) => return Ok(page),
                Err(error) => error,
            };

            let class = error.class();
            let retryable = self.retry.should_retry(class, ctx.operation_type, idempotent);
            if !retryable {
                return Err(CallFailure::Provider { error, attempts: attempt });
            }
            if attempt >= self.retry.max_attempts {
                tracing::warn!(
                    operation = %request.qualified_name(),
                    code = %error.code,
                    class = %class,
                    attempts = attempt,
                    "Retries exhausted"
                );
                return Err(CallFailure::Provider { error, attempts: attempt });
            }

            let delay = self.retry.delay(attempt);
            tracing::debug!(
                operation = %request.qualified_name(),
                code = %error.code,
                class = %class,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying provider call"
            );
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(CallFailure::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn call_once(
        &self,
        request: &OperationRequest,
        cursor: Option<&str>,
        ctx: &ExecutionContext,
    ) -> Result<Page, ProviderError> {
        let _session_slot = match &ctx.worker_pool {
            Some(pool) => Some(
                Arc::clone(pool)
                    .acquire_owned()
                    .await
                    .map_err(|_| ProviderError::new("WorkerPoolClosed", "session is closed"))?,
            ),
            None => None,
        };
        let _service_slot = self
            .limiter
            .acquire(request.service())
            .await
            .map_err(|_| ProviderError::new("LimiterClosed", "service limiter is closed"))?;
        self.transport.call(request, cursor).await
    }
}

struct PageRun {
    pages: Vec<Value>,
    item_count: usize,
    result_key: Option<String>,
}

impl PageRun {
    fn complete(self, next_cursor: Option<String>) -> ExecutionOutcome {
        ExecutionOutcome {
            status: ExecutionStatus::Success,
            pages: self.pages,
            error: None,
            next_cursor,
            stop_reason: None,
            result_key: self.result_key,
            item_count: self.item_count,
        }
    }

    /// Nothing fetched means FAILED; anything fetched is kept as PARTIAL.
    fn stopped(
        self,
        reason: StopReason,
        error: Option<ErrorInfo>,
        next_cursor: Option<String>,
    ) -> ExecutionOutcome {
        let status = if self.pages.is_empty() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Partial
        };
        ExecutionOutcome {
            status,
            pages: self.pages,
            error,
            next_cursor,
            stop_reason: Some(reason),
            result_key: self.result_key,
            item_count: self.item_count,
        }
    }
}

fn with_cursor(
    request: &OperationRequest,
    cursor: Option<&str>,
    pagination: Option<&PaginationSpec>,
) -> OperationRequest {
    match (cursor, pagination) {
        (Some(cursor), Some(spec)) => {
            let mut parameters = request.parameters().clone();
            parameters.insert(spec.input_token.clone(), Value::String(cursor.to_string()));
            request.with_parameters(parameters)
        }
        _ => request.clone(),
    }
}

fn cursor_in_body(data: &Value, pagination: Option<&PaginationSpec>) -> Option<String> {
    let spec = pagination?;
    data.get(&spec.output_token)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn count_items(data: &Value, result_key: Option<&str>) -> usize {
    match (data, result_key) {
        (_, Some(key)) => data.get(key).and_then(Value::as_array).map_or(0, Vec::len),
        (Value::Array(items), None) => items.len(),
        (Value::Object(map), None) => map
            .values()
            .find_map(Value::as_array)
            .map_or(0, Vec::len),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_count_items() {
        assert_eq!(count_items(&json!({"Buckets": [1, 2, 3]}), Some("Buckets")), 3);
        assert_eq!(count_items(&json!({"Other": [1]}), Some("Buckets")), 0);
        assert_eq!(count_items(&json!({"Owner": {}, "Buckets": [1, 2]}), None), 2);
        assert_eq!(count_items(&json!([1, 2]), None), 2);
        assert_eq!(count_items(&json!("x"), None), 0);
    }

    #[test]
    fn test_cursor_in_body() {
        let spec = PaginationSpec {
            input_token: "NextToken".into(),
            output_token: "NextToken".into(),
            result_key: None,
        };
        assert_eq!(
            cursor_in_body(&json!({"NextToken": "abc"}), Some(&spec)),
            Some("abc".to_string())
        );
        assert_eq!(cursor_in_body(&json!({"NextToken": ""}), Some(&spec)), None);
        assert_eq!(cursor_in_body(&json!({"NextToken": "abc"}), None), None);
    }

    #[test]
    fn test_outcome_items_merge_pages() {
        let outcome = ExecutionOutcome {
            status: ExecutionStatus::Success,
            pages: vec![json!({"Items": [1, 2]}), json!({"Items": [3]})],
            error: None,
            next_cursor: None,
            stop_reason: None,
            result_key: Some("Items".into()),
            item_count: 3,
        };
        assert_eq!(outcome.items(), vec![json!(1), json!(2), json!(3)]);
    }
}
