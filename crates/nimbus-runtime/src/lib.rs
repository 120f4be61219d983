//! # nimbus-runtime
//!
//! Executes requests that passed the safety policy.
//!
//! - [`CloudTransport`]: the seam to the provider
//! - [`Orchestrator`]: pagination, retries and bounded concurrency
//! - [`Pipeline`]: policy, validation, confirmation and execution in order
//! - [`AuditSink`]: one event per pipeline decision
//!
//! Provider failures are classified by [`classify`]; only throttling and
//! transient network errors are retried.

pub mod audit;
pub mod cancel;
pub mod discover;
pub mod error;
pub mod limiter;
pub mod orchestrator;
pub mod pipeline;
pub mod retry;
pub mod transport;

pub use audit::{AuditEvent, AuditSink, AuditStatus, MemoryAuditSink, NullAuditSink, TracingAuditSink};
pub use cancel::Deadline;
pub use discover::DiscoveryResult;
pub use error::{ErrorCategory, ErrorClass, ErrorInfo, PipelineError, ProviderError, classify};
pub use limiter::ServiceLimiter;
pub use orchestrator::{
    ExecutionContext, ExecutionOutcome, ExecutionStatus, Orchestrator, StopReason,
};
pub use pipeline::{Pipeline, PipelineOutcome, RunOptions};
pub use retry::RetryPolicy;
pub use transport::{CloudTransport, OfflineTransport, Page};

#[cfg(any(test, feature = "test-support"))]
pub use transport::mock::{MockTransport, RecordedCall};

pub use tokio_util::sync::CancellationToken;
