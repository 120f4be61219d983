//! Fan-out of one read across services and regions.

use crate::orchestrator::{ExecutionContext, ExecutionOutcome, Orchestrator};
use futures::future::join_all;
use nimbus_core::OperationRequest;
use serde::{Deserialize, Serialize};

/// Outcome for one `(service, operation, region)` target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub service: String,
    pub operation: String,
    pub region: String,
    pub outcome: ExecutionOutcome,
}

/// Sort results by `(service, region, operation)`. The sort is stable, so
/// repeated targets keep their request order.
pub fn resequence(results: &mut [DiscoveryResult]) {
    results.sort_by(|a, b| {
        (&a.service, &a.region, &a.operation).cmp(&(&b.service, &b.region, &b.operation))
    });
}

impl Orchestrator {
    /// Execute every request concurrently and return the results sorted by
    /// `(service, region, operation)`.
    pub async fn discover(
        &self,
        requests: &[OperationRequest],
        ctx: &ExecutionContext,
    ) -> Vec<DiscoveryResult> {
        let mut results = self.fan_out(requests, ctx).await;
        resequence(&mut results);
        results
    }

    /// Execute every request concurrently. Results come back in request
    /// order, one per request.
    ///
    /// Each request paginates sequentially on its own; concurrency across
    /// requests is bounded by the per-service ceilings and the context's
    /// worker pool. Cancelling the context stops every child, and children
    /// that had fetched pages come back PARTIAL.
    pub async fn fan_out(
        &self,
        requests: &[OperationRequest],
        ctx: &ExecutionContext,
    ) -> Vec<DiscoveryResult> {
        let ctx = ctx.clone().resume_from(None);
        let runs = requests.iter().map(|request| {
            let ctx = &ctx;
            async move {
                let outcome = self.execute(request, ctx).await;
                DiscoveryResult {
                    service: request.service().to_string(),
                    operation: request.operation().to_string(),
                    region: request.region().to_string(),
                    outcome,
                }
            }
        });

        let results = join_all(runs).await;
        tracing::debug!(targets = results.len(), "Discovery fan-out finished");
        results
    }
}
