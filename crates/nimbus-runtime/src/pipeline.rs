//! The safety-gated pipeline.
//!
//! Every request takes the same path:
//!
//! 1. **Policy** - classify, check the denylist and decide under the session's
//!    mode, read once as a snapshot for the whole run
//! 2. **Validation** - check the request against the catalog and normalize it
//! 3. **Confirmation** - mutations in STANDARD mode need a token bound to the
//!    normalized request; without one (or with a bad one) a token is issued
//! 4. **Execution** - the orchestrator runs the normalized request
//!
//! Every terminal state is recorded on the audit sink.

use crate::audit::{AuditEvent, AuditSink, AuditStatus, NullAuditSink, TracingAuditSink};
use crate::cancel::Deadline;
use crate::discover::{DiscoveryResult, resequence};
use crate::error::PipelineError;
use crate::orchestrator::{ExecutionContext, ExecutionOutcome, ExecutionStatus, Orchestrator};
use crate::transport::CloudTransport;
use chrono::Utc;
use nimbus_core::{NimbusConfig, OperationRequest, OperationType, Parameters};
use nimbus_policy::{
    ConfirmationError, Outcome, PendingConfirmation, PolicyEngine, PolicyEvaluation, Session,
    ValidationResult, Validator, engine_from_config, fingerprint,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Provider parameter asking for a permission check without side effects.
const DRY_RUN_PARAMETER: &str = "DryRun";
/// Error code a provider returns when a dry run would have succeeded.
const DRY_RUN_SUCCESS_CODE: &str = "DryRunOperation";

/// Options for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub confirmation_token: Option<String>,
    pub dry_run: bool,
    /// Continue a partial read from this cursor.
    pub resume_cursor: Option<String>,
    /// Cancelling stops execution; fetched pages come back PARTIAL.
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    pub fn confirmed(token: impl Into<String>) -> Self {
        Self {
            confirmation_token: Some(token.into()),
            ..Self::default()
        }
    }

    pub fn dry_run() -> Self {
        Self {
            dry_run: true,
            ..Self::default()
        }
    }
}

/// Terminal state of a pipeline run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// Policy refused the request.
    Denied { evaluation: PolicyEvaluation },

    /// A second call with `pending.token` is needed.
    ConfirmationRequired {
        evaluation: PolicyEvaluation,
        pending: PendingConfirmation,
        /// Why a presented token was not accepted.
        #[serde(skip_serializing_if = "Option::is_none")]
        token_error: Option<ConfirmationError>,
    },

    /// Validation found problems; all of them are listed.
    Rejected {
        evaluation: PolicyEvaluation,
        validation: ValidationResult,
    },

    /// Preview of a dry run.
    DryRun {
        evaluation: PolicyEvaluation,
        request: OperationRequest,
        /// The provider checked permissions and parameters.
        provider_checked: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        outcome: Option<ExecutionOutcome>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },

    /// The request ran.
    Executed {
        evaluation: PolicyEvaluation,
        request: OperationRequest,
        outcome: ExecutionOutcome,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        warnings: Vec<String>,
    },
}

impl PipelineOutcome {
    pub fn evaluation(&self) -> &PolicyEvaluation {
        match self {
            PipelineOutcome::Denied { evaluation }
            | PipelineOutcome::ConfirmationRequired { evaluation, .. }
            | PipelineOutcome::Rejected { evaluation, .. }
            | PipelineOutcome::DryRun { evaluation, .. }
            | PipelineOutcome::Executed { evaluation, .. } => evaluation,
        }
    }

    pub fn execution(&self) -> Option<&ExecutionOutcome> {
        match self {
            PipelineOutcome::Executed { outcome, .. } => Some(outcome),
            PipelineOutcome::DryRun { outcome, .. } => outcome.as_ref(),
            _ => None,
        }
    }

    /// Token to present on the confirming call, if one was issued.
    pub fn confirmation_token(&self) -> Option<&str> {
        match self {
            PipelineOutcome::ConfirmationRequired { pending, .. } => Some(&pending.token),
            _ => None,
        }
    }
}

/// Policy engine, validator and orchestrator wired together.
pub struct Pipeline {
    policy: PolicyEngine,
    validator: Validator,
    orchestrator: Arc<Orchestrator>,
    audit: Arc<dyn AuditSink>,
    dry_run_when_available: bool,
    audit_parameters: bool,
    investigation_timeout: Duration,
}

impl Pipeline {
    pub fn new(policy: PolicyEngine, validator: Validator, orchestrator: Arc<Orchestrator>) -> Self {
        let investigation_timeout =
            Duration::from_secs(orchestrator.config().investigation_timeout_secs);
        Self {
            policy,
            validator,
            orchestrator,
            audit: Arc::new(TracingAuditSink),
            dry_run_when_available: true,
            audit_parameters: false,
            investigation_timeout,
        }
    }

    /// Wire a pipeline from configuration and a transport.
    pub fn from_config(
        config: &NimbusConfig,
        transport: Arc<dyn CloudTransport>,
    ) -> Result<Self, PipelineError> {
        let policy = engine_from_config(&config.safety)?;
        let catalog = nimbus_core::catalog::from_config(&config.catalog)?;
        let validator = Validator::new(
            Arc::clone(&catalog),
            config.safety.max_resources_per_operation,
        );
        let orchestrator = Arc::new(Orchestrator::new(
            transport,
            catalog,
            config.execution.clone(),
        ));
        let audit: Arc<dyn AuditSink> = if config.audit.enabled {
            Arc::new(TracingAuditSink)
        } else {
            Arc::new(NullAuditSink)
        };

        let mut pipeline = Self::new(policy, validator, orchestrator).with_audit_sink(audit);
        pipeline.dry_run_when_available = config.safety.dry_run_when_available;
        pipeline.audit_parameters = config.audit.include_parameters;
        Ok(pipeline)
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_investigation_timeout(mut self, timeout: Duration) -> Self {
        self.investigation_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn investigation_timeout(&self) -> Duration {
        self.investigation_timeout
    }

    /// Run one request through policy, validation, confirmation and execution.
    pub async fn run(
        &self,
        session: &Session,
        request: OperationRequest,
        options: RunOptions,
    ) -> PipelineOutcome {
        let mode = session.mode_snapshot();
        let service = request.service().to_string();
        let operation = request.operation().to_string();

        // A dry run never mutates, so it only needs to pass the mode check.
        let evaluation = self.policy.evaluate(&service, &operation, mode, options.dry_run);
        if evaluation.decision.outcome == Outcome::Deny {
            self.record(session, &request, &evaluation, AuditStatus::Denied, Some(&evaluation.decision.reason));
            return PipelineOutcome::Denied { evaluation };
        }

        let validation = self.validator.validate(&request);
        let normalized = match validation.normalized_request.clone() {
            Some(normalized) if validation.is_accepted() => normalized,
            _ => {
                let detail = validation
                    .errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; ");
                self.record(session, &request, &evaluation, AuditStatus::Rejected, Some(&detail));
                return PipelineOutcome::Rejected {
                    evaluation,
                    validation,
                };
            }
        };
        let mut warnings = evaluation.warnings.clone();
        warnings.extend(validation.warnings.iter().cloned());

        if options.dry_run {
            return self
                .dry_run(session, normalized, evaluation, validation.idempotent, warnings, &options)
                .await;
        }

        let evaluation = if evaluation.decision.outcome == Outcome::RequireConfirmation {
            let token_error = match options.confirmation_token.as_deref() {
                Some(token) => match session.confirmations().consume(token, &normalized) {
                    Ok(()) => None,
                    Err(error) => Some(error),
                },
                None => {
                    return self.require_confirmation(session, normalized, evaluation, None);
                }
            };
            if let Some(error) = token_error {
                tracing::warn!(
                    session = %session.id(),
                    operation = %normalized.qualified_name(),
                    error = %error,
                    "Confirmation token rejected"
                );
                return self.require_confirmation(session, normalized, evaluation, Some(error));
            }
            self.policy.evaluate(&service, &operation, mode, true)
        } else {
            evaluation
        };

        let outcome = self
            .execute(session, &normalized, &evaluation, validation.idempotent, &options)
            .await;
        let status = audit_status(outcome.status);
        let detail = outcome.error.as_ref().map(|e| format!("{}: {}", e.code, e.message));
        self.record(session, &normalized, &evaluation, status, detail.as_deref());

        PipelineOutcome::Executed {
            evaluation,
            request: normalized,
            outcome,
            warnings,
        }
    }

    fn require_confirmation(
        &self,
        session: &Session,
        normalized: OperationRequest,
        evaluation: PolicyEvaluation,
        token_error: Option<ConfirmationError>,
    ) -> PipelineOutcome {
        let pending = session
            .confirmations()
            .issue(&normalized, evaluation.operation_type);
        self.record(
            session,
            &normalized,
            &evaluation,
            AuditStatus::ConfirmationRequired,
            token_error.as_ref().map(ToString::to_string).as_deref(),
        );
        PipelineOutcome::ConfirmationRequired {
            evaluation,
            pending,
            token_error,
        }
    }

    async fn dry_run(
        &self,
        session: &Session,
        normalized: OperationRequest,
        evaluation: PolicyEvaluation,
        idempotent: bool,
        warnings: Vec<String>,
        options: &RunOptions,
    ) -> PipelineOutcome {
        let provider_side = self.dry_run_when_available
            && self
                .policy
                .classifier()
                .supports_dry_run(normalized.service(), normalized.operation());

        if !provider_side {
            self.record(session, &normalized, &evaluation, AuditStatus::DryRun, Some("preview"));
            return PipelineOutcome::DryRun {
                evaluation,
                request: normalized,
                provider_checked: false,
                outcome: None,
                warnings,
            };
        }

        let mut parameters: Parameters = normalized.parameters().clone();
        parameters.insert(DRY_RUN_PARAMETER.to_string(), Value::Bool(true));
        let request = normalized.with_parameters(parameters);
        let mut outcome = self.execute(session, &request, &evaluation, idempotent, options).await;

        // The provider signals "would have succeeded" with an error code.
        if outcome
            .error
            .as_ref()
            .is_some_and(|e| e.code == DRY_RUN_SUCCESS_CODE)
        {
            outcome.status = ExecutionStatus::Success;
            outcome.error = None;
            outcome.stop_reason = None;
        }
        let detail = outcome.error.as_ref().map(|e| e.code.clone());
        self.record(session, &request, &evaluation, AuditStatus::DryRun, detail.as_deref());

        PipelineOutcome::DryRun {
            evaluation,
            request,
            provider_checked: true,
            outcome: Some(outcome),
            warnings,
        }
    }

    async fn execute(
        &self,
        session: &Session,
        request: &OperationRequest,
        evaluation: &PolicyEvaluation,
        idempotent: bool,
        options: &RunOptions,
    ) -> ExecutionOutcome {
        let ctx = ExecutionContext::new(evaluation.operation_type)
            .idempotent(idempotent)
            .with_worker_pool(session.worker_pool())
            .with_cancel(options.cancel.clone().unwrap_or_default())
            .resume_from(options.resume_cursor.clone());
        tracing::info!(
            session = %session.id(),
            operation = %request.qualified_name(),
            region = %request.region(),
            op_type = %evaluation.operation_type,
            "Executing operation"
        );
        self.orchestrator.execute(request, &ctx).await
    }

    /// Issue the same kind of read across several targets at once.
    ///
    /// Every target must be an allowed READ and pass validation; the first
    /// that does not fails the whole call before anything is sent. The fan-out
    /// runs under the investigation deadline and `cancel`.
    pub async fn discover(
        &self,
        session: &Session,
        requests: Vec<OperationRequest>,
        cancel: CancellationToken,
    ) -> Result<Vec<DiscoveryResult>, PipelineError> {
        let mode = session.mode_snapshot();
        let mut normalized = Vec::with_capacity(requests.len());
        let mut evaluations = Vec::with_capacity(requests.len());

        for request in &requests {
            let evaluation =
                self.policy
                    .evaluate(request.service(), request.operation(), mode, false);
            if !evaluation.operation_type.is_read() {
                return Err(PipelineError::NotReadOnly {
                    operation: request.qualified_name(),
                });
            }
            if !evaluation.decision.is_allowed() {
                return Err(PipelineError::Denied {
                    operation: request.qualified_name(),
                    reason: evaluation.decision.reason,
                });
            }
            let validation = self.validator.validate(request);
            if !validation.is_accepted() {
                return Err(PipelineError::Invalid {
                    operation: request.qualified_name(),
                    problems: validation.errors.iter().map(ToString::to_string).collect(),
                });
            }
            normalized.push(
                validation
                    .normalized_request
                    .unwrap_or_else(|| request.clone()),
            );
            evaluations.push(evaluation);
        }

        let deadline = Deadline::new(&cancel, self.investigation_timeout);
        let ctx = ExecutionContext::new(OperationType::Read)
            .with_worker_pool(session.worker_pool())
            .with_cancel(deadline.token().clone());

        tracing::info!(
            session = %session.id(),
            targets = normalized.len(),
            "Starting discovery"
        );
        let mut results = self.orchestrator.fan_out(&normalized, &ctx).await;
        for ((request, evaluation), result) in normalized.iter().zip(&evaluations).zip(&results) {
            self.record(session, request, evaluation, audit_status(result.outcome.status), None);
        }
        resequence(&mut results);
        Ok(results)
    }

    fn record(
        &self,
        session: &Session,
        request: &OperationRequest,
        evaluation: &PolicyEvaluation,
        status: AuditStatus,
        detail: Option<&str>,
    ) {
        self.audit.record(AuditEvent {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            session_id: session.id().to_string(),
            account: request.account().clone(),
            operation: request.qualified_name(),
            region: request.region().to_string(),
            fingerprint: fingerprint(request),
            operation_type: evaluation.operation_type,
            mode: evaluation.mode,
            decision: evaluation.decision.outcome,
            status,
            detail: detail.filter(|d| !d.is_empty()).map(str::to_string),
            parameters: self.audit_parameters.then(|| request.parameters().clone()),
        });
    }
}

fn audit_status(status: ExecutionStatus) -> AuditStatus {
    match status {
        ExecutionStatus::Success => AuditStatus::Success,
        ExecutionStatus::Partial => AuditStatus::Partial,
        ExecutionStatus::Failed => AuditStatus::Failed,
    }
}
