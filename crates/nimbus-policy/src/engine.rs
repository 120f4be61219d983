//! Safety policy engine.
//!
//! [`decide`] is the whole policy: a pure function of the session's mode
//! snapshot, the operation class, denylist membership and whether a valid
//! confirmation token was presented. [`PolicyEngine`] wraps it with the
//! classifier and denylist lookups and adds advisory flags (high risk,
//! warnings) that never change the outcome.

use crate::classifier::Classifier;
use crate::denylist::Denylist;
use nimbus_core::{OperationType, SafetyMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Result of a policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Allow,
    Deny,
    RequireConfirmation,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Allow => write!(f, "ALLOW"),
            Outcome::Deny => write!(f, "DENY"),
            Outcome::RequireConfirmation => write!(f, "REQUIRE_CONFIRMATION"),
        }
    }
}

/// A policy decision. Recomputed per request, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub outcome: Outcome,
    pub reason: String,
    /// Mode that would permit the operation, for mode denials.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_mode: Option<SafetyMode>,
}

impl PolicyDecision {
    fn new(outcome: Outcome, reason: impl Into<String>) -> Self {
        Self {
            outcome,
            reason: reason.into(),
            suggested_mode: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome == Outcome::Allow
    }
}

/// Decide whether an operation may run.
///
/// Rules, in order:
/// 1. denylisted operations are denied,
/// 2. READ_ONLY denies anything that is not a read,
/// 3. STANDARD requires a confirmation token for anything that is not a read,
/// 4. everything else is allowed.
pub fn decide(
    mode: SafetyMode,
    op_type: OperationType,
    denied: bool,
    has_confirmation_token: bool,
) -> PolicyDecision {
    if denied {
        return PolicyDecision::new(Outcome::Deny, "operation permanently blocked");
    }

    match (mode, op_type) {
        (_, OperationType::Read) => {
            PolicyDecision::new(Outcome::Allow, "read operation permitted in every mode")
        }
        (SafetyMode::ReadOnly, op_type) => PolicyDecision {
            outcome: Outcome::Deny,
            reason: format!(
                "{} operations are not permitted in read_only mode",
                op_type
            ),
            suggested_mode: Some(SafetyMode::Standard),
        },
        (SafetyMode::Standard, op_type) if !has_confirmation_token => PolicyDecision::new(
            Outcome::RequireConfirmation,
            format!(
                "{} operation requires explicit confirmation in standard mode",
                op_type
            ),
        ),
        (SafetyMode::Standard, _) => {
            PolicyDecision::new(Outcome::Allow, "confirmed by a valid confirmation token")
        }
        (SafetyMode::Unrestricted, _) => {
            PolicyDecision::new(Outcome::Allow, "permitted in unrestricted mode")
        }
    }
}

/// A decision plus everything the engine looked up to make it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyEvaluation {
    pub service: String,
    pub operation: String,
    pub operation_type: OperationType,
    pub mode: SafetyMode,
    pub denied: bool,
    pub decision: PolicyDecision,
    /// Destructive enough that an impact analysis should come first.
    pub high_risk: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Policy engine over injected classifier and denylist tables.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    classifier: Arc<Classifier>,
    denylist: Arc<Denylist>,
}

impl PolicyEngine {
    pub fn new(classifier: Arc<Classifier>, denylist: Arc<Denylist>) -> Self {
        Self {
            classifier,
            denylist,
        }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn denylist(&self) -> &Denylist {
        &self.denylist
    }

    /// Classify an operation and decide on it under `mode`.
    pub fn evaluate(
        &self,
        service: &str,
        operation: &str,
        mode: SafetyMode,
        has_confirmation_token: bool,
    ) -> PolicyEvaluation {
        let operation_type = self.classifier.classify(service, operation);
        let block_reason = self.denylist.block_reason(service, operation);
        let denied = block_reason.is_some();

        let mut decision = decide(mode, operation_type, denied, has_confirmation_token);
        if let Some(reason) = block_reason {
            decision.reason = format!("{}: {}", decision.reason, reason);
        }

        let high_risk = !denied && self.denylist.requires_double_confirmation(service, operation);
        let mut warnings = Vec::new();
        if high_risk {
            warnings.push(format!(
                "{}.{} is high risk; analyze its impact before running it",
                service, operation
            ));
        }
        if self.denylist.should_warn(service, operation) {
            warnings.push(format!(
                "{}.{} can weaken access controls; review the parameters carefully",
                service, operation
            ));
        }

        match decision.outcome {
            Outcome::Deny => tracing::warn!(
                service,
                operation,
                mode = %mode,
                op_type = %operation_type,
                reason = %decision.reason,
                "Policy denied operation"
            ),
            outcome => tracing::debug!(
                service,
                operation,
                mode = %mode,
                op_type = %operation_type,
                outcome = %outcome,
                "Policy decision"
            ),
        }

        PolicyEvaluation {
            service: service.to_string(),
            operation: operation.to_string(),
            operation_type,
            mode,
            denied,
            decision,
            high_risk,
            warnings,
        }
    }
}
