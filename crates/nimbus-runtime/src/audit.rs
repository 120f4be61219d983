//! Audit events for pipeline decisions.

use chrono::{DateTime, Utc};
use nimbus_core::{AccountRef, OperationType, Parameters, SafetyMode};
use nimbus_policy::Outcome;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

/// Terminal state of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Denied,
    ConfirmationRequired,
    Rejected,
    DryRun,
    Success,
    Partial,
    Failed,
}

/// One recorded pipeline decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub session_id: String,
    pub account: AccountRef,
    /// `service.operation`.
    pub operation: String,
    pub region: String,
    /// SHA-256 of the canonical request.
    pub fingerprint: String,
    pub operation_type: OperationType,
    pub mode: SafetyMode,
    pub decision: Outcome,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Copied only when parameter auditing is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Parameters>,
}

/// Destination for audit events.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Emits audit events as structured `tracing` records on the `audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            event_id = %event.event_id,
            session = %event.session_id,
            account = %event.account,
            operation = %event.operation,
            region = %event.region,
            fingerprint = %event.fingerprint,
            op_type = %event.operation_type,
            mode = %event.mode,
            decision = %event.decision,
            status = ?event.status,
            detail = event.detail.as_deref().unwrap_or(""),
            "Pipeline decision"
        );
    }
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Keeps events in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn statuses(&self) -> Vec<AuditStatus> {
        self.events().iter().map(|e| e.status).collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}
