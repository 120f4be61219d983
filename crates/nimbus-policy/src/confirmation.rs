//! Confirmation tokens.
//!
//! A token binds a caller's approval to one normalized request: it stores the
//! SHA-256 fingerprint of the request's canonical JSON and is accepted only
//! for a request with the same fingerprint, once, before it expires.
//!
//! ## Flow
//!
//! 1. A STANDARD-mode mutation comes in without a token
//! 2. The pipeline issues a token for the normalized request and returns it
//! 3. The caller repeats the call with the token
//! 4. The token is consumed and the request runs

use crate::error::ConfirmationError;
use chrono::{DateTime, Duration, Utc};
use nimbus_core::{OperationRequest, OperationType};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// SHA-256 of the request's canonical JSON, hex encoded.
pub fn fingerprint(request: &OperationRequest) -> String {
    let digest = Sha256::digest(request.canonical_json().as_bytes());
    hex::encode(digest)
}

/// Status of a confirmation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    /// Issued, not yet presented.
    Pending,
    /// Presented with the matching request.
    Used,
    /// Past its TTL.
    Expired,
}

/// A confirmation waiting for the caller's second call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingConfirmation {
    /// The token to present.
    pub token: String,
    /// `service.operation` it was issued for.
    pub operation: String,
    pub operation_type: OperationType,
    /// Fingerprint of the normalized request.
    pub fingerprint: String,
    /// One-line description shown to the user.
    pub summary: String,
    pub status: ConfirmationStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingConfirmation {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn is_pending(&self) -> bool {
        self.status == ConfirmationStatus::Pending && !self.is_expired()
    }
}

/// Per-session store of confirmation tokens.
pub struct ConfirmationManager {
    tokens: RwLock<HashMap<String, PendingConfirmation>>,
    ttl: Duration,
}

impl ConfirmationManager {
    /// Create a manager whose tokens live for `ttl`.
    pub fn new(ttl: std::time::Duration) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::minutes(15)),
        }
    }

    /// Issue a token for a normalized request.
    pub fn issue(
        &self,
        request: &OperationRequest,
        operation_type: OperationType,
    ) -> PendingConfirmation {
        self.purge();
        let now = Utc::now();
        let pending = PendingConfirmation {
            token: Uuid::new_v4().to_string(),
            operation: request.qualified_name(),
            operation_type,
            fingerprint: fingerprint(request),
            summary: format!("{} {}", operation_type, request),
            status: ConfirmationStatus::Pending,
            created_at: now,
            expires_at: now + self.ttl,
        };

        self.tokens
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pending.token.clone(), pending.clone());

        tracing::info!(
            token = %pending.token,
            operation = %pending.operation,
            expires_at = %pending.expires_at,
            "Confirmation token issued"
        );
        pending
    }

    /// Check a token against a normalized request and consume it.
    ///
    /// A mismatched token stays pending so it can still confirm the request
    /// it was issued for.
    pub fn consume(&self, token: &str, request: &OperationRequest) -> Result<(), ConfirmationError> {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        let Some(pending) = tokens.get_mut(token) else {
            return Err(ConfirmationError::NotFound {
                token: token.to_string(),
            });
        };

        match pending.status {
            ConfirmationStatus::Used => {
                return Err(ConfirmationError::AlreadyUsed {
                    token: token.to_string(),
                });
            }
            ConfirmationStatus::Expired => {
                return Err(ConfirmationError::Expired {
                    token: token.to_string(),
                });
            }
            ConfirmationStatus::Pending if pending.is_expired() => {
                pending.status = ConfirmationStatus::Expired;
                return Err(ConfirmationError::Expired {
                    token: token.to_string(),
                });
            }
            ConfirmationStatus::Pending => {}
        }

        if pending.fingerprint != fingerprint(request) {
            tracing::warn!(
                token,
                confirmed = %pending.operation,
                presented = %request.qualified_name(),
                "Confirmation token presented for a different request"
            );
            return Err(ConfirmationError::Mismatch {
                token: token.to_string(),
                confirmed: pending.summary.clone(),
            });
        }

        pending.status = ConfirmationStatus::Used;
        tracing::info!(token, operation = %pending.operation, "Confirmation token accepted");
        Ok(())
    }

    /// Look up a token, expiring it if its TTL has passed.
    pub fn get(&self, token: &str) -> Option<PendingConfirmation> {
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        let pending = tokens.get_mut(token)?;
        if pending.status == ConfirmationStatus::Pending && pending.is_expired() {
            pending.status = ConfirmationStatus::Expired;
        }
        Some(pending.clone())
    }

    /// Tokens still waiting to be presented, oldest first.
    pub fn list_pending(&self) -> Vec<PendingConfirmation> {
        let tokens = self.tokens.read().unwrap_or_else(|e| e.into_inner());
        let mut pending: Vec<PendingConfirmation> = tokens
            .values()
            .filter(|p| p.is_pending())
            .cloned()
            .collect();
        pending.sort_by_key(|p| p.created_at);
        pending
    }

    /// Drop tokens more than one TTL past their expiry. Returns how many
    /// were dropped.
    ///
    /// Used and expired tokens are kept for that grace window so a replay
    /// still reports why it was refused.
    pub fn purge(&self) -> usize {
        let cutoff = Utc::now() - self.ttl;
        let mut tokens = self.tokens.write().unwrap_or_else(|e| e.into_inner());
        let before = tokens.len();
        tokens.retain(|_, p| p.expires_at >= cutoff);
        let dropped = before - tokens.len();
        if dropped > 0 {
            tracing::debug!(dropped, remaining = tokens.len(), "Confirmation tokens purged");
        }
        dropped
    }

    /// Tokens held in the store, whatever their status.
    pub fn len(&self) -> usize {
        self.tokens.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
