//! # nimbus-policy
//!
//! Decides whether a request may run, and whether it is well formed.
//!
//! - [`Classifier`] maps operations to READ / WRITE / DESTRUCTIVE
//! - [`Denylist`] holds operations that never run
//! - [`decide`] and [`PolicyEngine`] turn mode, class and denylist into a decision
//! - [`Session`] and [`SessionRegistry`] scope the safety mode per account
//! - [`ConfirmationManager`] issues and checks confirmation tokens
//! - [`Validator`] checks parameters against the operation catalog
//!
//! The classifier and denylist tables are parsed once at start and passed
//! around behind `Arc`; nothing here holds global mutable state.

pub mod classifier;
pub mod coerce;
pub mod confirmation;
pub mod denylist;
pub mod engine;
pub mod error;
pub mod session;
pub mod validator;

pub use classifier::Classifier;
pub use confirmation::{ConfirmationManager, ConfirmationStatus, PendingConfirmation, fingerprint};
pub use denylist::Denylist;
pub use engine::{Outcome, PolicyDecision, PolicyEngine, PolicyEvaluation, decide};
pub use error::{ConfirmationError, TableError, ValidationError, ValidationErrorKind};
pub use session::{Session, SessionInfo, SessionRegistry};
pub use validator::{ValidationResult, ValidationStatus, Validator};

use nimbus_core::config::SafetyConfig;
use nimbus_core::to_snake_case;
use std::sync::Arc;

/// Table key for an operation: `service.operation`, lower-cased service,
/// snake_case operation.
pub fn operation_key(service: &str, operation: &str) -> String {
    format!(
        "{}.{}",
        service.trim().to_ascii_lowercase(),
        to_snake_case(operation.trim())
    )
}

/// Build the policy engine from the built-in tables plus configuration.
pub fn engine_from_config(safety: &SafetyConfig) -> Result<PolicyEngine, TableError> {
    let classifier = Classifier::builtin()?.with_overrides(&safety.classification_overrides)?;
    let denylist = Denylist::builtin()?.with_extra(&safety.extra_denied)?;
    tracing::info!(
        denied = denylist.len(),
        overrides = classifier.override_count(),
        "Policy tables loaded"
    );
    Ok(PolicyEngine::new(Arc::new(classifier), Arc::new(denylist)))
}
