//! # nimbus-graph
//!
//! Resource dependency discovery and impact analysis.
//!
//! - [`RuleSet`]: which reads reveal the neighbours of each resource type
//! - [`GraphBuilder`]: breadth-first discovery from a seed, read-only
//! - [`DependencyGraph`]: typed, deduplicated edges with confidence
//! - [`analyze_impact`]: hard failures and degraded dependents of a target

pub mod builder;
pub mod error;
pub mod graph;
pub mod impact;
pub mod rules;

pub use builder::GraphBuilder;
pub use error::{GraphError, RuleError};
pub use graph::{Confidence, DependencyEdge, DependencyGraph, NodeInfo, Relation};
pub use impact::{
    AffectedResource, ImpactConfidence, ImpactReport, RiskLevel, Severity, analyze_impact,
};
pub use rules::{RuleSet, Transform, TypeRules};
