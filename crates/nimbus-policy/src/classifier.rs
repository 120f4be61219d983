//! Operation classifier.
//!
//! Maps `(service, operation)` to [`OperationType`]. The prefix lists, the
//! override table and the dry-run capable operations are loaded once from a
//! YAML table (the built-in one is compiled in) and never change afterwards.

use crate::error::TableError;
use crate::operation_key;
use nimbus_core::OperationType;
use nimbus_core::to_snake_case;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};

const BUILTIN_TABLE: &str = include_str!("../assets/classification.yaml");

#[derive(Debug, Deserialize)]
struct ClassificationTable {
    prefixes: PrefixTable,
    #[serde(default)]
    overrides: HashMap<String, OperationType>,
    #[serde(default)]
    dry_run: HashMap<String, Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct PrefixTable {
    #[serde(default)]
    destructive: Vec<String>,
    #[serde(default)]
    write: Vec<String>,
    #[serde(default)]
    read: Vec<String>,
}

/// Deterministic operation classifier.
#[derive(Debug, Clone)]
pub struct Classifier {
    destructive: Vec<String>,
    write: Vec<String>,
    read: Vec<String>,
    overrides: HashMap<String, OperationType>,
    dry_run: HashSet<String>,
}

impl Classifier {
    /// The classifier built from the compiled-in table.
    pub fn builtin() -> Result<Self, TableError> {
        Self::from_yaml_str(BUILTIN_TABLE)
    }

    /// Build a classifier from a YAML table.
    pub fn from_yaml_str(text: &str) -> Result<Self, TableError> {
        let table: ClassificationTable =
            serde_yaml::from_str(text).map_err(|source| TableError::Parse {
                what: "classification",
                source,
            })?;

        let classifier = Self {
            destructive: table.prefixes.destructive,
            write: table.prefixes.write,
            read: table.prefixes.read,
            overrides: HashMap::new(),
            dry_run: table
                .dry_run
                .into_iter()
                .flat_map(|(service, ops)| {
                    ops.into_iter()
                        .map(move |op| operation_key(&service, &op))
                })
                .collect(),
        };
        classifier.with_overrides(&table.overrides)
    }

    /// Add overrides keyed by `service.operation`. Later entries win.
    pub fn with_overrides(
        mut self,
        overrides: &HashMap<String, OperationType>,
    ) -> Result<Self, TableError> {
        for (entry, op_type) in overrides {
            let Some((service, operation)) = entry.split_once('.') else {
                return Err(TableError::InvalidEntry {
                    what: "classification overrides",
                    entry: entry.clone(),
                });
            };
            self.overrides
                .insert(operation_key(service, operation), *op_type);
        }
        Ok(self)
    }

    /// Classify an operation.
    ///
    /// Overrides win over prefixes. Destructive prefixes are checked before
    /// write prefixes, and write before read. Unknown names are WRITE.
    pub fn classify(&self, service: &str, operation: &str) -> OperationType {
        if let Some(op_type) = self.overrides.get(&operation_key(service, operation)) {
            return *op_type;
        }

        let operation = to_snake_case(operation);
        let tiers = [
            (&self.destructive, OperationType::Destructive),
            (&self.write, OperationType::Write),
            (&self.read, OperationType::Read),
        ];
        for (prefixes, op_type) in tiers {
            if prefixes.iter().any(|p| has_prefix(&operation, p)) {
                return op_type;
            }
        }
        OperationType::Write
    }

    /// Whether the provider accepts a `DryRun` flag for this operation.
    pub fn supports_dry_run(&self, service: &str, operation: &str) -> bool {
        self.dry_run.contains(&operation_key(service, operation))
    }

    /// Number of overrides in effect.
    pub fn override_count(&self) -> usize {
        self.overrides.len()
    }
}

/// Word-boundary prefix match on a snake_case name.
fn has_prefix(operation: &str, prefix: &str) -> bool {
    operation
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('_'))
}
