//! Denylist of operations that never run.
//!
//! Built once at start from the compiled-in table plus any extra entries from
//! configuration, then shared read-only. The same table carries the
//! double-confirmation and warning lists.

use crate::error::TableError;
use crate::operation_key;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};

const BUILTIN_TABLE: &str = include_str!("../assets/denylist.yaml");

/// Reason given for entries added through configuration.
pub const CONFIGURED_REASON: &str = "This operation is blocked by local configuration";

#[derive(Debug, Deserialize)]
struct DenylistTable {
    #[serde(default)]
    categories: BTreeMap<String, Category>,
    #[serde(default)]
    double_confirm: Vec<String>,
    #[serde(default)]
    warn: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Category {
    reason: String,
    #[serde(default)]
    operations: Vec<String>,
}

/// Immutable set of forbidden operations.
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    /// `service.operation` -> block reason.
    denied: HashMap<String, String>,
    double_confirm: HashSet<String>,
    warn: HashSet<String>,
}

fn parse_entry(what: &'static str, entry: &str) -> Result<String, TableError> {
    match entry.split_once('.') {
        Some((service, operation)) if !service.is_empty() && !operation.is_empty() => {
            Ok(operation_key(service, operation))
        }
        _ => Err(TableError::InvalidEntry {
            what,
            entry: entry.to_string(),
        }),
    }
}

impl Denylist {
    /// The compiled-in denylist.
    pub fn builtin() -> Result<Self, TableError> {
        Self::from_yaml_str(BUILTIN_TABLE)
    }

    /// Build a denylist from a YAML table.
    pub fn from_yaml_str(text: &str) -> Result<Self, TableError> {
        let table: DenylistTable = serde_yaml::from_str(text).map_err(|source| {
            TableError::Parse {
                what: "denylist",
                source,
            }
        })?;

        let mut denied = HashMap::new();
        for category in table.categories.into_values() {
            for entry in &category.operations {
                denied.insert(parse_entry("denylist", entry)?, category.reason.clone());
            }
        }

        let double_confirm: HashSet<String> = table
            .double_confirm
            .iter()
            .map(|e| parse_entry("double_confirm", e))
            .collect::<Result<_, _>>()?;
        let warn: HashSet<String> = table
            .warn
            .iter()
            .map(|e| parse_entry("warn", e))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            denied,
            double_confirm,
            warn,
        })
    }

    /// Add configured `service.operation` entries.
    pub fn with_extra<S: AsRef<str>>(mut self, entries: &[S]) -> Result<Self, TableError> {
        for entry in entries {
            let key = parse_entry("safety.extra_denied", entry.as_ref())?;
            self.denied
                .entry(key)
                .or_insert_with(|| CONFIGURED_REASON.to_string());
        }
        Ok(self)
    }

    pub fn is_denied(&self, service: &str, operation: &str) -> bool {
        self.denied.contains_key(&operation_key(service, operation))
    }

    /// Why an operation is blocked, `None` when it is not.
    pub fn block_reason(&self, service: &str, operation: &str) -> Option<&str> {
        self.denied
            .get(&operation_key(service, operation))
            .map(String::as_str)
    }

    pub fn requires_double_confirmation(&self, service: &str, operation: &str) -> bool {
        self.double_confirm
            .contains(&operation_key(service, operation))
    }

    pub fn should_warn(&self, service: &str, operation: &str) -> bool {
        self.warn.contains(&operation_key(service, operation))
    }

    pub fn len(&self) -> usize {
        self.denied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.denied.is_empty()
    }

    /// Every denied key, sorted.
    pub fn entries(&self) -> Vec<&str> {
        let mut entries: Vec<&str> = self.denied.keys().map(String::as_str).collect();
        entries.sort_unstable();
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_entries() {
        let denylist = Denylist::builtin().unwrap();
        assert!(denylist.is_denied("cloudtrail", "delete_trail"));
        assert!(denylist.is_denied("CloudTrail", "StopLogging"));
        assert!(denylist.is_denied("kms", "schedule_key_deletion"));
        assert!(!denylist.is_denied("s3", "delete_bucket"));
        assert!(!denylist.is_denied("ec2", "describe_instances"));
    }

    #[test]
    fn test_block_reasons_by_category() {
        let denylist = Denylist::builtin().unwrap();
        assert_eq!(
            denylist.block_reason("kms", "disable_key"),
            Some("This operation could permanently destroy encryption keys")
        );
        assert_eq!(
            denylist.block_reason("s3", "put_bucket_acl"),
            Some("This operation could change S3 bucket security settings")
        );
        assert!(
            denylist
                .block_reason("route53", "delete_hosted_zone")
                .unwrap()
                .contains("DNS")
        );
        assert_eq!(denylist.block_reason("s3", "list_buckets"), None);
    }

    #[test]
    fn test_double_confirm_and_warn_lists() {
        let denylist = Denylist::builtin().unwrap();
        assert!(denylist.requires_double_confirmation("s3", "delete_bucket"));
        assert!(denylist.requires_double_confirmation("ec2", "TerminateInstances"));
        assert!(denylist.should_warn("iam", "attach_role_policy"));
        assert!(!denylist.should_warn("s3", "delete_bucket"));
    }

    #[test]
    fn test_extra_entries() {
        let denylist = Denylist::builtin()
            .unwrap()
            .with_extra(&["ec2.delete_vpc"])
            .unwrap();
        assert!(denylist.is_denied("ec2", "delete_vpc"));
        assert_eq!(
            denylist.block_reason("ec2", "delete_vpc"),
            Some(CONFIGURED_REASON)
        );

        assert!(Denylist::default().with_extra(&["nodot"]).is_err());
    }
}
