//! Request model.
//!
//! An [`OperationRequest`] is produced upstream (by the intent parser) and is
//! immutable once built. Service names are lower-cased and operation names are
//! normalised to snake_case so that `DescribeInstances` and
//! `describe_instances` address the same operation everywhere.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Ordered parameter mapping (name -> value).
pub type Parameters = BTreeMap<String, Value>;

/// The account a request runs against.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountRef {
    /// Provider account identifier.
    pub account_id: String,
    /// Credential profile used to reach the account, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

impl AccountRef {
    pub fn new(account_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            profile: None,
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.profile {
            Some(profile) => write!(f, "{}({})", self.account_id, profile),
            None => write!(f, "{}", self.account_id),
        }
    }
}

/// Impact class of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    /// Lists, describes and gets. No account state changes.
    Read,
    /// Creates or modifies resources.
    Write,
    /// Deletes, terminates or otherwise removes resources.
    Destructive,
}

impl OperationType {
    pub fn is_read(self) -> bool {
        self == OperationType::Read
    }

    /// Human-readable description of the class.
    pub fn description(self) -> &'static str {
        match self {
            OperationType::Read => "Read-only operation that doesn't modify resources",
            OperationType::Write => "Write operation that creates or modifies resources",
            OperationType::Destructive => {
                "Destructive operation that deletes or terminates resources"
            }
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Read => write!(f, "READ"),
            OperationType::Write => write!(f, "WRITE"),
            OperationType::Destructive => write!(f, "DESTRUCTIVE"),
        }
    }
}

/// Session-wide safety mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    /// Only READ operations run.
    #[default]
    ReadOnly,
    /// Mutations run after an explicit confirmation.
    Standard,
    /// Everything except the denylist runs without confirmation.
    Unrestricted,
}

impl SafetyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SafetyMode::ReadOnly => "read_only",
            SafetyMode::Standard => "standard",
            SafetyMode::Unrestricted => "unrestricted",
        }
    }
}

impl fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SafetyMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "read_only" | "readonly" => Ok(SafetyMode::ReadOnly),
            "standard" => Ok(SafetyMode::Standard),
            "unrestricted" => Ok(SafetyMode::Unrestricted),
            _ => Err(CoreError::UnknownSafetyMode(s.to_string())),
        }
    }
}

/// A structured request to run one provider operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    service: String,
    operation: String,
    #[serde(default)]
    parameters: Parameters,
    region: String,
    account: AccountRef,
}

impl OperationRequest {
    /// Build a request, normalising the service and operation names.
    pub fn new(
        service: impl AsRef<str>,
        operation: impl AsRef<str>,
        parameters: Parameters,
        region: impl Into<String>,
        account: AccountRef,
    ) -> Result<Self, CoreError> {
        let service = service.as_ref().trim().to_ascii_lowercase();
        let operation = to_snake_case(operation.as_ref().trim());
        if service.is_empty() {
            return Err(CoreError::IncompleteRequest("service"));
        }
        if operation.is_empty() {
            return Err(CoreError::IncompleteRequest("operation"));
        }
        Ok(Self {
            service,
            operation,
            parameters,
            region: region.into(),
            account,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn account(&self) -> &AccountRef {
        &self.account
    }

    /// `service.operation` key used by the denylist and logs.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.service, self.operation)
    }

    /// A copy of this request carrying different parameters.
    pub fn with_parameters(&self, parameters: Parameters) -> Self {
        Self {
            parameters,
            ..self.clone()
        }
    }

    /// Canonical JSON text: keys are sorted at every depth.
    pub fn canonical_json(&self) -> String {
        let mut value = serde_json::json!({
            "service": self.service,
            "operation": self.operation,
            "region": self.region,
            "account": self.account,
            "parameters": self.parameters,
        });
        sort_keys(&mut value);
        value.to_string()
    }
}

impl fmt::Display for OperationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} [{} / {}]",
            self.service, self.operation, self.region, self.account
        )
    }
}

fn sort_keys(value: &mut Value) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = std::mem::take(map).into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (key, mut inner) in entries {
                sort_keys(&mut inner);
                map.insert(key, inner);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(sort_keys),
        _ => {}
    }
}

/// Convert `DescribeDBInstances` / `describeInstances` / `describe_instances`
/// to `describe_db_instances` / `describe_instances`.
pub fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == ' ' {
            out.push('_');
            continue;
        }
        if c.is_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let boundary = prev.is_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_uppercase() && next_is_lower);
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
        }
        out.extend(c.to_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snake_case_conversion() {
        assert_eq!(to_snake_case("DescribeInstances"), "describe_instances");
        assert_eq!(to_snake_case("describe_instances"), "describe_instances");
        assert_eq!(to_snake_case("DescribeDBInstances"), "describe_db_instances");
        assert_eq!(to_snake_case("listBuckets"), "list_buckets");
        assert_eq!(to_snake_case("GetObjectACL"), "get_object_acl");
    }

    #[test]
    fn test_request_normalises_names() {
        let request = OperationRequest::new(
            "EC2",
            "TerminateInstances",
            Parameters::new(),
            "us-east-1",
            AccountRef::new("123456789012"),
        )
        .unwrap();

        assert_eq!(request.service(), "ec2");
        assert_eq!(request.operation(), "terminate_instances");
        assert_eq!(request.qualified_name(), "ec2.terminate_instances");
    }

    #[test]
    fn test_request_rejects_empty_names() {
        let err = OperationRequest::new("", "list", Parameters::new(), "", AccountRef::new("a"));
        assert!(matches!(err, Err(CoreError::IncompleteRequest("service"))));
    }

    #[test]
    fn test_canonical_json_is_order_independent() {
        let mut a = Parameters::new();
        a.insert("b".into(), json!({"y": 1, "x": 2}));
        a.insert("a".into(), json!("v"));

        let mut b = Parameters::new();
        b.insert("a".into(), json!("v"));
        b.insert("b".into(), json!({"x": 2, "y": 1}));

        let account = AccountRef::new("1");
        let ra = OperationRequest::new("s3", "list_buckets", a, "eu-west-1", account.clone()).unwrap();
        let rb = OperationRequest::new("s3", "list_buckets", b, "eu-west-1", account).unwrap();
        assert_eq!(ra.canonical_json(), rb.canonical_json());
    }

    #[test]
    fn test_safety_mode_parsing() {
        assert_eq!("read_only".parse::<SafetyMode>().unwrap(), SafetyMode::ReadOnly);
        assert_eq!("Standard".parse::<SafetyMode>().unwrap(), SafetyMode::Standard);
        assert_eq!("unrestricted".parse::<SafetyMode>().unwrap(), SafetyMode::Unrestricted);
        assert!("yolo".parse::<SafetyMode>().is_err());
        assert_eq!(SafetyMode::default(), SafetyMode::ReadOnly);
    }
}
