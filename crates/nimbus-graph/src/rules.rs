//! Relationship rules.
//!
//! The rule table says, for each supported resource type, how to confirm a
//! resource exists and where its neighbours are found. Rules only ever name
//! read operations; [`RuleSet::check_read_only`] enforces that against the
//! classifier before a builder accepts the table.

use crate::error::RuleError;
use crate::graph::{Confidence, Relation};
use nimbus_core::config::GraphConfig;
use nimbus_core::{AccountRef, CoreError, OperationRequest, Parameters};
use nimbus_policy::Classifier;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

const BUILTIN_RULES: &str = include_str!("../assets/rules.yaml");

const ID_PLACEHOLDER: &str = "{id}";

#[derive(Debug, Deserialize)]
struct RuleDocument {
    resource_types: BTreeMap<String, TypeRules>,
}

/// A read call with `{id}` placeholders in its parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct CallTemplate {
    pub service: String,
    pub operation: String,
    #[serde(default)]
    pub parameters: Parameters,
}

impl CallTemplate {
    /// Build the concrete request for one resource.
    pub fn render(
        &self,
        identifier: &str,
        region: &str,
        account: &AccountRef,
    ) -> Result<OperationRequest, CoreError> {
        let parameters = self
            .parameters
            .iter()
            .map(|(name, value)| (name.clone(), substitute(value, identifier)))
            .collect();
        OperationRequest::new(
            &self.service,
            &self.operation,
            parameters,
            region,
            account.clone(),
        )
    }
}

fn substitute(value: &Value, identifier: &str) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace(ID_PLACEHOLDER, identifier)),
        Value::Array(items) => Value::Array(items.iter().map(|v| substitute(v, identifier)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), substitute(v, identifier)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// How to confirm a resource exists.
#[derive(Debug, Clone, Deserialize)]
pub struct DescribeRule {
    #[serde(flatten)]
    pub call: CallTemplate,
    /// Path that must select something. Without it a successful call is enough.
    #[serde(default)]
    pub exists: Option<String>,
}

/// Value rewrite applied to selected strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    /// `arn:aws:iam::1:role/path/app` becomes `app`; non-ARN values pass through.
    ArnResourceName,
}

impl Transform {
    pub fn apply(self, value: &str) -> String {
        match self {
            Transform::ArnResourceName => arn_resource_name(value),
        }
    }
}

fn arn_resource_name(value: &str) -> String {
    if !value.starts_with("arn:") {
        return value.to_string();
    }
    let resource = value.splitn(6, ':').nth(5).unwrap_or(value);
    resource
        .rsplit(|c: char| c == '/' || c == ':')
        .next()
        .unwrap_or(resource)
        .to_string()
}

fn apply_transform(transform: Option<Transform>, value: &str) -> String {
    match transform {
        Some(t) => t.apply(value),
        None => value.to_string(),
    }
}

/// Edges leaving a resource, read from its own description or a `source` call.
#[derive(Debug, Clone, Deserialize)]
pub struct OutgoingRule {
    pub relation: Relation,
    /// `service/type` of the neighbour.
    pub target: String,
    pub path: String,
    #[serde(default)]
    pub source: Option<CallTemplate>,
    #[serde(default)]
    pub transform: Option<Transform>,
    /// Keep only raw values containing this text.
    #[serde(default)]
    pub filter: Option<String>,
    /// The edge runs from the neighbour to this resource.
    #[serde(default)]
    pub inverse: bool,
    #[serde(default)]
    pub confidence: Confidence,
}

impl OutgoingRule {
    /// Neighbour identifiers selected from response pages.
    pub fn identifiers(&self, pages: &[Value]) -> Vec<String> {
        select_strings(pages, &self.path)
            .into_iter()
            .filter(|raw| self.filter.as_deref().is_none_or(|f| raw.contains(f)))
            .map(|raw| apply_transform(self.transform, &raw))
            .filter(|id| !id.is_empty())
            .collect()
    }
}

/// Condition an incoming query item must meet.
#[derive(Debug, Clone, Deserialize)]
pub struct Condition {
    pub path: String,
    #[serde(default)]
    pub transform: Option<Transform>,
    /// Substring match instead of equality.
    #[serde(default)]
    pub contains: bool,
}

impl Condition {
    fn matches(&self, item: &Value, identifier: &str) -> bool {
        select_strings(std::slice::from_ref(item), &self.path)
            .iter()
            .map(|raw| apply_transform(self.transform, raw))
            .any(|value| {
                if self.contains {
                    value.contains(identifier)
                } else {
                    value == identifier
                }
            })
    }
}

/// Edges arriving at a resource, found by listing candidates and filtering.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingRule {
    pub relation: Relation,
    /// `service/type` of the neighbour.
    pub from: String,
    pub query: CallTemplate,
    pub items: String,
    pub id: String,
    #[serde(default)]
    pub id_transform: Option<Transform>,
    #[serde(default, rename = "where")]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub confidence: Confidence,
}

impl IncomingRule {
    /// Identifiers of the items that point at `identifier`.
    pub fn identifiers(&self, pages: &[Value], identifier: &str) -> Vec<String> {
        select(pages, &self.items)
            .into_iter()
            .filter(|item| {
                self.condition
                    .as_ref()
                    .is_none_or(|c| c.matches(item, identifier))
            })
            .filter_map(|item| {
                select_strings(std::slice::from_ref(item), &self.id)
                    .into_iter()
                    .next()
            })
            .map(|raw| apply_transform(self.id_transform, &raw))
            .filter(|id| !id.is_empty())
            .collect()
    }
}

/// Everything known about one resource type.
#[derive(Debug, Clone, Deserialize)]
pub struct TypeRules {
    /// IAM-like resources that have no region.
    #[serde(default)]
    pub global: bool,
    pub describe: DescribeRule,
    #[serde(default)]
    pub outgoing: Vec<OutgoingRule>,
    #[serde(default)]
    pub incoming: Vec<IncomingRule>,
}

impl TypeRules {
    fn calls(&self) -> impl Iterator<Item = &CallTemplate> {
        std::iter::once(&self.describe.call)
            .chain(self.outgoing.iter().filter_map(|r| r.source.as_ref()))
            .chain(self.incoming.iter().map(|r| &r.query))
    }
}

/// The loaded rule table, keyed by `service/type`.
#[derive(Debug, Clone)]
pub struct RuleSet {
    types: BTreeMap<String, TypeRules>,
}

impl RuleSet {
    /// The compiled-in table.
    pub fn builtin() -> Result<Self, RuleError> {
        Self::from_yaml_str(BUILTIN_RULES)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, RuleError> {
        let document: RuleDocument = serde_yaml::from_str(text)?;
        let rules = Self {
            types: document.resource_types,
        };
        rules.check_references()?;
        Ok(rules)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| RuleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// The configured rules file, or the built-in table.
    pub fn from_config(config: &GraphConfig) -> Result<Self, RuleError> {
        let rules = match &config.rules_file {
            Some(path) => Self::from_file(path)?,
            None => Self::builtin()?,
        };
        tracing::info!(
            types = rules.types.len(),
            custom = config.rules_file.is_some(),
            "Relationship rules loaded"
        );
        Ok(rules)
    }

    pub fn rules_for(&self, service: &str, resource_type: &str) -> Option<&TypeRules> {
        self.types.get(&type_key(service, resource_type))
    }

    /// Whether resources of this type carry no region.
    pub fn is_global(&self, service: &str, resource_type: &str) -> bool {
        self.rules_for(service, resource_type)
            .is_some_and(|rules| rules.global)
    }

    /// Supported types as `service/type`, sorted.
    pub fn supported_types(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    /// Every `(service, operation)` the rules may call.
    pub fn operations(&self) -> Vec<(String, String)> {
        let mut operations: Vec<(String, String)> = self
            .types
            .values()
            .flat_map(TypeRules::calls)
            .map(|call| (call.service.clone(), call.operation.clone()))
            .collect();
        operations.sort();
        operations.dedup();
        operations
    }

    /// Reject tables that would call anything but a read.
    pub fn check_read_only(&self, classifier: &Classifier) -> Result<(), RuleError> {
        for (key, rules) in &self.types {
            for call in rules.calls() {
                if !classifier.classify(&call.service, &call.operation).is_read() {
                    return Err(RuleError::NonReadOperation {
                        resource_type: key.clone(),
                        operation: format!("{}.{}", call.service, call.operation),
                    });
                }
            }
        }
        Ok(())
    }

    fn check_references(&self) -> Result<(), RuleError> {
        for (key, rules) in &self.types {
            if split_type_key(key).is_none() {
                return Err(RuleError::BadTypeKey(key.clone()));
            }
            let targets = rules
                .outgoing
                .iter()
                .map(|r| &r.target)
                .chain(rules.incoming.iter().map(|r| &r.from));
            for target in targets {
                if !self.types.contains_key(target) {
                    return Err(RuleError::UnknownTarget {
                        resource_type: key.clone(),
                        target: target.clone(),
                    });
                }
            }
            for call in rules.calls() {
                call.render("", "", &AccountRef::new(""))
                    .map_err(|source| RuleError::BadRequest {
                        resource_type: key.clone(),
                        source,
                    })?;
            }
        }
        Ok(())
    }
}

pub(crate) fn type_key(service: &str, resource_type: &str) -> String {
    format!("{}/{}", service, resource_type)
}

/// Split `service/type`. Both halves must be non-empty.
pub(crate) fn split_type_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
        .filter(|(service, kind)| !service.is_empty() && !kind.is_empty())
}

/// Select values from response pages.
///
/// `A.B` walks object fields, a `[]` suffix flattens a list and `*` takes
/// every value of a map. Missing fields and nulls select nothing.
pub fn select<'a>(pages: &'a [Value], path: &str) -> Vec<&'a Value> {
    let mut current: Vec<&Value> = pages.iter().collect();
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let (name, flatten) = match segment.strip_suffix("[]") {
            Some(name) => (name, true),
            None => (segment, false),
        };
        let mut next = Vec::new();
        for value in current {
            let selected: Vec<&Value> = match name {
                "" => vec![value],
                "*" => match value {
                    Value::Object(map) => map.values().collect(),
                    Value::Array(items) => items.iter().collect(),
                    _ => Vec::new(),
                },
                key => value.get(key).into_iter().collect(),
            };
            for found in selected {
                match (flatten, found) {
                    (true, Value::Array(items)) => next.extend(items.iter()),
                    (true, _) => {}
                    (false, value) => next.push(value),
                }
            }
        }
        current = next;
    }
    current.retain(|value| !value.is_null());
    current
}

/// Like [`select`], keeping only strings.
pub fn select_strings(pages: &[Value], path: &str) -> Vec<String> {
    select(pages, path)
        .into_iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_walks_and_flattens() {
        let page = json!({
            "Reservations": [
                {"Instances": [{"SecurityGroups": [{"GroupId": "sg-1"}, {"GroupId": "sg-2"}]}]},
                {"Instances": [{"SecurityGroups": [{"GroupId": "sg-3"}]}, {"SecurityGroups": null}]}
            ]
        });
        assert_eq!(
            select_strings(&[page], "Reservations[].Instances[].SecurityGroups[].GroupId"),
            vec!["sg-1", "sg-2", "sg-3"]
        );
    }

    #[test]
    fn test_select_map_values_and_missing_fields() {
        let page = json!({"Environment": {"Variables": {"A": "x", "B": "assets-bucket"}}});
        assert_eq!(
            select_strings(&[page.clone()], "Environment.Variables.*"),
            vec!["x", "assets-bucket"]
        );
        assert!(select(&[page], "VpcConfig.SubnetIds[]").is_empty());
    }

    #[test]
    fn test_select_spans_pages() {
        let pages = vec![json!({"Items": ["a"]}), json!({"Items": ["b", "c"]})];
        assert_eq!(select_strings(&pages, "Items[]"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_arn_resource_name() {
        assert_eq!(arn_resource_name("arn:aws:iam::1:role/service/app-role"), "app-role");
        assert_eq!(arn_resource_name("arn:aws:lambda:us-east-1:1:function:worker"), "worker");
        assert_eq!(arn_resource_name("arn:aws:sqs:us-east-1:1:jobs"), "jobs");
        assert_eq!(arn_resource_name("arn:aws:kms:us-east-1:1:key/abcd-1234"), "abcd-1234");
        assert_eq!(arn_resource_name("plain-name"), "plain-name");
    }

    #[test]
    fn test_render_substitutes_nested_placeholders() {
        let template: CallTemplate = serde_yaml::from_str(
            r#"
service: ec2
operation: DescribeInstances
parameters:
  Filters: [{ Name: subnet-id, Values: ["{id}"] }]
"#,
        )
        .unwrap();
        let request = template
            .render("subnet-1", "eu-west-1", &AccountRef::new("1"))
            .unwrap();
        assert_eq!(request.operation(), "describe_instances");
        assert_eq!(
            request.parameters()["Filters"],
            json!([{"Name": "subnet-id", "Values": ["subnet-1"]}])
        );
    }

    #[test]
    fn test_incoming_where_clause() {
        let rule: IncomingRule = serde_yaml::from_str(
            r#"
relation: USES
from: lambda/function
query: { service: lambda, operation: list_functions }
items: "Functions[]"
id: FunctionName
where: { path: Role, transform: arn_resource_name }
"#,
        )
        .unwrap();
        let page = json!({"Functions": [
            {"FunctionName": "a", "Role": "arn:aws:iam::1:role/app-role"},
            {"FunctionName": "b", "Role": "arn:aws:iam::1:role/other"},
            {"FunctionName": "c"}
        ]});
        assert_eq!(rule.identifiers(&[page], "app-role"), vec!["a"]);
    }

    #[test]
    fn test_outgoing_filter_runs_before_transform() {
        let rule: OutgoingRule = serde_yaml::from_str(
            r#"
relation: USES
target: sqs/queue
path: "EventSourceMappings[].EventSourceArn"
filter: ":sqs:"
transform: arn_resource_name
"#,
        )
        .unwrap();
        let page = json!({"EventSourceMappings": [
            {"EventSourceArn": "arn:aws:sqs:us-east-1:1:jobs"},
            {"EventSourceArn": "arn:aws:kinesis:us-east-1:1:stream/clicks"}
        ]});
        assert_eq!(rule.identifiers(&[page]), vec!["jobs"]);
    }

    #[test]
    fn test_builtin_rules_load_and_are_read_only() {
        let rules = RuleSet::builtin().unwrap();
        assert!(rules.rules_for("s3", "bucket").is_some());
        assert!(rules.is_global("iam", "role"));
        assert!(!rules.is_global("ec2", "instance"));
        rules.check_read_only(&Classifier::builtin().unwrap()).unwrap();
    }

    #[test]
    fn test_rejects_unknown_target_and_mutations() {
        let unknown = r#"
resource_types:
  s3/bucket:
    describe: { service: s3, operation: head_bucket }
    outgoing:
      - { relation: USES, target: kms/key, path: KeyId }
"#;
        assert!(matches!(
            RuleSet::from_yaml_str(unknown),
            Err(RuleError::UnknownTarget { .. })
        ));

        let mutating = r#"
resource_types:
  s3/bucket:
    describe: { service: s3, operation: delete_bucket, parameters: { Bucket: "{id}" } }
"#;
        let rules = RuleSet::from_yaml_str(mutating).unwrap();
        assert!(matches!(
            rules.check_read_only(&Classifier::builtin().unwrap()),
            Err(RuleError::NonReadOperation { .. })
        ));
    }

    #[test]
    fn test_bad_type_key() {
        let text = r#"
resource_types:
  bucket:
    describe: { service: s3, operation: head_bucket }
"#;
        assert!(matches!(
            RuleSet::from_yaml_str(text),
            Err(RuleError::BadTypeKey(_))
        ));
    }
}
