//! Tool registry and the built-in Nimbus tool definitions.

use crate::protocol::{ToolAnnotations, ToolDefinition};
use serde_json::{Map, Value, json};
use std::collections::HashMap;

pub const CLASSIFY_OPERATION: &str = "classify_operation";
pub const VALIDATE_OPERATION: &str = "validate_operation";
pub const EXECUTE_OPERATION: &str = "execute_operation";
pub const GET_SAFETY_MODE: &str = "get_safety_mode";
pub const SET_SAFETY_MODE: &str = "set_safety_mode";
pub const DISCOVER_RESOURCES: &str = "discover_resources";
pub const BUILD_DEPENDENCY_GRAPH: &str = "build_dependency_graph";
pub const ANALYZE_IMPACT: &str = "analyze_impact";
pub const LIST_PENDING_CONFIRMATIONS: &str = "list_pending_confirmations";
pub const OPEN_SESSION: &str = "open_session";
pub const CLOSE_SESSION: &str = "close_session";

/// Registry of available MCP tools.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry holding every built-in tool.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for tool in builtin_tools() {
            registry.register(tool);
        }
        registry
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tools, sorted by name.
    pub fn list(&self) -> Vec<&ToolDefinition> {
        let mut tools: Vec<_> = self.tools.values().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.list().into_iter().map(|t| t.name.as_str()).collect()
    }
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    let mut properties = match properties {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    properties.insert(
        "session_id".to_string(),
        json!({
            "type": "string",
            "description": "Session to act in. Defaults to the server's account session."
        }),
    );
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn operation_properties() -> Value {
    json!({
        "service": {"type": "string", "description": "Service name, e.g. ec2 or s3"},
        "operation": {
            "type": "string",
            "description": "Operation name, snake_case or PascalCase"
        },
        "parameters": {"type": "object", "description": "Operation parameters"},
        "region": {"type": "string", "description": "Target region; defaults to the configured region"}
    })
}

fn resource_schema() -> Value {
    json!({
        "oneOf": [
            {"type": "string", "description": "Resource ARN"},
            {
                "type": "object",
                "properties": {
                    "service": {"type": "string"},
                    "resource_type": {"type": "string"},
                    "identifier": {"type": "string"},
                    "region": {"type": "string"}
                },
                "required": ["service", "resource_type", "identifier"]
            }
        ]
    })
}

fn read_only() -> Option<ToolAnnotations> {
    Some(ToolAnnotations {
        read_only: Some(true),
        ..ToolAnnotations::default()
    })
}

/// Definitions of every tool the server exposes.
pub fn builtin_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: CLASSIFY_OPERATION.to_string(),
            description: Some(
                "Classify an operation as read, write or destructive and show the decision \
                 the current safety mode would make."
                    .to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "service": {"type": "string"},
                    "operation": {"type": "string"}
                }),
                &["service", "operation"],
            ),
            annotations: read_only(),
        },
        ToolDefinition {
            name: VALIDATE_OPERATION.to_string(),
            description: Some(
                "Check an operation's parameters against the service catalog without running it."
                    .to_string(),
            ),
            input_schema: object_schema(operation_properties(), &["service", "operation"]),
            annotations: read_only(),
        },
        ToolDefinition {
            name: EXECUTE_OPERATION.to_string(),
            description: Some(
                "Run an operation through the safety policy. Mutations in standard mode first \
                 return a confirmation token; repeat the call with it to proceed."
                    .to_string(),
            ),
            input_schema: {
                let mut properties = operation_properties();
                if let Some(map) = properties.as_object_mut() {
                    map.insert(
                        "confirmation_token".to_string(),
                        json!({"type": "string", "description": "Token from a previous call"}),
                    );
                    map.insert(
                        "dry_run".to_string(),
                        json!({"type": "boolean", "default": false}),
                    );
                    map.insert(
                        "resume_cursor".to_string(),
                        json!({"type": "string", "description": "Continue a partial read"}),
                    );
                }
                object_schema(properties, &["service", "operation"])
            },
            annotations: Some(ToolAnnotations {
                read_only: Some(false),
                dry_run_supported: Some(true),
                may_require_confirmation: Some(true),
            }),
        },
        ToolDefinition {
            name: GET_SAFETY_MODE.to_string(),
            description: Some("Show the session's safety mode.".to_string()),
            input_schema: object_schema(json!({}), &[]),
            annotations: read_only(),
        },
        ToolDefinition {
            name: SET_SAFETY_MODE.to_string(),
            description: Some(
                "Change the session's safety mode. Operations already running keep the mode \
                 they started with."
                    .to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "mode": {
                        "type": "string",
                        "enum": ["read_only", "standard", "unrestricted"]
                    }
                }),
                &["mode"],
            ),
            annotations: Some(ToolAnnotations {
                read_only: Some(false),
                ..ToolAnnotations::default()
            }),
        },
        ToolDefinition {
            name: DISCOVER_RESOURCES.to_string(),
            description: Some(
                "Run read operations across several services and regions in parallel."
                    .to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "targets": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "service": {"type": "string"},
                                "operation": {"type": "string"},
                                "parameters": {"type": "object"},
                                "regions": {"type": "array", "items": {"type": "string"}}
                            },
                            "required": ["service", "operation"]
                        }
                    }
                }),
                &["targets"],
            ),
            annotations: read_only(),
        },
        ToolDefinition {
            name: BUILD_DEPENDENCY_GRAPH.to_string(),
            description: Some(
                "Discover the resources connected to a resource, using read operations only."
                    .to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "resource": resource_schema(),
                    "max_depth": {"type": "integer", "minimum": 0}
                }),
                &["resource"],
            ),
            annotations: read_only(),
        },
        ToolDefinition {
            name: ANALYZE_IMPACT.to_string(),
            description: Some(
                "List what would break or degrade if a resource were removed. Accepts a \
                 resource or a remembered alias."
                    .to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "resource": resource_schema(),
                    "alias": {"type": "string"},
                    "max_depth": {"type": "integer", "minimum": 0}
                }),
                &[],
            ),
            annotations: read_only(),
        },
        ToolDefinition {
            name: LIST_PENDING_CONFIRMATIONS.to_string(),
            description: Some("List confirmation tokens that are still valid.".to_string()),
            input_schema: object_schema(json!({}), &[]),
            annotations: read_only(),
        },
        ToolDefinition {
            name: OPEN_SESSION.to_string(),
            description: Some(
                "Open a session against an account. It starts in the configured default mode; \
                 pass its id as session_id to act in it."
                    .to_string(),
            ),
            input_schema: object_schema(
                json!({
                    "account_id": {"type": "string"},
                    "profile": {"type": "string", "description": "Credential profile"}
                }),
                &["account_id"],
            ),
            annotations: Some(ToolAnnotations {
                read_only: Some(false),
                ..ToolAnnotations::default()
            }),
        },
        ToolDefinition {
            name: CLOSE_SESSION.to_string(),
            description: Some(
                "Tear a session down, dropping its safety mode and pending confirmations."
                    .to_string(),
            ),
            input_schema: object_schema(json!({}), &[]),
            annotations: Some(ToolAnnotations {
                read_only: Some(false),
                ..ToolAnnotations::default()
            }),
        },
    ]
}
