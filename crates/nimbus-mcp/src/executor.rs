//! Tool execution.
//!
//! Maps each tool call onto the pipeline, the session registry and the graph
//! builder. Arguments are deserialized into typed structs; anything that does
//! not fit is an [`McpError::InvalidArguments`].

use crate::error::McpError;
use crate::protocol::CallToolResponse;
use crate::tools;
use nimbus_core::config::NimbusConfig;
use nimbus_core::{
    AccountRef, AliasResolver, OperationRequest, OperationType, Parameters, ResourceRef,
    SafetyMode,
};
use nimbus_graph::{GraphBuilder, analyze_impact};
use nimbus_policy::{Session, SessionRegistry};
use nimbus_runtime::{
    CancellationToken, CloudTransport, Deadline, ExecutionContext, ExecutionStatus, Pipeline,
    PipelineOutcome, RunOptions,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct SessionArgs {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenSessionArgs {
    account_id: String,
    #[serde(default)]
    profile: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClassifyArgs {
    service: String,
    operation: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OperationArgs {
    service: String,
    operation: String,
    #[serde(default)]
    parameters: Parameters,
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExecuteArgs {
    #[serde(flatten)]
    operation: OperationArgs,
    #[serde(default)]
    confirmation_token: Option<String>,
    #[serde(default)]
    dry_run: bool,
    #[serde(default)]
    resume_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetModeArgs {
    mode: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DiscoverTarget {
    service: String,
    operation: String,
    #[serde(default)]
    parameters: Parameters,
    #[serde(default)]
    regions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DiscoverArgs {
    targets: Vec<DiscoverTarget>,
    #[serde(default)]
    session_id: Option<String>,
}

/// A resource given either as an ARN or spelled out.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ResourceArg {
    Arn(String),
    Fields {
        service: String,
        resource_type: String,
        identifier: String,
        #[serde(default)]
        region: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct GraphArgs {
    #[serde(default)]
    resource: Option<ResourceArg>,
    #[serde(default)]
    alias: Option<String>,
    #[serde(default)]
    max_depth: Option<usize>,
    #[serde(default)]
    session_id: Option<String>,
}

/// Runs tool calls against one pipeline.
pub struct ToolExecutor {
    pipeline: Arc<Pipeline>,
    sessions: Arc<SessionRegistry>,
    graph: GraphBuilder,
    aliases: Arc<dyn AliasResolver>,
    account: AccountRef,
    default_region: String,
    max_depth: usize,
}

impl ToolExecutor {
    pub fn new(
        pipeline: Arc<Pipeline>,
        sessions: Arc<SessionRegistry>,
        graph: GraphBuilder,
        aliases: Arc<dyn AliasResolver>,
        account: AccountRef,
    ) -> Self {
        let default_region = pipeline.orchestrator().config().default_region.clone();
        Self {
            pipeline,
            sessions,
            graph,
            aliases,
            account,
            default_region,
            max_depth: nimbus_core::config::GraphConfig::default().max_depth,
        }
    }

    /// Wire an executor from configuration, a transport and an alias store.
    pub fn from_config(
        config: &NimbusConfig,
        transport: Arc<dyn CloudTransport>,
        aliases: Arc<dyn AliasResolver>,
    ) -> Result<Self, McpError> {
        let pipeline = Arc::new(Pipeline::from_config(config, transport)?);
        let graph = GraphBuilder::from_config(
            &config.graph,
            Arc::clone(pipeline.orchestrator()),
            pipeline.policy().classifier(),
        )?;
        let sessions = Arc::new(SessionRegistry::new(&config.safety, &config.execution));

        let mut account = AccountRef::new(&config.mcp.account_id);
        if let Some(profile) = &config.mcp.profile {
            account = account.with_profile(profile);
        }

        Ok(Self::new(pipeline, sessions, graph, aliases, account)
            .with_max_depth(config.graph.max_depth))
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// The session used when a call names none.
    pub fn default_session(&self) -> Arc<Session> {
        self.sessions.for_account(&self.account)
    }

    /// Execute one tool call.
    pub async fn execute(&self, name: &str, arguments: Value) -> Result<CallToolResponse, McpError> {
        tracing::debug!(tool = name, "Executing tool");
        match name {
            tools::CLASSIFY_OPERATION => self.classify(parse(name, arguments)?),
            tools::VALIDATE_OPERATION => self.validate(parse(name, arguments)?),
            tools::EXECUTE_OPERATION => self.execute_operation(parse(name, arguments)?).await,
            tools::GET_SAFETY_MODE => self.get_mode(parse(name, arguments)?),
            tools::SET_SAFETY_MODE => self.set_mode(parse(name, arguments)?),
            tools::DISCOVER_RESOURCES => self.discover(parse(name, arguments)?).await,
            tools::BUILD_DEPENDENCY_GRAPH => self.build_graph(parse(name, arguments)?).await,
            tools::ANALYZE_IMPACT => self.impact(parse(name, arguments)?).await,
            tools::LIST_PENDING_CONFIRMATIONS => self.list_pending(parse(name, arguments)?),
            tools::OPEN_SESSION => self.open_session(parse(name, arguments)?),
            tools::CLOSE_SESSION => self.close_session(parse(name, arguments)?),
            _ => Err(McpError::ToolNotFound {
                name: name.to_string(),
            }),
        }
    }

    fn session(&self, id: Option<&str>) -> Result<Arc<Session>, McpError> {
        match id {
            Some(id) => self
                .sessions
                .get(id)
                .ok_or_else(|| McpError::UnknownSession(id.to_string())),
            None => Ok(self.default_session()),
        }
    }

    fn request(
        &self,
        tool: &str,
        args: OperationArgs,
        session: &Session,
    ) -> Result<OperationRequest, McpError> {
        let region = args.region.unwrap_or_else(|| self.default_region.clone());
        OperationRequest::new(
            &args.service,
            &args.operation,
            args.parameters,
            region,
            session.account().clone(),
        )
        .map_err(|e| McpError::arguments(tool, e))
    }

    fn classify(&self, args: ClassifyArgs) -> Result<CallToolResponse, McpError> {
        let session = self.session(args.session_id.as_deref())?;
        let request = OperationRequest::new(
            &args.service,
            &args.operation,
            Parameters::new(),
            "",
            session.account().clone(),
        )
        .map_err(|e| McpError::arguments(tools::CLASSIFY_OPERATION, e))?;

        let policy = self.pipeline.policy();
        let evaluation = policy.evaluate(
            request.service(),
            request.operation(),
            session.mode_snapshot(),
            false,
        );
        let block_reason = policy
            .denylist()
            .block_reason(request.service(), request.operation());
        let supports_dry_run = policy
            .classifier()
            .supports_dry_run(request.service(), request.operation());

        Ok(CallToolResponse::json(json!({
            "description": evaluation.operation_type.description(),
            "block_reason": block_reason,
            "supports_dry_run": supports_dry_run,
            "evaluation": evaluation,
        })))
    }

    fn validate(&self, args: OperationArgs) -> Result<CallToolResponse, McpError> {
        let session = self.session(args.session_id.as_deref())?;
        let request = self.request(tools::VALIDATE_OPERATION, args, &session)?;
        let result = self.pipeline.validator().validate(&request);
        let valid = result.errors.is_empty();
        let value = serde_json::to_value(&result)?;
        Ok(if valid {
            CallToolResponse::json(value)
        } else {
            CallToolResponse {
                is_error: true,
                ..CallToolResponse::json(value)
            }
        })
    }

    async fn execute_operation(&self, args: ExecuteArgs) -> Result<CallToolResponse, McpError> {
        let session = self.session(args.operation.session_id.as_deref())?;
        let request = self.request(tools::EXECUTE_OPERATION, args.operation, &session)?;
        let options = RunOptions {
            confirmation_token: args.confirmation_token,
            dry_run: args.dry_run,
            resume_cursor: args.resume_cursor,
            cancel: None,
        };

        let outcome = self.pipeline.run(&session, request, options).await;
        let is_error = match &outcome {
            PipelineOutcome::Denied { .. } | PipelineOutcome::Rejected { .. } => true,
            PipelineOutcome::Executed { outcome, .. } => outcome.status == ExecutionStatus::Failed,
            PipelineOutcome::ConfirmationRequired { .. } | PipelineOutcome::DryRun { .. } => false,
        };

        Ok(CallToolResponse {
            is_error,
            ..CallToolResponse::json(serde_json::to_value(&outcome)?)
        })
    }

    fn get_mode(&self, args: SessionArgs) -> Result<CallToolResponse, McpError> {
        let session = self.session(args.session_id.as_deref())?;
        Ok(CallToolResponse::json(serde_json::to_value(session.info())?))
    }

    fn set_mode(&self, args: SetModeArgs) -> Result<CallToolResponse, McpError> {
        let session = self.session(args.session_id.as_deref())?;
        let mode: SafetyMode = args
            .mode
            .parse()
            .map_err(|e| McpError::arguments(tools::SET_SAFETY_MODE, e))?;
        let previous = session.set_mode(mode);
        Ok(CallToolResponse::json(json!({
            "session_id": session.id(),
            "previous": previous,
            "mode": mode,
        })))
    }

    fn open_session(&self, args: OpenSessionArgs) -> Result<CallToolResponse, McpError> {
        let account_id = args.account_id.trim();
        if account_id.is_empty() {
            return Err(McpError::arguments(tools::OPEN_SESSION, "account_id must not be empty"));
        }
        let mut account = AccountRef::new(account_id);
        if let Some(profile) = &args.profile {
            account = account.with_profile(profile);
        }
        let session = self.sessions.open(account);
        Ok(CallToolResponse::json(serde_json::to_value(session.info())?))
    }

    fn close_session(&self, args: SessionArgs) -> Result<CallToolResponse, McpError> {
        let session = self.session(args.session_id.as_deref())?;
        let pending = session.confirmations().list_pending().len();
        self.sessions.close(session.id());
        Ok(CallToolResponse::json(json!({
            "session_id": session.id(),
            "closed": true,
            "dropped_confirmations": pending,
        })))
    }

    /// Tear down every session. Called when the client goes away.
    pub fn close_sessions(&self) -> usize {
        self.sessions.close_all()
    }

    async fn discover(&self, args: DiscoverArgs) -> Result<CallToolResponse, McpError> {
        if args.targets.is_empty() {
            return Err(McpError::arguments(
                tools::DISCOVER_RESOURCES,
                "at least one target is required",
            ));
        }
        let session = self.session(args.session_id.as_deref())?;

        let mut requests = Vec::new();
        for target in args.targets {
            let regions = if target.regions.is_empty() {
                vec![self.default_region.clone()]
            } else {
                target.regions
            };
            for region in regions {
                let request = OperationRequest::new(
                    &target.service,
                    &target.operation,
                    target.parameters.clone(),
                    region,
                    session.account().clone(),
                )
                .map_err(|e| McpError::arguments(tools::DISCOVER_RESOURCES, e))?;
                requests.push(request);
            }
        }

        let results = self
            .pipeline
            .discover(&session, requests, CancellationToken::new())
            .await?;
        Ok(CallToolResponse::json(json!({ "results": results })))
    }

    fn target(
        &self,
        tool: &str,
        args: &GraphArgs,
        account: &AccountRef,
    ) -> Result<ResourceRef, McpError> {
        match (&args.resource, &args.alias) {
            (Some(ResourceArg::Arn(arn)), _) => {
                ResourceRef::from_arn(arn, account).map_err(|e| McpError::arguments(tool, e))
            }
            (
                Some(ResourceArg::Fields {
                    service,
                    resource_type,
                    identifier,
                    region,
                }),
                _,
            ) => Ok(ResourceRef::new(
                service.trim().to_ascii_lowercase(),
                resource_type,
                identifier,
                region.clone().unwrap_or_else(|| self.default_region.clone()),
                account.clone(),
            )),
            (None, Some(alias)) => self
                .aliases
                .resolve_alias(alias)
                .ok_or_else(|| McpError::UnknownAlias(alias.clone())),
            (None, None) => Err(McpError::arguments(tool, "either resource or alias is required")),
        }
    }

    async fn graph_for(
        &self,
        tool: &str,
        args: GraphArgs,
    ) -> Result<nimbus_graph::DependencyGraph, McpError> {
        let session = self.session(args.session_id.as_deref())?;
        let seed = self.target(tool, &args, session.account())?;
        let max_depth = args.max_depth.unwrap_or(self.max_depth);

        let deadline = Deadline::new(&CancellationToken::new(), self.pipeline.investigation_timeout());
        let ctx = ExecutionContext::new(OperationType::Read)
            .with_worker_pool(session.worker_pool())
            .with_cancel(deadline.token().clone());

        tracing::info!(
            resource = %seed.short(),
            max_depth,
            session = session.id(),
            "Building dependency graph"
        );
        Ok(self.graph.build(&seed, max_depth, &ctx).await?)
    }

    async fn build_graph(&self, args: GraphArgs) -> Result<CallToolResponse, McpError> {
        let graph = self.graph_for(tools::BUILD_DEPENDENCY_GRAPH, args).await?;
        Ok(CallToolResponse::json(serde_json::to_value(&graph)?))
    }

    async fn impact(&self, args: GraphArgs) -> Result<CallToolResponse, McpError> {
        let graph = self.graph_for(tools::ANALYZE_IMPACT, args).await?;
        let report = analyze_impact(&graph, graph.root());
        Ok(CallToolResponse::json(json!({
            "report": report,
            "graph": {
                "nodes": graph.node_count(),
                "edges": graph.edge_count(),
                "cancelled": graph.is_cancelled(),
            },
        })))
    }

    fn list_pending(&self, args: SessionArgs) -> Result<CallToolResponse, McpError> {
        let session = self.session(args.session_id.as_deref())?;
        let pending = session.confirmations().list_pending();
        Ok(CallToolResponse::json(json!({
            "session_id": session.id(),
            "pending": pending,
        })))
    }
}

fn parse<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, McpError> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| McpError::arguments(tool, e))
}
