//! Breadth-first dependency graph builder.
//!
//! Starting at a seed, each node's rules are evaluated to find candidate
//! neighbours. New candidates are confirmed with their describe call, all of
//! a node's candidates at once, before they join the graph. Every call goes
//! through the [`Orchestrator`], so paging, retries and the service
//! concurrency ceilings apply unchanged.

use crate::error::{GraphError, RuleError};
use crate::graph::{Confidence, DependencyEdge, DependencyGraph, Relation};
use crate::rules::{CallTemplate, RuleSet, TypeRules, select, split_type_key};
use futures::future::join_all;
use nimbus_core::config::GraphConfig;
use nimbus_core::{OperationType, ResourceRef};
use nimbus_policy::Classifier;
use nimbus_runtime::{ErrorInfo, ExecutionContext, ExecutionStatus, Orchestrator, ProviderError};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

/// A neighbour proposed by a rule, not yet in the graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Candidate {
    resource: ResourceRef,
    relation: Relation,
    confidence: Confidence,
    /// The edge runs from the candidate to the node.
    inbound: bool,
}

impl Candidate {
    fn edge(&self, node: &ResourceRef) -> DependencyEdge {
        let (from, to) = if self.inbound {
            (self.resource.clone(), node.clone())
        } else {
            (node.clone(), self.resource.clone())
        };
        DependencyEdge::new(from, to, self.relation).with_confidence(self.confidence)
    }
}

/// Result of a describe call.
enum Lookup {
    Found(Vec<Value>),
    Missing,
    Failed(ErrorInfo),
}

/// Response pages of a rule call, and whether they are complete.
#[derive(Clone)]
struct Fetched {
    pages: Vec<Value>,
    complete: bool,
}

/// Builds dependency graphs from relationship rules.
pub struct GraphBuilder {
    rules: Arc<RuleSet>,
    orchestrator: Arc<Orchestrator>,
    max_fan_out: usize,
    default_region: String,
}

impl GraphBuilder {
    /// Fails if any rule would call something other than a read.
    pub fn new(
        rules: Arc<RuleSet>,
        orchestrator: Arc<Orchestrator>,
        classifier: &Classifier,
    ) -> Result<Self, RuleError> {
        rules.check_read_only(classifier)?;
        let default_region = orchestrator.config().default_region.clone();
        Ok(Self {
            rules,
            orchestrator,
            max_fan_out: GraphConfig::default().max_fan_out,
            default_region,
        })
    }

    pub fn from_config(
        config: &GraphConfig,
        orchestrator: Arc<Orchestrator>,
        classifier: &Classifier,
    ) -> Result<Self, RuleError> {
        let rules = RuleSet::from_config(config)?;
        Ok(Self::new(Arc::new(rules), orchestrator, classifier)?.with_max_fan_out(config.max_fan_out))
    }

    pub fn with_max_fan_out(mut self, max_fan_out: usize) -> Self {
        self.max_fan_out = max_fan_out;
        self
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn max_fan_out(&self) -> usize {
        self.max_fan_out
    }

    /// Build the graph around `seed`, expanding nodes up to `max_depth` hops.
    ///
    /// Only a seed problem fails the build. Cancellation through the
    /// context's token returns what was built so far, flagged cancelled.
    pub async fn build(
        &self,
        seed: &ResourceRef,
        max_depth: usize,
        ctx: &ExecutionContext,
    ) -> Result<DependencyGraph, GraphError> {
        let ctx = ExecutionContext {
            operation_type: OperationType::Read,
            resume_cursor: None,
            ..ctx.clone()
        };
        let rules = self
            .rules
            .rules_for(&seed.service, &seed.resource_type)
            .ok_or_else(|| GraphError::UnsupportedType {
                service: seed.service.clone(),
                resource_type: seed.resource_type.clone(),
            })?;
        let seed = self.placed(seed.clone(), rules);

        tracing::info!(seed = %seed, max_depth, "Building dependency graph");
        let seed_data = match self.describe(&seed, rules, &ctx).await {
            Lookup::Found(pages) => pages,
            Lookup::Missing => return Err(GraphError::RootNotFound(seed)),
            Lookup::Failed(error) => {
                return Err(GraphError::SeedUnavailable {
                    resource: seed,
                    error: Box::new(error),
                });
            }
        };

        let mut graph = DependencyGraph::new(seed.clone());
        let mut queue = VecDeque::from([(seed, 0usize, seed_data)]);

        while let Some((node, depth, data)) = queue.pop_front() {
            if ctx.cancel.is_cancelled() {
                graph.mark_cancelled();
                break;
            }
            if depth >= max_depth {
                continue;
            }
            let Some(rules) = self.rules.rules_for(&node.service, &node.resource_type) else {
                continue;
            };

            let (mut candidates, complete) = self.candidates(&node, rules, &data, &ctx).await;
            if ctx.cancel.is_cancelled() {
                graph.mark_cancelled();
                break;
            }
            if !complete {
                graph.mark_truncated(&node);
            }

            let neighbours: BTreeSet<ResourceRef> =
                candidates.iter().map(|c| c.resource.clone()).collect();
            if neighbours.len() > self.max_fan_out {
                tracing::warn!(
                    node = %node,
                    candidates = neighbours.len(),
                    max_fan_out = self.max_fan_out,
                    "Fan-out limit reached, node marked truncated"
                );
                let kept: BTreeSet<ResourceRef> =
                    neighbours.into_iter().take(self.max_fan_out).collect();
                candidates.retain(|c| kept.contains(&c.resource));
                graph.mark_truncated(&node);
            }

            let (known, fresh): (Vec<Candidate>, Vec<Candidate>) = candidates
                .into_iter()
                .partition(|c| graph.contains(&c.resource));
            for candidate in &known {
                let confirmed = graph
                    .node(&candidate.resource)
                    .is_some_and(|n| n.confirmed);
                let edge = candidate.edge(&node);
                graph.add_edge(if confirmed { edge } else { edge.tentative() });
            }

            let unique: BTreeSet<ResourceRef> = fresh.iter().map(|c| c.resource.clone()).collect();
            let lookups = join_all(unique.into_iter().map(|resource| {
                let ctx = &ctx;
                async move {
                    let lookup = match self.rules.rules_for(&resource.service, &resource.resource_type) {
                        Some(rules) => self.describe(&resource, rules, ctx).await,
                        None => Lookup::Missing,
                    };
                    (resource, lookup)
                }
            }))
            .await;
            if ctx.cancel.is_cancelled() {
                graph.mark_cancelled();
                break;
            }

            let mut unconfirmed = BTreeSet::new();
            for (resource, lookup) in lookups {
                match lookup {
                    Lookup::Found(pages) => {
                        graph.add_node(resource.clone(), depth + 1, true);
                        queue.push_back((resource, depth + 1, pages));
                    }
                    Lookup::Missing => {
                        tracing::warn!(
                            node = %node,
                            candidate = %resource,
                            "Candidate no longer exists, dropped"
                        );
                    }
                    Lookup::Failed(error) => {
                        tracing::warn!(
                            node = %node,
                            candidate = %resource,
                            code = %error.code,
                            "Candidate could not be confirmed, keeping a tentative edge"
                        );
                        graph.add_node(resource.clone(), depth + 1, false);
                        graph.mark_truncated(&resource);
                        unconfirmed.insert(resource);
                    }
                }
            }
            for candidate in &fresh {
                let edge = candidate.edge(&node);
                if unconfirmed.contains(&candidate.resource) {
                    graph.add_edge(edge.tentative());
                } else {
                    // Dropped candidates are not nodes, so their edges are ignored.
                    graph.add_edge(edge);
                }
            }
        }

        tracing::info!(
            root = %graph.root(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            truncated = graph.is_truncated(),
            cancelled = graph.is_cancelled(),
            "Dependency graph built"
        );
        Ok(graph)
    }

    /// Global resources carry no region.
    fn placed(&self, mut resource: ResourceRef, rules: &TypeRules) -> ResourceRef {
        if rules.global {
            resource.region.clear();
        }
        resource
    }

    fn call_region(&self, resource: &ResourceRef) -> String {
        if resource.region.is_empty() {
            self.default_region.clone()
        } else {
            resource.region.clone()
        }
    }

    async fn describe(
        &self,
        resource: &ResourceRef,
        rules: &TypeRules,
        ctx: &ExecutionContext,
    ) -> Lookup {
        let request = match rules.describe.call.render(
            &resource.identifier,
            &self.call_region(resource),
            &resource.account,
        ) {
            Ok(request) => request,
            Err(e) => {
                let error = ProviderError::new("InvalidRuleRequest", e.to_string());
                return Lookup::Failed(ErrorInfo::from_provider(&error, 0, 1));
            }
        };

        let outcome = self.orchestrator.execute(&request, ctx).await;
        if let Some(error) = outcome.error.as_ref().filter(|_| outcome.pages.is_empty()) {
            return if error.is_not_found() {
                Lookup::Missing
            } else {
                Lookup::Failed(error.clone())
            };
        }
        let exists = rules
            .describe
            .exists
            .as_deref()
            .is_none_or(|path| !select(&outcome.pages, path).is_empty());
        if exists {
            Lookup::Found(outcome.pages)
        } else {
            Lookup::Missing
        }
    }

    /// Candidate neighbours of `node`, and whether every rule call completed.
    async fn candidates(
        &self,
        node: &ResourceRef,
        rules: &TypeRules,
        data: &[Value],
        ctx: &ExecutionContext,
    ) -> (Vec<Candidate>, bool) {
        let mut candidates = Vec::new();
        let mut complete = true;
        let mut fetched: HashMap<String, Fetched> = HashMap::new();

        for rule in &rules.outgoing {
            let pages = match &rule.source {
                Some(source) => {
                    let result = self.fetch_cached(node, source, ctx, &mut fetched).await;
                    complete &= result.complete;
                    result.pages
                }
                None => data.to_vec(),
            };
            for identifier in rule.identifiers(&pages) {
                if let Some(resource) = self.neighbour(node, &rule.target, identifier) {
                    candidates.push(Candidate {
                        resource,
                        relation: rule.relation,
                        confidence: rule.confidence,
                        inbound: rule.inverse,
                    });
                }
            }
        }

        for rule in &rules.incoming {
            let result = self.fetch_cached(node, &rule.query, ctx, &mut fetched).await;
            complete &= result.complete;
            for identifier in rule.identifiers(&result.pages, &node.identifier) {
                if let Some(resource) = self.neighbour(node, &rule.from, identifier) {
                    candidates.push(Candidate {
                        resource,
                        relation: rule.relation,
                        confidence: rule.confidence,
                        inbound: true,
                    });
                }
            }
        }

        candidates.sort();
        candidates.dedup();
        (candidates, complete)
    }

    /// Rule calls repeated within one node are made once.
    async fn fetch_cached(
        &self,
        node: &ResourceRef,
        template: &CallTemplate,
        ctx: &ExecutionContext,
        cache: &mut HashMap<String, Fetched>,
    ) -> Fetched {
        let request = match template.render(&node.identifier, &self.call_region(node), &node.account) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(node = %node, error = %e, "Invalid rule request");
                return Fetched {
                    pages: Vec::new(),
                    complete: false,
                };
            }
        };
        let key = request.canonical_json();
        if let Some(hit) = cache.get(&key) {
            return hit.clone();
        }

        let outcome = self.orchestrator.execute(&request, ctx).await;
        let complete = outcome.status == ExecutionStatus::Success;
        if !complete {
            tracing::warn!(
                node = %node,
                operation = %request.qualified_name(),
                status = ?outcome.status,
                code = outcome.error.as_ref().map(|e| e.code.as_str()).unwrap_or(""),
                "Rule call incomplete, node marked truncated"
            );
        }
        let result = Fetched {
            pages: outcome.pages,
            complete,
        };
        cache.insert(key, result.clone());
        result
    }

    /// Resource of type `type_key` next to `node`. Self references are skipped.
    fn neighbour(&self, node: &ResourceRef, type_key: &str, identifier: String) -> Option<ResourceRef> {
        let (service, resource_type) = split_type_key(type_key)?;
        let region = if self.rules.is_global(service, resource_type) {
            String::new()
        } else {
            self.call_region(node)
        };
        let resource = ResourceRef::new(service, resource_type, identifier, region, node.account.clone());
        (resource != *node).then_some(resource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::config::ExecutionConfig;
    use nimbus_core::{AccountRef, DocumentCatalog};
    use nimbus_runtime::{MockTransport, Page, RetryPolicy};
    use serde_json::json;

    fn builder(mock: &MockTransport) -> GraphBuilder {
        let orchestrator = Orchestrator::new(
            Arc::new(mock.clone()),
            Arc::new(DocumentCatalog::builtin().unwrap()),
            ExecutionConfig::default(),
        )
        .with_retry_policy(RetryPolicy::none());
        GraphBuilder::new(
            Arc::new(RuleSet::builtin().unwrap()),
            Arc::new(orchestrator),
            &Classifier::builtin().unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unsupported_seed_type() {
        let mock = MockTransport::new();
        let seed = ResourceRef::new("dynamodb", "table", "orders", "us-east-1", AccountRef::new("1"));
        let result = builder(&mock)
            .build(&seed, 2, &ExecutionContext::new(OperationType::Read))
            .await;
        assert!(matches!(result, Err(GraphError::UnsupportedType { .. })));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn test_global_seed_loses_its_region() {
        let mock = MockTransport::new();
        mock.on("iam", "get_role", |_, _| Ok(Page::last(json!({"Role": {"RoleName": "app"}}))));
        let seed = ResourceRef::new("iam", "role", "app", "eu-west-1", AccountRef::new("1"));
        let graph = builder(&mock)
            .build(&seed, 0, &ExecutionContext::new(OperationType::Read))
            .await
            .unwrap();
        assert_eq!(graph.root().region, "");
        assert_eq!(mock.calls()[0].region, ExecutionConfig::default().default_region);
    }
}
