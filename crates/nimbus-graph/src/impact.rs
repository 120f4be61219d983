//! Impact analysis.
//!
//! Answers "what breaks if this resource changes or goes away" from a built
//! graph. A dependent that cannot work without the target (attached security
//! group, containing network, direct use) is a hard failure; anything reached
//! further out over confirmed edges is degraded. Tentative edges never
//! produce hard failures; they are listed apart with low confidence.

use crate::graph::{Confidence, DependencyEdge, DependencyGraph, Relation};
use nimbus_core::ResourceRef;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

const HIGH_RISK_THRESHOLD: usize = 20;
const MEDIUM_RISK_THRESHOLD: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    HardFailure,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImpactConfidence {
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn for_count(affected: usize) -> Self {
        if affected > HIGH_RISK_THRESHOLD {
            RiskLevel::High
        } else if affected > MEDIUM_RISK_THRESHOLD {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn recommendation(self, affected: usize) -> String {
        match self {
            RiskLevel::High => format!(
                "This resource has {} dependencies. Strongly recommend creating a backup and \
                 testing in staging before any changes. Consider implementing the change during \
                 a maintenance window.",
                affected
            ),
            RiskLevel::Medium => format!(
                "This resource has {} dependencies. Review the dependency list and ensure all \
                 dependent services can handle the change.",
                affected
            ),
            RiskLevel::Low => {
                "This resource has minimal dependencies. Changes should have limited impact."
                    .to_string()
            }
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

/// One resource affected by a change to the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AffectedResource {
    pub resource: ResourceRef,
    pub severity: Severity,
    /// Relation of the edge that reached this resource.
    pub relation: Relation,
    /// The resource it depends on along the shortest path.
    pub via: ResourceRef,
    pub hops: usize,
    pub confidence: ImpactConfidence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub target: ResourceRef,
    /// Confirmed impact: hard failures first, then by distance.
    pub affected: Vec<AffectedResource>,
    /// Possible impact over tentative edges.
    pub tentative: Vec<AffectedResource>,
    pub hard_failures: usize,
    pub degraded: usize,
    pub risk_level: RiskLevel,
    pub recommendation: String,
    pub affected_by_service: BTreeMap<String, usize>,
    /// The graph was incomplete; more resources may be affected.
    pub truncated: bool,
}

impl ImpactReport {
    pub fn is_empty(&self) -> bool {
        self.affected.is_empty() && self.tentative.is_empty()
    }
}

/// Edges naming `resource` as the dependency, with the dependent.
fn dependents<'a>(
    graph: &'a DependencyGraph,
    resource: &'a ResourceRef,
) -> impl Iterator<Item = (ResourceRef, DependencyEdge)> + 'a {
    graph.edges_of(resource).into_iter().filter_map(move |edge| {
        let (dependent, dependency) = edge.dependency_pair();
        (dependency == resource && dependent != resource).then(|| (dependent.clone(), edge.clone()))
    })
}

fn is_hard(relation: Relation, via_target: bool) -> bool {
    match relation {
        Relation::SecuredBy | Relation::Contains | Relation::DeployedTo => true,
        Relation::Uses | Relation::IsUsedBy => via_target,
        _ => false,
    }
}

struct Reach {
    relation: Relation,
    via: ResourceRef,
    hops: usize,
}

/// Breadth-first over confirmed dependency edges, following only those
/// `follow` accepts. First sighting wins, which gives shortest paths.
fn reach(
    graph: &DependencyGraph,
    target: &ResourceRef,
    follow: impl Fn(&DependencyEdge, &ResourceRef) -> bool,
) -> BTreeMap<ResourceRef, Reach> {
    let mut reached: BTreeMap<ResourceRef, Reach> = BTreeMap::new();
    let mut queue = VecDeque::from([(target.clone(), 0usize)]);
    while let Some((current, hops)) = queue.pop_front() {
        for (dependent, edge) in dependents(graph, &current) {
            if edge.confidence != Confidence::Confirmed
                || !follow(&edge, &current)
                || dependent == *target
                || reached.contains_key(&dependent)
            {
                continue;
            }
            reached.insert(
                dependent.clone(),
                Reach {
                    relation: edge.relation,
                    via: current.clone(),
                    hops: hops + 1,
                },
            );
            queue.push_back((dependent, hops + 1));
        }
    }
    reached
}

/// Classify everything in `graph` that depends on `target`.
///
/// A target missing from the graph yields an empty report.
pub fn analyze_impact(graph: &DependencyGraph, target: &ResourceRef) -> ImpactReport {
    if !graph.contains(target) {
        return report(target.clone(), Vec::new(), Vec::new(), graph.is_truncated());
    }

    let hard = reach(graph, target, |edge, via| is_hard(edge.relation, via == target));
    let all = reach(graph, target, |_, _| true);

    let mut affected: Vec<AffectedResource> = all
        .into_iter()
        .map(|(resource, reached)| match hard.get(&resource) {
            Some(h) => AffectedResource {
                resource,
                severity: Severity::HardFailure,
                relation: h.relation,
                via: h.via.clone(),
                hops: h.hops,
                confidence: ImpactConfidence::High,
            },
            None => AffectedResource {
                resource,
                severity: Severity::Degraded,
                relation: reached.relation,
                via: reached.via,
                hops: reached.hops,
                confidence: ImpactConfidence::High,
            },
        })
        .collect();
    affected.sort_by(|a, b| {
        (a.severity, a.hops, &a.resource).cmp(&(b.severity, b.hops, &b.resource))
    });

    let mut exposed: BTreeSet<ResourceRef> =
        affected.iter().map(|a| a.resource.clone()).collect();
    exposed.insert(target.clone());
    let mut tentative: BTreeMap<ResourceRef, AffectedResource> = BTreeMap::new();
    for edge in graph.edges() {
        if edge.confidence != Confidence::Tentative {
            continue;
        }
        let (dependent, dependency) = edge.dependency_pair();
        if !exposed.contains(dependency) || exposed.contains(dependent) {
            continue;
        }
        let hops = affected
            .iter()
            .find(|a| &a.resource == dependency)
            .map_or(1, |a| a.hops + 1);
        tentative
            .entry(dependent.clone())
            .or_insert_with(|| AffectedResource {
                resource: dependent.clone(),
                severity: Severity::Degraded,
                relation: edge.relation,
                via: dependency.clone(),
                hops,
                confidence: ImpactConfidence::Low,
            });
    }

    report(
        target.clone(),
        affected,
        tentative.into_values().collect(),
        graph.is_truncated(),
    )
}

fn report(
    target: ResourceRef,
    affected: Vec<AffectedResource>,
    tentative: Vec<AffectedResource>,
    truncated: bool,
) -> ImpactReport {
    let hard_failures = affected
        .iter()
        .filter(|a| a.severity == Severity::HardFailure)
        .count();
    let mut affected_by_service = BTreeMap::new();
    for a in &affected {
        *affected_by_service.entry(a.resource.service.clone()).or_insert(0) += 1;
    }
    let risk_level = RiskLevel::for_count(affected.len());
    ImpactReport {
        target,
        hard_failures,
        degraded: affected.len() - hard_failures,
        recommendation: risk_level.recommendation(affected.len()),
        risk_level,
        affected_by_service,
        affected,
        tentative,
        truncated,
    }
}
