//! Breadth-first constraint propagation, consistent selection and validation.
//!
//! Set precedence when an object is reached more than once:
//! required > excluded > restricted > preferred. A `requires` that hits an excluded
//! object (or the reverse) is recorded as a conflict, never resolved silently.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::{ConstraintEdge, ConstraintGraph, EdgeKind, Modification, NodeId};
use crate::config::ConstraintConfig;
use crate::error::{LexisError, Result, Violation, ViolationKind};
use crate::priority::PriorityResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Propagation {
    pub required: BTreeSet<String>,
    pub excluded: BTreeSet<String>,
    pub restricted: BTreeSet<String>,
    pub preferred: BTreeSet<String>,
    /// Attribute modifications forced on restricted objects
    pub modifications: BTreeMap<String, Vec<Modification>>,
    /// Hard constraints that propagation could not satisfy
    pub conflicts: Vec<Violation>,
    pub steps: usize,
    pub truncated: bool,
    pub cycle_detected: bool,
}

impl Propagation {
    pub fn is_consistent(&self) -> bool {
        self.conflicts.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    /// Accepted objects in acceptance order (required companions follow their trigger)
    pub selected: Vec<String>,
    pub skipped: Vec<String>,
    pub propagation: Propagation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPolicy {
    DropLowerPriority,
    AcceptDegraded,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub selected: Vec<String>,
    pub dropped: Vec<String>,
    /// Violations still present; non-empty only for a degraded selection
    pub violations: Vec<Violation>,
    pub degraded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Membership {
    Preferred,
    Restricted,
    Excluded,
    Required,
}

#[derive(Debug, Clone, Default)]
pub struct ConstraintPropagator {
    config: ConstraintConfig,
}

impl ConstraintPropagator {
    pub fn new(config: ConstraintConfig) -> Self {
        Self { config }
    }

    pub fn propagate<S: AsRef<str>>(
        &self,
        graph: &ConstraintGraph,
        trigger: &[S],
    ) -> Result<Propagation> {
        if trigger.is_empty() {
            return Err(LexisError::no_candidate("constraint propagation"));
        }
        let roots = trigger
            .iter()
            .map(|id| {
                graph.node_id(id.as_ref()).ok_or_else(|| {
                    LexisError::malformed(
                        format!("trigger[{}]", id.as_ref()),
                        "not in the candidate pool",
                    )
                })
            })
            .collect::<Result<Vec<NodeId>>>()?;

        let mut membership: HashMap<NodeId, Membership> = HashMap::new();
        let mut parent: HashMap<NodeId, NodeId> = HashMap::new();
        let mut modifications: BTreeMap<String, BTreeSet<Modification>> = BTreeMap::new();
        let mut conflicts = Vec::new();
        let mut queue = VecDeque::new();
        let mut processed = HashSet::new();

        for &root in &roots {
            membership.insert(root, Membership::Required);
            queue.push_back(root);
        }

        let mut steps = 0;
        let mut truncated = false;
        let mut cycle_detected = false;

        while let Some(node) = queue.pop_front() {
            if !processed.insert(node) {
                continue;
            }
            if steps >= self.config.max_propagation_steps {
                truncated = true;
                tracing::warn!(steps, "constraint propagation hit the step budget");
                break;
            }
            steps += 1;

            let mut groups: BTreeMap<usize, Vec<&ConstraintEdge>> = BTreeMap::new();
            for edge in graph.outgoing(node) {
                match edge.kind {
                    EdgeKind::Requires => groups.entry(edge.group).or_default().push(edge),
                    EdgeKind::Excludes => {
                        if membership.get(&edge.target) == Some(&Membership::Required) {
                            conflicts.push(violation(graph, edge, ViolationKind::MutualExclusion));
                        } else {
                            membership.insert(edge.target, Membership::Excluded);
                        }
                    }
                    EdgeKind::Restricts => {
                        if raise(&mut membership, edge.target, Membership::Restricted) {
                            if let Some(m) = &edge.modification {
                                modifications
                                    .entry(graph.object_id(edge.target).to_string())
                                    .or_default()
                                    .insert(m.clone());
                            }
                        }
                    }
                    EdgeKind::Prefers => {
                        raise(&mut membership, edge.target, Membership::Preferred);
                    }
                }
            }

            conflicts.extend(unmet_violations(graph, node));

            for edges in groups.values() {
                if let Some(satisfied) = edges
                    .iter()
                    .find(|e| membership.get(&e.target) == Some(&Membership::Required))
                {
                    if is_ancestor(&parent, satisfied.target, node) {
                        cycle_detected = true;
                    }
                    continue;
                }

                let candidate = edges
                    .iter()
                    .filter(|e| membership.get(&e.target) != Some(&Membership::Excluded))
                    .max_by(|a, b| {
                        a.strength
                            .total_cmp(&b.strength)
                            .then_with(|| graph.priority(a.target).total_cmp(&graph.priority(b.target)))
                            .then_with(|| b.target.cmp(&a.target))
                    });

                match candidate {
                    Some(edge) => {
                        membership.insert(edge.target, Membership::Required);
                        parent.insert(edge.target, node);
                        queue.push_back(edge.target);
                    }
                    None => {
                        if let Some(first) = edges.first() {
                            conflicts.push(violation(
                                graph,
                                first,
                                ViolationKind::MissingRequirement,
                            ));
                        }
                    }
                }
            }
        }

        if cycle_detected {
            truncated = true;
            tracing::warn!("cycle detected in requires edges; propagation truncated");
        }

        let mut out = Propagation {
            steps,
            truncated,
            cycle_detected,
            conflicts,
            ..Default::default()
        };
        for (node, member) in membership {
            let id = graph.object_id(node).to_string();
            match member {
                Membership::Required => out.required.insert(id),
                Membership::Excluded => out.excluded.insert(id),
                Membership::Restricted => out.restricted.insert(id),
                Membership::Preferred => out.preferred.insert(id),
            };
        }
        out.modifications = modifications
            .into_iter()
            .filter(|(id, _)| out.restricted.contains(id))
            .map(|(id, mods)| (id, mods.into_iter().collect()))
            .collect();
        Ok(out)
    }

    /// Greedy consistent selection over priority-ranked candidates.
    ///
    /// A candidate is accepted only if propagating the enlarged selection stays
    /// conflict-free and its required companions fit within `limit`.
    pub fn select(
        &self,
        ranked: &[PriorityResult],
        graph: &ConstraintGraph,
        limit: usize,
    ) -> Result<Selection> {
        if ranked.is_empty() || limit == 0 {
            return Err(LexisError::no_candidate("constraint selection"));
        }

        let mut selected: Vec<String> = Vec::new();
        let mut skipped = Vec::new();
        let mut current: Option<Propagation> = None;

        for candidate in ranked {
            if selected.len() >= limit {
                break;
            }
            let id = &candidate.object_id;
            if selected.contains(id) {
                continue;
            }
            if current.as_ref().is_some_and(|p| p.excluded.contains(id)) {
                skipped.push(id.clone());
                continue;
            }

            let mut trial: Vec<&str> = selected.iter().map(String::as_str).collect();
            trial.push(id);
            let propagation = self.propagate(graph, &trial)?;

            let companions: Vec<String> = propagation
                .required
                .iter()
                .filter(|r| !selected.contains(r) && *r != id)
                .cloned()
                .collect();
            if !propagation.is_consistent() || selected.len() + 1 + companions.len() > limit {
                skipped.push(id.clone());
                continue;
            }

            selected.push(id.clone());
            selected.extend(companions);
            current = Some(propagation);
        }

        match current {
            Some(propagation) => Ok(Selection {
                selected,
                skipped,
                propagation,
            }),
            None => Err(LexisError::no_candidate("constraint selection")),
        }
    }

    /// Every hard violation between jointly selected objects.
    pub fn violations<S: AsRef<str>>(
        &self,
        selection: &[S],
        graph: &ConstraintGraph,
    ) -> Vec<Violation> {
        let chosen: HashSet<NodeId> = selection
            .iter()
            .filter_map(|id| graph.node_id(id.as_ref()))
            .collect();
        let mut seen_pairs = HashSet::new();
        let mut out = Vec::new();

        let mut ordered: Vec<NodeId> = chosen.iter().copied().collect();
        ordered.sort();
        for node in ordered {
            let mut groups: BTreeMap<usize, Vec<&ConstraintEdge>> = BTreeMap::new();
            for edge in graph.outgoing(node) {
                match edge.kind {
                    EdgeKind::Excludes if chosen.contains(&edge.target) => {
                        let pair = (edge.source.min(edge.target), edge.source.max(edge.target));
                        if seen_pairs.insert(pair) {
                            out.push(violation(graph, edge, ViolationKind::MutualExclusion));
                        }
                    }
                    EdgeKind::Requires => groups.entry(edge.group).or_default().push(edge),
                    _ => {}
                }
            }
            out.extend(unmet_violations(graph, node));
            for edges in groups.values() {
                if !edges.iter().any(|e| chosen.contains(&e.target)) {
                    if let Some(first) = edges.first() {
                        out.push(violation(graph, first, ViolationKind::MissingRequirement));
                    }
                }
            }
        }
        out
    }

    pub fn validate<S: AsRef<str>>(&self, selection: &[S], graph: &ConstraintGraph) -> Result<()> {
        let violations = self.violations(selection, graph);
        if violations.is_empty() {
            return Ok(());
        }
        tracing::warn!(
            count = violations.len(),
            first = %violations[0],
            "hard constraint violated"
        );
        Err(LexisError::ConstraintViolation(violations))
    }

    /// Repair a selection given in priority order.
    pub fn resolve<S: AsRef<str>>(
        &self,
        selection: &[S],
        graph: &ConstraintGraph,
        policy: ResolutionPolicy,
    ) -> Resolution {
        let mut selected: Vec<String> = selection.iter().map(|s| s.as_ref().to_string()).collect();

        match policy {
            ResolutionPolicy::AcceptDegraded => {
                let violations = self.violations(&selected, graph);
                let degraded = !violations.is_empty();
                Resolution {
                    selected,
                    dropped: Vec::new(),
                    violations,
                    degraded,
                }
            }
            ResolutionPolicy::DropLowerPriority => {
                let mut dropped = Vec::new();
                loop {
                    let violations = self.violations(&selected, graph);
                    let Some(first) = violations.first() else {
                        break;
                    };
                    let victim = match first.kind {
                        ViolationKind::MissingRequirement => first.source.clone(),
                        ViolationKind::MutualExclusion => {
                            let pos = |id: &str| selected.iter().position(|s| s == id);
                            if pos(&first.source) > pos(&first.target) {
                                first.source.clone()
                            } else {
                                first.target.clone()
                            }
                        }
                    };
                    selected.retain(|s| *s != victim);
                    dropped.push(victim);
                }
                Resolution {
                    selected,
                    dropped,
                    violations: Vec::new(),
                    degraded: false,
                }
            }
        }
    }
}

/// Record `level` unless the node already holds an equal or stronger membership.
fn raise(membership: &mut HashMap<NodeId, Membership>, node: NodeId, level: Membership) -> bool {
    match membership.get(&node) {
        Some(existing) if *existing >= level => false,
        _ => {
            membership.insert(node, level);
            true
        }
    }
}

fn is_ancestor(parent: &HashMap<NodeId, NodeId>, candidate: NodeId, node: NodeId) -> bool {
    let mut current = node;
    let mut hops = 0;
    while hops <= parent.len() {
        if current == candidate {
            return true;
        }
        match parent.get(&current) {
            Some(&p) => current = p,
            None => return false,
        }
        hops += 1;
    }
    false
}

/// Requirements of `node` that no pool object can satisfy; the target is the missing tag.
fn unmet_violations(
    graph: &ConstraintGraph,
    node: NodeId,
) -> impl Iterator<Item = Violation> + '_ {
    graph.unmet(node).iter().map(move |u| Violation {
        source: graph.object_id(node).to_string(),
        target: u.target_tag.clone(),
        kind: ViolationKind::MissingRequirement,
    })
}

fn violation(graph: &ConstraintGraph, edge: &ConstraintEdge, kind: ViolationKind) -> Violation {
    Violation {
        source: graph.object_id(edge.source).to_string(),
        target: graph.object_id(edge.target).to_string(),
        kind,
    }
}
