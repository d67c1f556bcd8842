//! Constraint Propagator - linguistic consistency of a practice selection
//!
//! The graph is an arena: nodes and edges live in vectors and refer to each other
//! through `NodeId` indices, so propagation order is deterministic.
//!
//! Edge sources:
//! - significant lexical relations with NPMI ≥ `min_relation_strength` → `prefers`
//! - the rule table, matched on object tags → `requires` / `excludes` / `restricts` / `prefers`
//!
//! `excludes` is stored in both directions. All `requires` edges created by one rule
//! for one source form a disjunction group. A `requires` rule with no matching target in
//! the pool is kept as an unmet requirement on its source.

pub mod propagate;
pub mod rules;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::ConstraintConfig;
use crate::error::{LexisError, Result};
use crate::lexical::LexicalRelationIndex;
use crate::sanitize::ensure_in_range;
use crate::types::LanguageObject;

pub use propagate::{
    ConstraintPropagator, Propagation, Resolution, ResolutionPolicy, Selection,
};
pub use rules::{LinguisticRule, RuleTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Requires,
    Excludes,
    Prefers,
    Restricts,
}

impl EdgeKind {
    pub fn is_hard(&self) -> bool {
        matches!(self, EdgeKind::Requires | EdgeKind::Excludes)
    }
}

/// Attribute forced on an object, e.g. `tense = past`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Modification {
    pub attribute: String,
    pub value: String,
}

impl Modification {
    pub fn new(attribute: &str, value: &str) -> Self {
        Self {
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    pub strength: f64,
    pub rule: Option<String>,
    pub modification: Option<Modification>,
    /// Disjunction group; requires-edges sharing a group are alternatives
    pub group: usize,
}

/// A `requires` rule matched by a source object but by no candidate target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmetRequirement {
    pub rule: String,
    pub target_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Node {
    id: String,
    priority: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ConstraintGraph {
    nodes: Vec<Node>,
    index: HashMap<String, NodeId>,
    edges: Vec<ConstraintEdge>,
    outgoing: Vec<Vec<usize>>,
    unmet: Vec<Vec<UnmetRequirement>>,
    next_group: usize,
}

impl ConstraintGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph over a candidate pool; static for the session.
    pub fn build(
        objects: &[LanguageObject],
        relations: Option<&LexicalRelationIndex>,
        rules: &RuleTable,
        config: &ConstraintConfig,
    ) -> Result<Self> {
        rules.validate()?;
        let mut graph = Self::new();
        for object in objects {
            graph.add_node(&object.id, object.priority)?;
        }

        if let Some(index) = relations {
            for (i, a) in objects.iter().enumerate() {
                for (j, b) in objects.iter().enumerate().skip(i + 1) {
                    let Some(rel) = index.relation(&a.content, &b.content) else {
                        continue;
                    };
                    if rel.npmi < config.min_relation_strength {
                        continue;
                    }
                    let strength = rel.npmi.clamp(0.0, 1.0);
                    graph.push_edge(NodeId(i), NodeId(j), EdgeKind::Prefers, strength, None, None);
                    graph.push_edge(NodeId(j), NodeId(i), EdgeKind::Prefers, strength, None, None);
                }
            }
        }

        for rule in rules.rules() {
            for (i, source) in objects.iter().enumerate() {
                if !source.has_tag(&rule.source_tag) {
                    continue;
                }
                let group = graph.allocate_group();
                let mut matched = false;
                for (j, target) in objects.iter().enumerate() {
                    if i == j || !target.has_tag(&rule.target_tag) {
                        continue;
                    }
                    matched = true;
                    graph.push_grouped(
                        NodeId(i),
                        NodeId(j),
                        rule.kind,
                        rule.strength,
                        Some(rule.id.clone()),
                        rule.modification.clone(),
                        group,
                    );
                    if rule.kind == EdgeKind::Excludes {
                        graph.push_edge(
                            NodeId(j),
                            NodeId(i),
                            EdgeKind::Excludes,
                            rule.strength,
                            Some(rule.id.clone()),
                            None,
                        );
                    }
                }
                if !matched && rule.kind == EdgeKind::Requires {
                    graph.unmet[i].push(UnmetRequirement {
                        rule: rule.id.clone(),
                        target_tag: rule.target_tag.clone(),
                    });
                }
            }
        }

        tracing::debug!(
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            unmet = graph.unmet.iter().map(Vec::len).sum::<usize>(),
            "constraint graph built"
        );
        Ok(graph)
    }

    pub fn add_node(&mut self, id: &str, priority: f64) -> Result<NodeId> {
        if self.index.contains_key(id) {
            return Err(LexisError::malformed(
                format!("graph.node[{id}]"),
                "duplicate object id",
            ));
        }
        let node = NodeId(self.nodes.len());
        self.nodes.push(Node {
            id: id.to_string(),
            priority,
        });
        self.outgoing.push(Vec::new());
        self.unmet.push(Vec::new());
        self.index.insert(id.to_string(), node);
        Ok(node)
    }

    /// Single edge in its own disjunction group.
    pub fn add_edge(
        &mut self,
        source: &str,
        target: &str,
        kind: EdgeKind,
        strength: f64,
    ) -> Result<()> {
        ensure_in_range("edge.strength", strength, 0.0, 1.0)?;
        let s = self.require_node(source)?;
        let t = self.require_node(target)?;
        self.push_edge(s, t, kind, strength, None, None);
        if kind == EdgeKind::Excludes {
            self.push_edge(t, s, kind, strength, None, None);
        }
        Ok(())
    }

    fn require_node(&self, id: &str) -> Result<NodeId> {
        self.node_id(id)
            .ok_or_else(|| LexisError::malformed(format!("graph.node[{id}]"), "unknown object id"))
    }

    fn allocate_group(&mut self) -> usize {
        let group = self.next_group;
        self.next_group += 1;
        group
    }

    fn push_edge(
        &mut self,
        source: NodeId,
        target: NodeId,
        kind: EdgeKind,
        strength: f64,
        rule: Option<String>,
        modification: Option<Modification>,
    ) {
        let group = self.allocate_group();
        self.push_grouped(source, target, kind, strength, rule, modification, group);
    }

    #[allow(clippy::too_many_arguments)]
    fn push_grouped(
        &mut self,
        source: NodeId,
        target: NodeId,
        kind: EdgeKind,
        strength: f64,
        rule: Option<String>,
        modification: Option<Modification>,
        group: usize,
    ) {
        self.outgoing[source.0].push(self.edges.len());
        self.edges.push(ConstraintEdge {
            source,
            target,
            kind,
            strength,
            rule,
            modification,
            group,
        });
    }

    pub fn node_id(&self, id: &str) -> Option<NodeId> {
        self.index.get(id).copied()
    }

    pub fn object_id(&self, node: NodeId) -> &str {
        &self.nodes[node.0].id
    }

    pub fn priority(&self, node: NodeId) -> f64 {
        self.nodes[node.0].priority
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edges(&self) -> &[ConstraintEdge] {
        &self.edges
    }

    pub fn outgoing(&self, node: NodeId) -> impl Iterator<Item = &ConstraintEdge> {
        self.outgoing[node.0].iter().map(move |&e| &self.edges[e])
    }

    pub fn unmet(&self, node: NodeId) -> &[UnmetRequirement] {
        &self.unmet[node.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LexicalConfig;
    use crate::types::LanguageComponent;

    fn obj(id: &str, tags: &[&str]) -> LanguageObject {
        LanguageObject::new(id, id, LanguageComponent::Syntactic).with_tags(tags.iter().copied())
    }

    #[test]
    fn test_rule_edges_from_tags() {
        let objects = vec![
            obj("passive", &["passive_voice"]),
            obj("write", &["verb:transitive"]),
            obj("sleep", &["verb:intransitive"]),
        ];
        let graph = ConstraintGraph::build(
            &objects,
            None,
            &RuleTable::standard(),
            &ConstraintConfig::default(),
        )
        .unwrap();
        let passive = graph.node_id("passive").unwrap();
        let edges: Vec<_> = graph.outgoing(passive).collect();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, EdgeKind::Requires);
        assert_eq!(graph.object_id(edges[0].target), "write");
    }

    #[test]
    fn test_requires_without_target_is_unmet() {
        let objects = vec![
            obj("passive", &["passive_voice"]),
            obj("sleep", &["verb:intransitive"]),
        ];
        let graph = ConstraintGraph::build(
            &objects,
            None,
            &RuleTable::standard(),
            &ConstraintConfig::default(),
        )
        .unwrap();
        let passive = graph.node_id("passive").unwrap();
        assert_eq!(graph.outgoing(passive).count(), 0);
        assert_eq!(graph.unmet(passive).len(), 1);
        assert_eq!(graph.unmet(passive)[0].target_tag, "verb:transitive");
        assert!(graph.unmet(graph.node_id("sleep").unwrap()).is_empty());
    }

    #[test]
    fn test_excludes_stored_both_ways() {
        let objects = vec![
            obj("hereby", &["register:formal"]),
            obj("gonna", &["register:colloquial"]),
        ];
        let graph = ConstraintGraph::build(
            &objects,
            None,
            &RuleTable::standard(),
            &ConstraintConfig::default(),
        )
        .unwrap();
        let gonna = graph.node_id("gonna").unwrap();
        assert!(graph
            .outgoing(gonna)
            .any(|e| e.kind == EdgeKind::Excludes && graph.object_id(e.target) == "hereby"));
    }

    #[test]
    fn test_lexical_relations_become_prefers() {
        let index = LexicalRelationIndex::build(
            &["a", "b", "x", "y", "a", "b", "z", "w", "a", "b", "q", "r"],
            LexicalConfig {
                window: 2,
                ..Default::default()
            },
        )
        .unwrap();
        let objects = vec![obj("a", &[]), obj("b", &[])];
        let graph = ConstraintGraph::build(
            &objects,
            Some(&index),
            &RuleTable::new(),
            &ConstraintConfig::default(),
        )
        .unwrap();
        assert_eq!(graph.edges().len(), 2);
        assert!(graph.edges().iter().all(|e| e.kind == EdgeKind::Prefers));
        assert!(graph.edges().iter().all(|e| (0.0..=1.0).contains(&e.strength)));
    }

    #[test]
    fn test_add_edge_validates() {
        let mut graph = ConstraintGraph::new();
        graph.add_node("x", 0.5).unwrap();
        graph.add_node("y", 0.5).unwrap();
        assert!(graph.add_edge("x", "y", EdgeKind::Requires, 1.2).is_err());
        assert!(graph.add_edge("x", "missing", EdgeKind::Requires, 0.5).is_err());
        assert!(graph.add_node("x", 0.1).is_err());
        assert!(graph.add_edge("x", "y", EdgeKind::Requires, 0.5).is_ok());
    }
}
