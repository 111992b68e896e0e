//! # Dependency Graph
//!
//! Directed graph of entity types built from forward relations.
//!
//! - An edge `A -> B` exists for every forward relation from `A` to `B`
//! - Only forward-exact edges constrain the generation order; fuzzy and
//!   backward relations resolve by lookup
//! - A forward-exact cycle is fatal only when every edge on it is required
//!   and single; otherwise it is cut at an optional/array edge, which is
//!   reported as deferred (filled through the shell-then-patch path)
//!
//! Iteration follows declaration order everywhere, so the produced order is
//! deterministic for a given schema.

use crate::WeaveError;
use crate::schema::{Direction, Operator, ParsedSchema};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// EDGES
// =============================================================================

/// One forward relation between two entity types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    /// Source entity type.
    pub from: String,
    /// Target entity type (one edge per union candidate).
    pub to: String,
    /// The relation field on `from`.
    pub field: String,
    pub operator: Operator,
    /// The field may legitimately stay empty (optional or array).
    pub deferrable: bool,
}

impl DependencyEdge {
    fn key(&self) -> (String, String, String) {
        (self.from.clone(), self.field.clone(), self.to.clone())
    }
}

// =============================================================================
// GRAPH
// =============================================================================

/// Entity-type graph of forward relations.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Entity types in declaration order.
    nodes: Vec<String>,
    /// Outgoing forward edges per type, in field order.
    edges: BTreeMap<String, Vec<DependencyEdge>>,
}

/// The result of ordering a dependency graph.
#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationOrder {
    /// Entity types, every type after the types it forward-exact-depends on.
    pub order: Vec<String>,
    /// Forward-exact edges cut to break deferrable cycles.
    pub deferred: Vec<DependencyEdge>,
    #[serde(skip)]
    rank: BTreeMap<String, usize>,
}

impl GenerationOrder {
    /// Position of a type in the order (types absent from the order sort last).
    #[must_use]
    pub fn rank(&self, entity_type: &str) -> usize {
        self.rank.get(entity_type).copied().unwrap_or(usize::MAX)
    }

    /// Check whether an edge was cut.
    #[must_use]
    pub fn is_deferred(&self, from: &str, field: &str) -> bool {
        self.deferred
            .iter()
            .any(|e| e.from == from && e.field == field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    OnStack,
    Done,
}

impl DependencyGraph {
    /// Build the graph from a parsed schema.
    #[must_use]
    pub fn build(schema: &ParsedSchema) -> Self {
        let mut graph = Self::default();
        for entity in schema.entities() {
            graph.nodes.push(entity.name.clone());
            let out = graph.edges.entry(entity.name.clone()).or_default();
            for field in entity.relations() {
                let Some((operator, related)) = field.relation() else {
                    continue;
                };
                if operator.direction() != Direction::Forward {
                    continue;
                }
                for target in related.candidates() {
                    out.push(DependencyEdge {
                        from: entity.name.clone(),
                        to: target.to_string(),
                        field: field.name.clone(),
                        operator,
                        deferrable: field.is_optional || field.is_array,
                    });
                }
            }
        }
        graph
    }

    /// Entity types in declaration order.
    #[must_use]
    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    /// All forward edges leaving a type.
    #[must_use]
    pub fn edges_from(&self, entity_type: &str) -> &[DependencyEdge] {
        self.edges.get(entity_type).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Types that `entity_type` must be able to generate first.
    #[must_use]
    pub fn dependencies(&self, entity_type: &str) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.edges_from(entity_type)
            .iter()
            .filter(|e| e.operator == Operator::ForwardExact)
            .filter(|e| seen.insert(e.to.as_str()))
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Total number of forward edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Compute the generation order.
    ///
    /// Fails with `SchemaCycle` when required single forward-exact relations
    /// form a cycle.
    pub fn generation_order(&self) -> Result<GenerationOrder, WeaveError> {
        let mut cut: BTreeSet<(String, String, String)> = BTreeSet::new();
        let mut deferred = Vec::new();

        // One cut edge per pass.
        while let Some(cycle) = self.find_cycle(&cut) {
            let Some(edge) = cycle.iter().rev().find(|e| e.deferrable) else {
                let mut names: Vec<String> = cycle.iter().map(|e| e.from.clone()).collect();
                if let Some(last) = cycle.last() {
                    names.push(last.to.clone());
                }
                return Err(WeaveError::SchemaCycle { cycle: names });
            };
            tracing::debug!(from = %edge.from, field = %edge.field, to = %edge.to, "deferring forward-exact edge");
            cut.insert(edge.key());
            deferred.push((*edge).clone());
        }

        let mut visited = BTreeSet::new();
        let mut order = Vec::with_capacity(self.nodes.len());
        for node in &self.nodes {
            self.post_order(node, &cut, &mut visited, &mut order);
        }

        let rank = order
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        Ok(GenerationOrder {
            order,
            deferred,
            rank,
        })
    }

    fn exact_edges<'a, 'c>(
        &'a self,
        node: &str,
        cut: &'c BTreeSet<(String, String, String)>,
    ) -> impl Iterator<Item = &'a DependencyEdge> + use<'a, 'c> {
        self.edges_from(node)
            .iter()
            .filter(|e| e.operator == Operator::ForwardExact)
            .filter(move |e| !cut.contains(&e.key()))
    }

    fn find_cycle<'a>(
        &'a self,
        cut: &BTreeSet<(String, String, String)>,
    ) -> Option<Vec<&'a DependencyEdge>> {
        let mut state: BTreeMap<&str, VisitState> = BTreeMap::new();
        let mut path: Vec<&DependencyEdge> = Vec::new();
        for node in &self.nodes {
            if state.contains_key(node.as_str()) {
                continue;
            }
            if let Some(cycle) = self.dfs_cycle(node, cut, &mut state, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    /// Depth-first search with a recursion stack; returns the edges of the
    /// first back-edge cycle found.
    fn dfs_cycle<'a>(
        &'a self,
        node: &'a str,
        cut: &BTreeSet<(String, String, String)>,
        state: &mut BTreeMap<&'a str, VisitState>,
        path: &mut Vec<&'a DependencyEdge>,
    ) -> Option<Vec<&'a DependencyEdge>> {
        state.insert(node, VisitState::OnStack);
        for edge in self.exact_edges(node, cut) {
            match state.get(edge.to.as_str()) {
                Some(VisitState::OnStack) => {
                    let start = path
                        .iter()
                        .position(|e| e.from == edge.to)
                        .unwrap_or(path.len());
                    let mut cycle = path[start..].to_vec();
                    cycle.push(edge);
                    return Some(cycle);
                }
                Some(VisitState::Done) => {}
                None => {
                    path.push(edge);
                    if let Some(cycle) = self.dfs_cycle(&edge.to, cut, state, path) {
                        return Some(cycle);
                    }
                    path.pop();
                }
            }
        }
        state.insert(node, VisitState::Done);
        None
    }

    fn post_order(
        &self,
        node: &str,
        cut: &BTreeSet<(String, String, String)>,
        visited: &mut BTreeSet<String>,
        order: &mut Vec<String>,
    ) {
        if !visited.insert(node.to_string()) {
            return;
        }
        for edge in self.exact_edges(node, cut) {
            self.post_order(&edge.to, cut, visited, order);
        }
        order.push(node.to_string());
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema;
    use serde_json::json;

    fn graph(raw: serde_json::Value) -> DependencyGraph {
        DependencyGraph::build(&parse_schema(&raw).expect("parse"))
    }

    fn position(order: &GenerationOrder, name: &str) -> usize {
        order.order.iter().position(|n| n == name).expect("present")
    }

    #[test]
    fn dependencies_come_first() {
        let g = graph(json!({
            "Blog": { "topics": "[Topic.blog]" },
            "Topic": { "posts": "->Post" },
            "Post": { "title": "string" }
        }));
        let order = g.generation_order().expect("order");

        assert_eq!(order.order, vec!["Post", "Topic", "Blog"]);
        assert!(order.deferred.is_empty());
        assert!(order.rank("Post") < order.rank("Blog"));
    }

    #[test]
    fn fuzzy_and_backward_edges_do_not_constrain_order() {
        let g = graph(json!({
            "Post": { "category": "~>Category", "comments": "<-Comment" },
            "Category": { "featured": "~>Post" },
            "Comment": { "post": "~>Post.replies" }
        }));
        let order = g.generation_order().expect("fuzzy cycle is fine");
        assert_eq!(order.order, vec!["Post", "Category", "Comment"]);
        assert_eq!(g.edge_count(), 3);
    }

    #[test]
    fn required_forward_exact_cycle_is_fatal() {
        let g = graph(json!({
            "A": { "b": "->B" },
            "B": { "c": "->C" },
            "C": { "a": "->A" }
        }));
        let err = g.generation_order().expect_err("cycle");
        assert_eq!(
            err,
            WeaveError::SchemaCycle {
                cycle: vec!["A".into(), "B".into(), "C".into(), "A".into()]
            }
        );
    }

    #[test]
    fn required_self_reference_is_fatal() {
        let g = graph(json!({ "Node": { "next": "->Node" } }));
        assert!(matches!(
            g.generation_order(),
            Err(WeaveError::SchemaCycle { ref cycle }) if cycle == &vec!["Node".to_string(), "Node".to_string()]
        ));
    }

    #[test]
    fn optional_edge_breaks_cycle_and_is_deferred() {
        let g = graph(json!({
            "Person": { "employer": "->Company" },
            "Company": { "founder": "->Person?" }
        }));
        let order = g.generation_order().expect("deferrable");

        assert_eq!(order.deferred.len(), 1);
        assert!(order.is_deferred("Company", "founder"));
        assert!(position(&order, "Company") < position(&order, "Person"));
    }

    #[test]
    fn array_self_reference_is_deferred() {
        let g = graph(json!({ "Category": { "children": "[->Category]" } }));
        let order = g.generation_order().expect("deferrable");
        assert_eq!(order.order, vec!["Category"]);
        assert!(order.is_deferred("Category", "children"));
    }

    #[test]
    fn union_targets_all_become_edges() {
        let g = graph(json!({
            "Post": { "subject": "->Person|Place" },
            "Person": { "name": "string" },
            "Place": { "name": "string" }
        }));
        assert_eq!(g.dependencies("Post"), vec!["Person", "Place"]);
        let order = g.generation_order().expect("order");
        assert_eq!(position(&order, "Post"), 2);
    }

    #[test]
    fn unknown_type_ranks_last() {
        let order = GenerationOrder::default();
        assert_eq!(order.rank("Missing"), usize::MAX);
    }
}
