//! # Property-Based Tests
//!
//! Ordering, naming and determinism invariants checked with proptest.

use proptest::collection::vec;
use proptest::prelude::*;
use weave_core::schema::{lower_camel, pluralize};
use weave_core::{DependencyGraph, GenerationRequest, ParsedSchema, PlaceholderGenerator};

/// A schema of `n` node types where `NodeI` may own `NodeJ` only when `i < j`.
fn acyclic_schema(n: usize, links: &[bool]) -> serde_json::Value {
    let mut root = serde_json::Map::new();
    let mut k = 0;
    for i in 0..n {
        let mut fields = serde_json::Map::new();
        fields.insert("name".into(), "string".into());
        for j in (i + 1)..n {
            if links.get(k).copied().unwrap_or(false) {
                fields.insert(format!("owns{}", j), format!("->Node{}", j).into());
            }
            k += 1;
        }
        root.insert(format!("Node{}", i), serde_json::Value::Object(fields));
    }
    serde_json::Value::Object(root)
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    /// Every type is ordered after the types it forward-exact-depends on.
    #[test]
    fn acyclic_order_respects_dependencies(
        n in 2usize..8,
        links in vec(any::<bool>(), 28)
    ) {
        let schema = ParsedSchema::parse(&acyclic_schema(n, &links)).expect("parse");
        let graph = DependencyGraph::build(&schema);
        let order = graph.generation_order().expect("acyclic");

        prop_assert_eq!(order.order.len(), n);
        prop_assert!(order.deferred.is_empty());
        for entity in schema.entities() {
            for dep in graph.dependencies(&entity.name) {
                prop_assert!(order.rank(dep) < order.rank(&entity.name));
            }
        }
    }

    /// Computing the order twice gives the same order.
    #[test]
    fn order_is_deterministic(n in 2usize..8, links in vec(any::<bool>(), 28)) {
        let schema = ParsedSchema::parse(&acyclic_schema(n, &links)).expect("parse");
        let a = DependencyGraph::build(&schema).generation_order().expect("order");
        let b = DependencyGraph::build(&schema).generation_order().expect("order");
        prop_assert_eq!(a.order, b.order);
    }

    /// Plurals differ from the singular and keep its first letter.
    #[test]
    fn pluralize_changes_word(word in "[a-z]{2}[a-zA-Z]{0,10}") {
        let plural = pluralize(&word);
        prop_assert_ne!(&plural, &word);
        prop_assert_eq!(plural.chars().next(), word.chars().next());
    }

    /// Lowering the first letter is idempotent.
    #[test]
    fn lower_camel_is_idempotent(name in "[A-Z][a-zA-Z0-9]{0,12}") {
        let once = lower_camel(&name);
        prop_assert_eq!(lower_camel(&once), once.clone());
        prop_assert!(once.starts_with(|c: char| c.is_ascii_lowercase()));
    }

    /// Same request, same placeholder.
    #[test]
    fn placeholder_is_deterministic(
        seed in any::<u64>(),
        field in "[a-z]{1,10}",
        declared in prop::sample::select(vec!["string", "number", "integer", "boolean", "date", "email", "uuid"]),
    ) {
        let mut request = GenerationRequest::new("Post", field, declared);
        request.seed = seed;
        request.lineage = "Post".into();
        let generator = PlaceholderGenerator;
        prop_assert_eq!(generator.value(&request), generator.value(&request));
    }
}
