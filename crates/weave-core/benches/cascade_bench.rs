//! # Cascade Benchmarks
//!
//! Performance benchmarks for schema parsing, ordering and full cascades.
//!
//! Run with: `cargo bench -p weave-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use weave_core::{Cascade, CascadeOptions, DependencyGraph, MemoryStore, ParsedSchema};

/// A chain `Node0 -> Node1 -> ... -> NodeN` of forward-exact relations.
fn chain_schema(size: usize) -> serde_json::Value {
    let mut root = serde_json::Map::new();
    for i in 0..size {
        let mut fields = serde_json::Map::new();
        fields.insert("name".into(), "string".into());
        if i + 1 < size {
            fields.insert("next".into(), format!("->Node{}", i + 1).into());
        }
        root.insert(format!("Node{}", i), serde_json::Value::Object(fields));
    }
    serde_json::Value::Object(root)
}

fn blog_schema() -> ParsedSchema {
    ParsedSchema::parse(&json!({
        "Blog": { "title": "string", "topics": "[Topic.blog]" },
        "Topic": { "name": "string", "category": "~>Category", "posts": "[->Post]" },
        "Post": { "title": "string", "summary": "Summarize {title}" },
        "Category": { "name": "string" }
    }))
    .expect("schema")
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_schema_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("schema_parse");

    for size in [10, 50, 200].iter() {
        let raw = chain_schema(*size);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(ParsedSchema::parse(&raw)));
        });
    }

    group.finish();
}

fn bench_generation_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("generation_order");

    for size in [10, 50, 200].iter() {
        let schema = ParsedSchema::parse(&chain_schema(*size)).expect("schema");
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(DependencyGraph::build(&schema).generation_order()));
        });
    }

    group.finish();
}

fn bench_cascade(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("cascade_blog");

    for topics in [1, 4, 16].iter() {
        let input = json!({
            "title": "Bench",
            "topics": (0..*topics).map(|i| json!({ "name": format!("topic {}", i) })).collect::<Vec<_>>()
        });
        let options = CascadeOptions::new().default_array_count(3).seed(1);

        group.bench_with_input(BenchmarkId::from_parameter(topics), topics, |b, _| {
            b.iter(|| {
                runtime.block_on(async {
                    let store = Arc::new(MemoryStore::new());
                    let cascade = Cascade::new(blog_schema(), store).expect("cascade");
                    black_box(cascade.cascade("Blog", &input, &options).await)
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_schema_parse, bench_generation_order, bench_cascade);
criterion_main!(benches);
