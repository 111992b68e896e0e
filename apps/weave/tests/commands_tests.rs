//! Tests for CLI command plumbing: schema loading, file checks and cascades.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::path::{Path, PathBuf};
use weave::cli::{CascadeArgs, cmd_cascade, cmd_check, cmd_draft, cmd_order, load_schema, read_json};
use weave_core::{SearchMode, WeaveError};

const BLOG_JSON: &str = r#"{
  "Blog": { "title": "string", "topics": "[Topic.blog]", "region": "<~Region" },
  "Topic": { "name": "string" },
  "Region": { "name": "string" }
}"#;

const BLOG_TOML: &str = r#"
[Blog]
title = "string"
topics = "[Topic.blog]"

[Topic]
name = "string"
"#;

fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, text).unwrap();
    path
}

fn args(schema: PathBuf) -> CascadeArgs {
    CascadeArgs {
        schema,
        entity_type: "Blog".to_string(),
        input: None,
        data: None,
        max_depth: None,
        threshold: None,
        search_mode: None,
        seed: None,
        fail_on_fallback: false,
    }
}

// =============================================================================
// SCHEMA LOADING
// =============================================================================

#[test]
fn test_load_json_schema() {
    let dir = tempfile::tempdir().unwrap();
    let schema = load_schema(&write(dir.path(), "schema.json", BLOG_JSON)).unwrap();
    assert_eq!(schema.len(), 3);
    assert!(schema.contains("Region"));
}

#[test]
fn test_load_toml_schema() {
    let dir = tempfile::tempdir().unwrap();
    let schema = load_schema(&write(dir.path(), "schema.toml", BLOG_TOML)).unwrap();
    assert_eq!(schema.len(), 2);
    let topics = schema.entity("Blog").unwrap().field("topics").unwrap();
    assert!(topics.is_array);
    assert_eq!(topics.backref.as_deref(), Some("blog"));
}

#[test]
fn test_malformed_toml_schema_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "schema.toml", "[Blog\ntitle = ");
    assert!(matches!(load_schema(&path), Err(WeaveError::SerializationError(_))));
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = read_json(&dir.path().join("nope.json"), 1024);
    assert!(matches!(result, Err(WeaveError::IoError(_))));
}

#[test]
fn test_directory_is_not_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let result = read_json(dir.path(), 1024);
    assert!(matches!(result, Err(WeaveError::IoError(_))));
}

#[test]
fn test_oversized_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "big.json", &format!("\"{}\"", "x".repeat(64)));
    match read_json(&path, 16) {
        Err(WeaveError::IoError(msg)) => assert!(msg.contains("exceeds")),
        other => panic!("expected size error, got {:?}", other),
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

#[test]
fn test_check_and_order_accept_valid_schema() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "schema.json", BLOG_JSON);
    cmd_check(&path, true).unwrap();
    cmd_order(&path, false).unwrap();
}

#[test]
fn test_check_rejects_unknown_target() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "schema.json", r#"{ "Blog": { "owner": "->Person" } }"#);
    assert!(cmd_check(&path, true).is_err());
}

#[test]
fn test_draft_unknown_type_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "schema.json", BLOG_JSON);
    assert!(cmd_draft(&path, "Comment", None, true).is_err());
    cmd_draft(&path, "Blog", None, true).unwrap();
}

#[tokio::test]
async fn test_cascade_with_preloaded_data() {
    let dir = tempfile::tempdir().unwrap();
    let schema = write(dir.path(), "schema.json", BLOG_JSON);
    let input = write(
        dir.path(),
        "input.json",
        r#"{ "title": "Field Notes", "topics": [{ "name": "rivers" }] }"#,
    );
    let data = write(
        dir.path(),
        "data.json",
        r#"{ "Region": [{ "$id": "region-north", "name": "north" }] }"#,
    );
    let config = write(dir.path(), "weave.toml", "[cascade]\nmax_depth = 2\n");

    let mut cascade = args(schema);
    cascade.input = Some(input);
    cascade.data = Some(data);
    cascade.seed = Some(3);
    cascade.search_mode = Some(SearchMode::Parallel);
    cmd_cascade(Some(&config), &cascade, false).await.unwrap();
}

#[tokio::test]
async fn test_cascade_rejects_malformed_data() {
    let dir = tempfile::tempdir().unwrap();
    let mut cascade = args(write(dir.path(), "schema.json", BLOG_JSON));
    cascade.data = Some(write(dir.path(), "data.json", r#"["not", "tables"]"#));
    let result = cmd_cascade(None, &cascade, true).await;
    assert!(matches!(result, Err(WeaveError::InvalidInput(_))));
}

#[tokio::test]
async fn test_cascade_unknown_root_checked_before_data() {
    let dir = tempfile::tempdir().unwrap();
    let mut cascade = args(write(dir.path(), "schema.json", BLOG_JSON));
    cascade.entity_type = "Comment".to_string();
    cascade.data = Some(write(dir.path(), "data.json", r#"["not", "tables"]"#));
    let result = cmd_cascade(None, &cascade, true).await;
    assert!(matches!(result, Err(WeaveError::UnknownEntityType(t)) if t == "Comment"));
}

#[test]
fn test_check_accepts_deferrable_cycle_rejects_required_one() {
    let dir = tempfile::tempdir().unwrap();
    let deferrable = write(
        dir.path(),
        "optional.json",
        r#"{ "Person": { "pet": "->Pet" }, "Pet": { "owner": "->Person?" } }"#,
    );
    cmd_check(&deferrable, true).unwrap();

    let required = write(
        dir.path(),
        "required.json",
        r#"{ "Person": { "pet": "->Pet" }, "Pet": { "owner": "->Person" } }"#,
    );
    assert!(matches!(cmd_check(&required, true), Err(WeaveError::SchemaCycle { .. })));
}
