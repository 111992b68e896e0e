//! # CLI Command Implementations

use crate::config::WeaveConfig;
use crate::http::HttpGenerationProvider;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use weave_core::{
    AiGenerator, Cascade, DataProvider, DependencyGraph, FallbackPolicy, MemoryStore,
    ParsedSchema, ProgressKind, SearchMode, WeaveError,
};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a schema or input document (10 MB).
const MAX_DOCUMENT_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum size of a preload data file (100 MB).
const MAX_DATA_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Canonicalize `path`, require a regular file no larger than `max_size`.
fn validate_file(path: &Path, max_size: u64) -> Result<PathBuf, WeaveError> {
    let canonical = path.canonicalize().map_err(|e| {
        WeaveError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;
    if !canonical.is_file() {
        return Err(WeaveError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }
    let metadata = std::fs::metadata(&canonical)
        .map_err(|e| WeaveError::IoError(format!("Cannot read file metadata: {}", e)))?;
    if metadata.len() > max_size {
        return Err(WeaveError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(canonical)
}

fn read_text(path: &Path, max_size: u64) -> Result<String, WeaveError> {
    let path = validate_file(path, max_size)?;
    std::fs::read_to_string(&path)
        .map_err(|e| WeaveError::IoError(format!("Cannot read '{}': {}", path.display(), e)))
}

/// Read a JSON document.
pub fn read_json(path: &Path, max_size: u64) -> Result<serde_json::Value, WeaveError> {
    let text = read_text(path, max_size)?;
    Ok(serde_json::from_str(&text)?)
}

/// Load a schema from JSON or, by extension, TOML.
pub fn load_schema(path: &Path) -> Result<ParsedSchema, WeaveError> {
    let text = read_text(path, MAX_DOCUMENT_FILE_SIZE)?;
    let raw: serde_json::Value = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => toml::from_str(&text)
            .map_err(|e| WeaveError::SerializationError(format!("invalid TOML schema: {}", e)))?,
        _ => serde_json::from_str(&text)?,
    };
    ParsedSchema::parse(&raw)
}

fn print_json(value: &serde_json::Value, pretty: bool) {
    let text = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    println!("{}", text.unwrap_or_default());
}

// =============================================================================
// CHECK / ORDER / DRAFT
// =============================================================================

/// Validate a schema and print its entities and fields.
///
/// A cyclic schema fails here, like it fails a cascade.
pub fn cmd_check(schema_path: &Path, pretty: bool) -> Result<(), WeaveError> {
    let schema = load_schema(schema_path)?;
    let order = DependencyGraph::build(&schema).generation_order()?;

    let entities: Vec<serde_json::Value> = schema
        .entities()
        .iter()
        .map(|entity| {
            let fields: Vec<serde_json::Value> = entity
                .fields
                .iter()
                .map(|f| match f.relation() {
                    Some((operator, related)) => serde_json::json!({
                        "name": f.name,
                        "operator": operator.symbol(),
                        "targets": related.candidates(),
                        "backref": f.backref,
                        "deferred": order.is_deferred(&entity.name, &f.name),
                        "array": f.is_array,
                        "optional": f.is_optional,
                    }),
                    None => serde_json::json!({
                        "name": f.name,
                        "type": f.declared_type(),
                        "array": f.is_array,
                        "optional": f.is_optional,
                    }),
                })
                .collect();
            serde_json::json!({ "name": entity.name, "fields": fields })
        })
        .collect();

    tracing::info!(entities = schema.len(), "schema valid");
    print_json(&serde_json::json!({ "valid": true, "entities": entities }), pretty);
    Ok(())
}

/// Print the generation order and the edges cut to break cycles.
pub fn cmd_order(schema_path: &Path, pretty: bool) -> Result<(), WeaveError> {
    let schema = load_schema(schema_path)?;
    let graph = DependencyGraph::build(&schema);
    let order = graph.generation_order()?;

    print_json(
        &serde_json::json!({
            "order": order.order,
            "deferred": order.deferred,
            "edges": graph.edge_count(),
        }),
        pretty,
    );
    Ok(())
}

/// Draft an entity and print the preview.
pub fn cmd_draft(
    schema_path: &Path,
    entity_type: &str,
    input: Option<&Path>,
    pretty: bool,
) -> Result<(), WeaveError> {
    let schema = load_schema(schema_path)?;
    let input = match input {
        Some(path) => read_json(path, MAX_DOCUMENT_FILE_SIZE)?,
        None => serde_json::Value::Null,
    };
    let draft = weave_core::draft(&schema, entity_type, &input)?;
    print_json(&draft.to_json(), pretty);
    Ok(())
}

// =============================================================================
// CASCADE
// =============================================================================

/// Flags of the `cascade` command.
#[derive(Debug, Clone)]
pub struct CascadeArgs {
    pub schema: PathBuf,
    pub entity_type: String,
    pub input: Option<PathBuf>,
    pub data: Option<PathBuf>,
    pub max_depth: Option<usize>,
    pub threshold: Option<f32>,
    pub search_mode: Option<SearchMode>,
    pub seed: Option<u64>,
    pub fail_on_fallback: bool,
}

/// Per-kind progress counters.
#[derive(Debug, Default)]
struct ProgressCounts {
    created: AtomicUsize,
    linked: AtomicUsize,
    resolved: AtomicUsize,
    skipped: AtomicUsize,
}

impl ProgressCounts {
    fn record(&self, kind: ProgressKind) {
        let counter = match kind {
            ProgressKind::Created => &self.created,
            ProgressKind::Linked => &self.linked,
            ProgressKind::Resolved => &self.resolved,
            ProgressKind::Skipped => &self.skipped,
            ProgressKind::Drafted => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "created": self.created.load(Ordering::Relaxed),
            "linked": self.linked.load(Ordering::Relaxed),
            "resolved": self.resolved.load(Ordering::Relaxed),
            "skipped": self.skipped.load(Ordering::Relaxed),
        })
    }
}

/// Run a cascade against an in-memory store and print the outcome.
pub async fn cmd_cascade(
    config_path: Option<&Path>,
    args: &CascadeArgs,
    pretty: bool,
) -> Result<(), WeaveError> {
    let config = WeaveConfig::resolve(config_path)?;
    let schema = load_schema(&args.schema)?;
    if !schema.contains(&args.entity_type) {
        return Err(WeaveError::UnknownEntityType(args.entity_type.clone()));
    }

    let store = Arc::new(MemoryStore::new());
    if let Some(path) = &args.data {
        let loaded = store.load_json(&read_json(path, MAX_DATA_FILE_SIZE)?).await?;
        tracing::info!(entities = loaded, "preloaded data");
    }
    let input = match &args.input {
        Some(path) => read_json(path, MAX_DOCUMENT_FILE_SIZE)?,
        None => serde_json::Value::Null,
    };

    let mut cascade = Cascade::new(schema, Arc::clone(&store) as Arc<dyn DataProvider>)?;
    if let Some(url) = &config.generation.url {
        let policy = if args.fail_on_fallback {
            FallbackPolicy::Fail
        } else {
            config.generation.fallback
        };
        let provider = HttpGenerationProvider::new(url.clone(), config.generation.api_key.clone());
        tracing::info!(url = provider.url(), ?policy, "AI generation enabled");
        cascade = cascade.with_generator(Arc::new(
            AiGenerator::new(Arc::new(provider))
                .timeout(config.generation_timeout())
                .policy(policy),
        ));
    } else if args.fail_on_fallback {
        tracing::warn!("--fail-on-fallback has no effect without a generation URL");
    }

    let counts = Arc::new(ProgressCounts::default());
    let sink = Arc::clone(&counts);
    let mut options = config.cascade_options().on_progress(move |event| {
        tracing::debug!(kind = ?event.kind, entity_type = %event.entity_type, path = %event.path, "progress");
        sink.record(event.kind);
    });
    if let Some(depth) = args.max_depth {
        options = options.max_depth(depth);
    }
    if let Some(threshold) = args.threshold {
        options = options.threshold(threshold);
    }
    if let Some(mode) = args.search_mode {
        options = options.search_mode(mode);
    }
    if let Some(seed) = args.seed {
        options = options.seed(seed);
    }

    let resolved = cascade.cascade(&args.entity_type, &input, &options).await?;

    let mut created = Vec::with_capacity(resolved.created.len());
    for r in &resolved.created {
        if let Some(entity) = store.get(&r.entity_type, &r.id).await? {
            created.push(entity.to_json());
        }
    }
    if !resolved.errors.is_empty() {
        tracing::warn!(errors = resolved.errors.len(), "cascade finished with field errors");
    }

    print_json(
        &serde_json::json!({
            "root": resolved.to_json(),
            "created": created,
            "progress": counts.to_json(),
        }),
        pretty,
    );
    Ok(())
}
