//! # Value Generator
//!
//! Produces scalar field values.
//!
//! - `PlaceholderGenerator`: deterministic, no external calls. Values derive
//!   from a BLAKE3 digest of (seed, type, field, lineage).
//! - `AiGenerator`: delegates to a `GenerationProvider` under a timeout and
//!   coerces the answer to the declared type. On timeout, provider error or
//!   malformed output it falls back to a placeholder and flags the metadata,
//!   unless the policy is `FallbackPolicy::Fail`.

use crate::WeaveError;
use crate::primitives::DEFAULT_GENERATION_TIMEOUT_MS;
use crate::provider::GenerationProvider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Field names that take a hint verbatim.
const TITLE_FIELDS: &[&str] = &["name", "title", "label"];

// =============================================================================
// REQUEST / RESULT
// =============================================================================

/// Everything a generator knows about the value it must produce.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub entity_type: String,
    pub field: String,
    /// Declared scalar type (`string`, `number`, ...).
    pub declared_type: String,
    pub is_array: bool,
    /// Field prompt with `{name}` placeholders rendered.
    pub prompt: Option<String>,
    /// Entity `$instructions` with placeholders rendered.
    pub instructions: Option<String>,
    /// Natural-language hint handed down by the parent.
    pub hint: Option<String>,
    /// Snapshot of the parent entity.
    pub parent: Option<serde_json::Value>,
    /// Values of `$context` fields and template dependencies.
    pub context: BTreeMap<String, serde_json::Value>,
    pub seed: u64,
    /// Position of the entity in the cascade (`Blog/topics[1]/posts`).
    pub lineage: String,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(
        entity_type: impl Into<String>,
        field: impl Into<String>,
        declared_type: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            field: field.into(),
            declared_type: declared_type.into(),
            ..Self::default()
        }
    }
}

/// Which generator produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorKind {
    Placeholder,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationMetadata {
    pub generator: GeneratorKind,
    /// AI generation failed and a placeholder was substituted.
    pub fallback: bool,
    /// Why the fallback happened.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedValue {
    pub value: serde_json::Value,
    pub metadata: GenerationMetadata,
}

/// A source of scalar values.
#[async_trait]
pub trait ValueGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedValue, WeaveError>;
}

// =============================================================================
// PLACEHOLDER
// =============================================================================

/// Deterministic generator with no external calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderGenerator;

impl PlaceholderGenerator {
    /// The placeholder for a request. Same request, same value.
    #[must_use]
    pub fn value(&self, request: &GenerationRequest) -> serde_json::Value {
        if request.is_array {
            let mut item = request.clone();
            item.is_array = false;
            item.lineage = format!("{}[0]", request.lineage);
            return serde_json::Value::Array(vec![self.value(&item)]);
        }

        if TITLE_FIELDS.contains(&request.field.as_str())
            && let Some(hint) = request.hint.as_deref().filter(|h| !h.trim().is_empty())
        {
            return serde_json::Value::String(hint.trim().to_string());
        }

        let digest = digest(request);
        let bytes = digest.as_bytes();
        let n = u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        let hex = digest.to_hex();
        let short = &hex[..8];

        match request.declared_type.as_str() {
            "number" | "float" => serde_json::Number::from_f64((n % 100_000) as f64 / 100.0)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            "integer" | "int" => serde_json::Value::from(n % 1_000),
            "boolean" | "bool" => serde_json::Value::Bool(n & 1 == 0),
            "date" => serde_json::Value::String(date(n)),
            "datetime" | "timestamp" => serde_json::Value::String(format!(
                "{}T{:02}:{:02}:00Z",
                date(n),
                (n >> 16) % 24,
                (n >> 24) % 60
            )),
            "email" => serde_json::Value::String(format!("{}-{}@example.com", request.field, short)),
            "url" => serde_json::Value::String(format!(
                "https://example.com/{}/{}",
                request.entity_type.to_lowercase(),
                short
            )),
            "uuid" => {
                serde_json::Value::String(format!(
                    "{}-{}-{}-{}-{}",
                    &hex[0..8],
                    &hex[8..12],
                    &hex[12..16],
                    &hex[16..20],
                    &hex[20..32]
                ))
            }
            "id" => serde_json::Value::String(hex[..16].to_string()),
            "json" => serde_json::json!({ "placeholder": short }),
            _ => serde_json::Value::String(match request.hint.as_deref() {
                Some(hint) if !hint.trim().is_empty() => {
                    format!("{} {} ({})", request.field, short, hint.trim())
                }
                _ => format!("{} {} {}", request.entity_type, request.field, short),
            }),
        }
    }
}

fn digest(request: &GenerationRequest) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&request.seed.to_le_bytes());
    for part in [&request.entity_type, &request.field, &request.lineage] {
        hasher.update(part.as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize()
}

fn date(n: u64) -> String {
    format!("20{:02}-{:02}-{:02}", 20 + n % 10, 1 + (n >> 8) % 12, 1 + (n >> 12) % 28)
}

#[async_trait]
impl ValueGenerator for PlaceholderGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedValue, WeaveError> {
        Ok(GeneratedValue {
            value: self.value(request),
            metadata: GenerationMetadata {
                generator: GeneratorKind::Placeholder,
                fallback: false,
                error: None,
            },
        })
    }
}

// =============================================================================
// AI-BACKED
// =============================================================================

/// What `AiGenerator` does when the provider fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Substitute a placeholder and flag `metadata.fallback`.
    #[default]
    Placeholder,
    /// Return the failure; the field ends up in `Resolved::errors`.
    Fail,
}

/// Generator that delegates to an external `GenerationProvider`.
#[derive(Clone)]
pub struct AiGenerator {
    provider: Arc<dyn GenerationProvider>,
    timeout: Duration,
    policy: FallbackPolicy,
}

impl AiGenerator {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self {
            provider,
            timeout: Duration::from_millis(DEFAULT_GENERATION_TIMEOUT_MS),
            policy: FallbackPolicy::default(),
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn call(&self, request: &GenerationRequest) -> Result<serde_json::Value, WeaveError> {
        let budget_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
        let raw = tokio::time::timeout(self.timeout, self.provider.generate(request))
            .await
            .map_err(|_| WeaveError::Timeout(budget_ms))??;
        coerce(raw, &request.declared_type, request.is_array)
    }
}

#[async_trait]
impl ValueGenerator for AiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedValue, WeaveError> {
        match self.call(request).await {
            Ok(value) => Ok(GeneratedValue {
                value,
                metadata: GenerationMetadata {
                    generator: GeneratorKind::Ai,
                    fallback: false,
                    error: None,
                },
            }),
            Err(e) => match self.policy {
                FallbackPolicy::Fail => Err(WeaveError::Generation(e.to_string())),
                FallbackPolicy::Placeholder => {
                    tracing::warn!(
                        entity_type = %request.entity_type,
                        field = %request.field,
                        error = %e,
                        "generation failed, using placeholder"
                    );
                    Ok(GeneratedValue {
                        value: PlaceholderGenerator.value(request),
                        metadata: GenerationMetadata {
                            generator: GeneratorKind::Ai,
                            fallback: true,
                            error: Some(e.to_string()),
                        },
                    })
                }
            },
        }
    }
}

// =============================================================================
// COERCION
// =============================================================================

/// Coerce a provider answer to the declared type.
///
/// `{"value": x}` is unwrapped first. A non-array answer for an array field
/// becomes a one-element array.
pub fn coerce(
    raw: serde_json::Value,
    declared_type: &str,
    is_array: bool,
) -> Result<serde_json::Value, WeaveError> {
    use serde_json::Value;

    let raw = match raw {
        Value::Object(mut map) if map.len() == 1 && map.contains_key("value") => {
            map.remove("value").unwrap_or(Value::Null)
        }
        other => other,
    };

    if is_array {
        let items = match raw {
            Value::Array(items) => items,
            single => vec![single],
        };
        return items
            .into_iter()
            .map(|v| coerce(v, declared_type, false))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array);
    }

    let malformed =
        |v: &Value| WeaveError::Generation(format!("cannot read {} as {}", v, declared_type));

    match declared_type {
        "json" => Ok(raw),
        "number" | "float" => match &raw {
            Value::Number(_) => Ok(raw),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| malformed(&raw)),
            _ => Err(malformed(&raw)),
        },
        "integer" | "int" => match &raw {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(raw),
            Value::Number(n) => n
                .as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                .map(|f| Value::from(f as i64))
                .ok_or_else(|| malformed(&raw)),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| malformed(&raw)),
            _ => Err(malformed(&raw)),
        },
        "boolean" | "bool" => match &raw {
            Value::Bool(_) => Ok(raw),
            Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            _ => Err(malformed(&raw)),
        },
        _ => match raw {
            Value::String(s) if s.trim().is_empty() => Err(WeaveError::Generation(
                "empty string generated".to_string(),
            )),
            Value::String(s) => Ok(Value::String(s.trim().to_string())),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            other => Err(malformed(&other)),
        },
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Scripted(Result<serde_json::Value, WeaveError>);

    #[async_trait]
    impl GenerationProvider for Scripted {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<serde_json::Value, WeaveError> {
            self.0.clone()
        }
    }

    struct Slow;

    #[async_trait]
    impl GenerationProvider for Slow {
        async fn generate(
            &self,
            _request: &GenerationRequest,
        ) -> Result<serde_json::Value, WeaveError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!("too late"))
        }
    }

    fn request(field: &str, declared: &str) -> GenerationRequest {
        let mut r = GenerationRequest::new("Post", field, declared);
        r.seed = 7;
        r.lineage = "Post".into();
        r
    }

    #[test]
    fn placeholder_is_deterministic_per_seed_and_lineage() {
        let g = PlaceholderGenerator;
        let a = request("body", "string");
        assert_eq!(g.value(&a), g.value(&a));

        let mut other_seed = a.clone();
        other_seed.seed = 8;
        assert_ne!(g.value(&a), g.value(&other_seed));

        let mut other_lineage = a.clone();
        other_lineage.lineage = "Post/related[0]".into();
        assert_ne!(g.value(&a), g.value(&other_lineage));
    }

    #[test]
    fn placeholder_respects_declared_types() {
        let g = PlaceholderGenerator;
        assert!(g.value(&request("views", "integer")).is_u64());
        assert!(g.value(&request("score", "number")).is_f64());
        assert!(g.value(&request("draft", "boolean")).is_boolean());
        let email = g.value(&request("contact", "email"));
        assert!(email.as_str().is_some_and(|s| s.ends_with("@example.com")));
        let uuid = g.value(&request("ref", "uuid"));
        assert_eq!(uuid.as_str().map(str::len), Some(36));
        let date = g.value(&request("published", "date"));
        assert_eq!(date.as_str().map(str::len), Some(10));
    }

    #[test]
    fn placeholder_title_takes_hint() {
        let mut r = request("name", "string");
        r.hint = Some(" Databases ".into());
        assert_eq!(PlaceholderGenerator.value(&r), json!("Databases"));

        let mut body = request("body", "string");
        body.hint = Some("Databases".into());
        let value = PlaceholderGenerator.value(&body);
        assert!(value.as_str().is_some_and(|s| s.contains("Databases")));
    }

    #[test]
    fn placeholder_arrays_hold_one_item() {
        let mut r = request("tags", "string");
        r.is_array = true;
        assert!(matches!(PlaceholderGenerator.value(&r), serde_json::Value::Array(ref v) if v.len() == 1));
    }

    #[test]
    fn coerce_parses_and_rejects() {
        assert_eq!(coerce(json!("42"), "integer", false).expect("int"), json!(42));
        assert_eq!(coerce(json!(3.0), "integer", false).expect("int"), json!(3));
        assert_eq!(coerce(json!("2.5"), "number", false).expect("num"), json!(2.5));
        assert_eq!(coerce(json!("TRUE"), "boolean", false).expect("bool"), json!(true));
        assert_eq!(coerce(json!({"value": "hi"}), "string", false).expect("str"), json!("hi"));
        assert_eq!(coerce(json!(7), "string", false).expect("str"), json!("7"));
        assert_eq!(coerce(json!("a"), "string", true).expect("arr"), json!(["a"]));

        assert!(coerce(json!("forty"), "integer", false).is_err());
        assert!(coerce(json!(2.5), "integer", false).is_err());
        assert!(coerce(json!({"a": 1}), "string", false).is_err());
        assert!(coerce(json!("  "), "string", false).is_err());
        assert!(coerce(json!(["x", 1.5]), "integer", true).is_err());
    }

    #[tokio::test]
    async fn ai_success_is_coerced() {
        let g = AiGenerator::new(Arc::new(Scripted(Ok(json!("12")))));
        let out = g.generate(&request("views", "integer")).await.expect("generate");
        assert_eq!(out.value, json!(12));
        assert_eq!(out.metadata.generator, GeneratorKind::Ai);
        assert!(!out.metadata.fallback);
    }

    #[tokio::test]
    async fn ai_failure_falls_back_to_placeholder() {
        let g = AiGenerator::new(Arc::new(Scripted(Err(WeaveError::Provider("503".into())))));
        let r = request("body", "string");
        let out = g.generate(&r).await.expect("never fails with placeholder policy");
        assert!(out.metadata.fallback);
        assert_eq!(out.value, PlaceholderGenerator.value(&r));
        assert!(out.metadata.error.is_some_and(|e| e.contains("503")));
    }

    #[tokio::test]
    async fn ai_malformed_output_falls_back() {
        let g = AiGenerator::new(Arc::new(Scripted(Ok(json!({"nested": true})))));
        let out = g.generate(&request("views", "integer")).await.expect("generate");
        assert!(out.metadata.fallback);
    }

    #[tokio::test(start_paused = true)]
    async fn ai_timeout_falls_back() {
        let g = AiGenerator::new(Arc::new(Slow)).timeout(Duration::from_millis(50));
        let out = g.generate(&request("body", "string")).await.expect("generate");
        assert!(out.metadata.fallback);
        assert!(out.metadata.error.is_some_and(|e| e.contains("50 ms")));
    }

    #[tokio::test]
    async fn fail_policy_surfaces_error() {
        let g = AiGenerator::new(Arc::new(Scripted(Err(WeaveError::Provider("down".into())))))
            .policy(FallbackPolicy::Fail);
        let err = g.generate(&request("body", "string")).await.expect_err("fail");
        assert!(matches!(err, WeaveError::Generation(_)));
    }
}
