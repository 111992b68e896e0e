//! # CLI Configuration
//!
//! Layered, lowest precedence first:
//!
//! 1. built-in defaults (`weave_core::primitives`)
//! 2. a TOML file (`--config`)
//! 3. environment (`WEAVE_GENERATION_URL`, `WEAVE_GENERATION_API_KEY`)
//! 4. command-line flags, applied by the command itself
//!
//! ```toml
//! [generation]
//! url = "http://localhost:8700/generate"
//! timeout_ms = 30000
//! fallback = "placeholder"   # or "fail"
//!
//! [cascade]
//! max_depth = 3
//! threshold = 0.7
//! search_mode = "ordered"    # or "parallel"
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use weave_core::primitives::{DEFAULT_GENERATION_TIMEOUT_MS, DEFAULT_SEARCH_TIMEOUT_MS};
use weave_core::{CascadeOptions, FailureMode, FallbackPolicy, SearchMode, SearchStrategy, WeaveError};

/// Environment variable holding the generation endpoint.
pub const ENV_GENERATION_URL: &str = "WEAVE_GENERATION_URL";
/// Environment variable holding the generation bearer token.
pub const ENV_GENERATION_API_KEY: &str = "WEAVE_GENERATION_API_KEY";

/// Maximum config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Full CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeaveConfig {
    pub generation: GenerationConfig,
    pub cascade: CascadeConfig,
}

/// Where AI values come from. Without a URL every value is a placeholder.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub fallback: FallbackPolicy,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout_ms: DEFAULT_GENERATION_TIMEOUT_MS,
            fallback: FallbackPolicy::default(),
        }
    }
}

/// Cascade defaults; `None` leaves the core default in place.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CascadeConfig {
    pub max_depth: Option<usize>,
    pub threshold: Option<f32>,
    pub search_mode: Option<SearchMode>,
    pub search_strategy: Option<SearchStrategy>,
    pub failure_mode: Option<FailureMode>,
    pub default_array_count: Option<usize>,
    pub seed: Option<u64>,
    pub search_timeout_ms: Option<u64>,
}

impl WeaveConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, WeaveError> {
        let config: Self =
            toml::from_str(text).map_err(|e| WeaveError::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, WeaveError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let metadata = std::fs::metadata(path).map_err(|e| {
            WeaveError::Config(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(WeaveError::Config(format!(
                "config '{}' is {} bytes, limit is {}",
                path.display(),
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            WeaveError::Config(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "config loaded");
        Self::from_toml_str(&text)
    }

    /// Overlay environment values read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_GENERATION_URL).filter(|v| !v.trim().is_empty()) {
            self.generation.url = Some(url);
        }
        if let Some(key) = lookup(ENV_GENERATION_API_KEY).filter(|v| !v.trim().is_empty()) {
            self.generation.api_key = Some(key);
        }
    }

    /// Load the file, then overlay the process environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self, WeaveError> {
        let mut config = Self::load(path)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    fn validate(&self) -> Result<(), WeaveError> {
        if let Some(t) = self.cascade.threshold
            && !(0.0..=1.0).contains(&t)
        {
            return Err(WeaveError::Config(format!(
                "cascade.threshold must lie in [0, 1], got {}",
                t
            )));
        }
        if self.generation.timeout_ms == 0 {
            return Err(WeaveError::Config("generation.timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Cascade options from the configured values.
    #[must_use]
    pub fn cascade_options(&self) -> CascadeOptions {
        let c = &self.cascade;
        let mut options = CascadeOptions::new().search_timeout(Duration::from_millis(
            c.search_timeout_ms.unwrap_or(DEFAULT_SEARCH_TIMEOUT_MS),
        ));
        if let Some(depth) = c.max_depth {
            options = options.max_depth(depth);
        }
        if let Some(threshold) = c.threshold {
            options = options.threshold(threshold);
        }
        if let Some(mode) = c.search_mode {
            options = options.search_mode(mode);
        }
        if let Some(strategy) = c.search_strategy {
            options = options.search_strategy(strategy);
        }
        if let Some(mode) = c.failure_mode {
            options = options.failure_mode(mode);
        }
        if let Some(count) = c.default_array_count {
            options = options.default_array_count(count);
        }
        if let Some(seed) = c.seed {
            options = options.seed(seed);
        }
        options
    }

    #[must_use]
    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation.timeout_ms)
    }
}
