//! Configuration for the invocation layer.
//!
//! Configured via a TOML file, with support for environment variable
//! interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [provider]
//! type = "gemini"
//! api_key = "${GEMINI_API_KEY}"
//! model = "gemini-2.5-flash-lite"
//!
//! [context_cache]
//! min_chars = 4000
//! ```

mod cache;
mod observability;
mod providers;
mod usage;

use std::path::Path;

pub use cache::*;
use once_cell::sync::Lazy;
pub use observability::*;
pub use providers::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
pub use usage::*;

/// Starter configuration written by `troupe-llm init`.
pub const EXAMPLE_CONFIG: &str = r#"# troupe-llm configuration

[provider]
type = "gemini"
api_key = "${GEMINI_API_KEY}"
model = "gemini-2.5-flash-lite-preview-09-2025"
timeout_secs = 120

[provider.retry]
max_attempts = 3
backoff_unit_ms = 10000

[context_cache]
enabled = true
min_chars = 4000
ttl_secs = 3600
reuse_min_remaining_secs = 900
renew_after_secs = 2700

[usage]
# pricing_file = "pricing.json"
log_path = "usage_log.jsonl"
table_path = "usage_history.md"

[observability.logging]
level = "info"
format = "compact"
"#;

/// Root configuration.
///
/// All sections have defaults except `provider`, which is only required by
/// operations that talk to a model.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TroupeConfig {
    /// Model provider used for generation and cache management.
    #[serde(default)]
    pub provider: Option<ProviderConfig>,

    /// Server-side context cache lifecycle.
    #[serde(default)]
    pub context_cache: ContextCacheConfig,

    /// Pricing and usage persistence.
    #[serde(default)]
    pub usage: UsageConfig,

    /// Logging.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl TroupeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing variables cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        let config: TroupeConfig = toml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Default location: `<config dir>/troupe-llm/troupe-llm.toml`.
    #[cfg(feature = "cli")]
    pub fn default_path() -> Option<std::path::PathBuf> {
        dirs::config_dir().map(|dir| dir.join("troupe-llm").join("troupe-llm.toml"))
    }

    /// The provider section, or an error naming what is missing.
    pub fn require_provider(&self) -> Result<&ProviderConfig, ConfigError> {
        self.provider
            .as_ref()
            .ok_or_else(|| ConfigError::Validation("a [provider] section is required".into()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(provider) = &self.provider {
            provider.validate().map_err(ConfigError::Validation)?;
        }
        self.context_cache
            .validate()
            .map_err(ConfigError::Validation)?;
        self.usage.validate().map_err(ConfigError::Validation)?;
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern is a valid regex"));

/// Expand environment variables in the format `${VAR_NAME}`.
/// Variables after a `#` on the same line are left alone.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());

    for (idx, line) in input.lines().enumerate() {
        if idx > 0 {
            result.push('\n');
        }
        let comment_pos = line.find('#');
        let mut last_end = 0;

        for m in ENV_VAR_PATTERN.find_iter(line) {
            if let Some(pos) = comment_pos
                && m.start() >= pos
            {
                break;
            }

            result.push_str(&line[last_end..m.start()]);
            let var_name = &line[m.start() + 2..m.end() - 1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            result.push_str(&value);
            last_end = m.end();
        }

        result.push_str(&line[last_end..]);
    }

    if input.ends_with('\n') {
        result.push('\n');
    }

    Ok(result)
}
