use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Provider configuration.
///
/// The `type` field determines which wire protocol is spoken.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// Gemini `generateContent` API with context caching support.
    Gemini(GeminiProviderConfig),

    /// OpenAI chat completions API (also works for compatible servers such
    /// as OpenRouter, vLLM and Ollama).
    OpenAi(OpenAiProviderConfig),
}

impl ProviderConfig {
    pub fn model(&self) -> &str {
        match self {
            Self::Gemini(c) => &c.model,
            Self::OpenAi(c) => &c.model,
        }
    }

    pub fn retry(&self) -> &RetryConfig {
        match self {
            Self::Gemini(c) => &c.retry,
            Self::OpenAi(c) => &c.retry,
        }
    }

    pub(super) fn validate(&self) -> Result<(), String> {
        if self.model().trim().is_empty() {
            return Err("provider.model cannot be empty".into());
        }
        self.retry().validate()?;
        match self {
            Self::Gemini(c) => c.validate(),
            Self::OpenAi(c) => c.validate(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeminiProviderConfig {
    /// API key, sent as the `key` query parameter.
    pub api_key: String,

    /// Model used for generation and for context caches.
    #[serde(default = "default_gemini_model")]
    pub model: String,

    /// Base URL including the API version.
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Retry configuration for rate-limited requests.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl GeminiProviderConfig {
    fn validate(&self) -> Result<(), String> {
        if self.api_key.trim().is_empty() {
            return Err("provider.api_key is required for gemini".into());
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl std::fmt::Debug for GeminiProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiProviderConfig")
            .field("api_key", &"****")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .finish()
    }
}

fn default_gemini_model() -> String {
    "gemini-2.5-flash-lite-preview-09-2025".to_string()
}

fn default_gemini_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpenAiProviderConfig {
    /// API key. Required for OpenAI and most hosted providers.
    /// Optional for local servers like Ollama.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_openai_model")]
    pub model: String,

    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Extra headers sent with every request, e.g. OpenRouter's `HTTP-Referer`.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    #[serde(default)]
    pub retry: RetryConfig,
}

impl OpenAiProviderConfig {
    fn validate(&self) -> Result<(), String> {
        if self.base_url == default_openai_base_url() && self.api_key.is_none() {
            return Err("provider.api_key is required for OpenAI's API".into());
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl std::fmt::Debug for OpenAiProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "****"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("headers", &self.headers)
            .field("retry", &self.retry)
            .finish()
    }
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout() -> u64 {
    120
}

/// Configuration for retrying rate-limited requests.
///
/// Waits `attempt * backoff_unit_ms` after each failed attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Whether retries are enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit in milliseconds.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            backoff_unit_ms: default_backoff_unit_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_unit_ms.saturating_mul(u64::from(attempt)))
    }

    fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("provider.retry.max_attempts must be at least 1".into());
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_unit_ms() -> u64 {
    10_000
}
