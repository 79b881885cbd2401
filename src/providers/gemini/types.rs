//! Wire types for the Gemini `generateContent` and `cachedContents` APIs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::RemoteCache;

// ============================================================================
// generateContent request
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GeminiGenerateContentRequest {
    pub contents: Vec<GeminiContent>,
    /// Resource name of a context cache, e.g. `cachedContents/abc123`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_content: Option<String>,
    pub generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(super) struct GeminiContent {
    pub role: String,
    pub parts: Vec<GeminiPart>,
}

impl GeminiContent {
    pub fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            parts: vec![GeminiPart { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(super) struct GeminiPart {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GeminiGenerationConfig {
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_json_schema: Option<serde_json::Value>,
}

// ============================================================================
// generateContent response
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GeminiGenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<GeminiCandidate>,
    pub usage_metadata: Option<GeminiUsageMetadata>,
}

impl GeminiGenerateContentResponse {
    /// Concatenated text of the first candidate, skipping thought summaries.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter(|p| !p.thought)
                    .filter_map(|p| p.text.as_deref())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GeminiCandidate {
    /// Absent when the candidate was blocked.
    pub content: Option<GeminiResponseContent>,
    #[allow(dead_code)] // Deserialization field
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GeminiResponseContent {
    #[serde(default)]
    pub parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
pub(super) struct GeminiResponsePart {
    pub text: Option<String>,
    #[serde(default)]
    pub thought: bool,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct GeminiUsageMetadata {
    /// Includes cached tokens.
    pub prompt_token_count: u64,
    pub candidates_token_count: u64,
    pub cached_content_token_count: u64,
}

// ============================================================================
// cachedContents
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GeminiCreateCacheRequest {
    /// `models/{model}`.
    pub model: String,
    pub display_name: String,
    pub contents: Vec<GeminiContent>,
    /// Duration string such as `3600s`.
    pub ttl: String,
}

#[derive(Debug, Serialize)]
pub(super) struct GeminiUpdateCacheRequest {
    pub ttl: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct GeminiCachedContent {
    pub name: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub model: String,
    pub create_time: Option<DateTime<Utc>>,
    pub expire_time: Option<DateTime<Utc>>,
}

impl GeminiCachedContent {
    pub fn into_remote(self) -> RemoteCache {
        RemoteCache {
            name: self.name,
            display_name: self.display_name,
            model: self.model,
            create_time: self.create_time,
            expire_time: self.expire_time,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub(super) struct GeminiListCachesResponse {
    pub cached_contents: Vec<GeminiCachedContent>,
    pub next_page_token: Option<String>,
}
