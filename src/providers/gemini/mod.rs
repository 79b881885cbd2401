//! Gemini-native engine.
//!
//! Speaks `generateContent` directly so that requests can reference a
//! server-side context cache via `cachedContent`.

mod cache;
mod convert;
mod types;

pub use cache::GeminiCacheClient;
use convert::convert_messages;
use tracing::debug;
use types::{GeminiGenerateContentRequest, GeminiGenerateContentResponse, GeminiGenerationConfig};

use super::{
    EngineError, ProviderReply, decode_json, error::GeminiErrorParser, retry::with_backoff,
    send_checked,
};
use crate::{
    api_types::{GenerationRequest, Message},
    config::GeminiProviderConfig,
    pricing::normalize_model_id,
    usage::TokenUsage,
};

pub(super) const PROVIDER: &str = "gemini";

const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiEngine {
    client: reqwest::Client,
    config: GeminiProviderConfig,
}

impl GeminiEngine {
    pub fn new(config: GeminiProviderConfig, client: reqwest::Client) -> Self {
        Self { client, config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Cache client sharing this engine's credentials and HTTP client.
    pub fn cache_client(&self) -> GeminiCacheClient {
        GeminiCacheClient::new(self.config.clone(), self.client.clone())
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            normalize_model_id(&self.config.model)
        )
    }

    /// Cache name to attach, if the caller holds one for this model.
    fn cached_content(&self, request: &GenerationRequest) -> Option<String> {
        let cache = request.context.cache.as_ref()?;
        if normalize_model_id(&cache.model) != normalize_model_id(&self.config.model) {
            debug!(
                cache = %cache.name,
                cache_model = %cache.model,
                model = %self.config.model,
                "Context cache belongs to another model, sending uncached"
            );
            return None;
        }
        Some(cache.name.clone())
    }

    /// Send already identity-locked `messages` and decode the reply.
    #[tracing::instrument(
        skip(self, messages, request),
        fields(
            provider = PROVIDER,
            operation = "generate_content",
            model = %self.config.model,
            cached = request.context.cache.is_some(),
        )
    )]
    pub(super) async fn send(
        &self,
        messages: &[Message],
        request: &GenerationRequest,
    ) -> Result<ProviderReply, EngineError> {
        let schema = request.schema.as_ref();
        let gemini_request = GeminiGenerateContentRequest {
            contents: convert_messages(messages, request.agent_identity()),
            cached_content: self.cached_content(request),
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                response_mime_type: schema.map(|_| "application/json"),
                response_json_schema: schema.map(|s| s.schema.clone()),
            },
        };

        // Pre-serialize request body before retry loop to avoid repeated serialization
        let body = serde_json::to_vec(&gemini_request).unwrap_or_default();
        let url = self.generate_url();

        let response: GeminiGenerateContentResponse =
            with_backoff(&self.config.retry, PROVIDER, "generate_content", || async {
                let http_request = self
                    .client
                    .post(&url)
                    .header(API_KEY_HEADER, self.config.api_key.as_str())
                    .timeout(self.config.timeout())
                    .header("content-type", "application/json")
                    .body(body.clone());
                let response = send_checked::<GeminiErrorParser>(PROVIDER, http_request).await?;
                decode_json(PROVIDER, response).await
            })
            .await?;

        let usage = response.usage_metadata.as_ref().map(|m| {
            TokenUsage::new(
                m.prompt_token_count
                    .saturating_sub(m.cached_content_token_count),
                m.candidates_token_count,
                m.cached_content_token_count,
            )
        });

        Ok(ProviderReply {
            text: response.text(),
            parsed: None,
            usage,
        })
    }
}

impl std::fmt::Debug for GeminiEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
