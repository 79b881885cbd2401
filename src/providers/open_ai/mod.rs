//! Chat-completion engine for OpenAI and compatible servers.

mod convert;
mod types;

use std::collections::HashMap;

use convert::convert_messages;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::{debug, warn};
use types::{ChatCompletionRequest, ChatCompletionResponse, JsonSchemaFormat, ResponseFormat};

use super::{
    EngineError, ProviderReply, decode_json, error::OpenAiErrorParser, retry::with_backoff,
    send_checked,
};
use crate::{
    api_types::{GenerationRequest, Message},
    config::OpenAiProviderConfig,
    usage::TokenUsage,
};

pub(super) const PROVIDER: &str = "openai";

pub struct OpenAiEngine {
    client: reqwest::Client,
    config: OpenAiProviderConfig,
    base_url: String,
}

impl OpenAiEngine {
    pub fn new(config: OpenAiProviderConfig, client: reqwest::Client) -> Self {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Self {
            client,
            config,
            base_url,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Build a request with common auth headers and timeout.
    fn build_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let request = if let Some(api_key) = &self.config.api_key {
            request.header(AUTHORIZATION, format!("Bearer {}", api_key))
        } else {
            request
        };

        let request = extra_headers(&self.config.headers)
            .fold(request, |req, (key, value)| req.header(key, value));

        request.timeout(self.config.timeout())
    }

    /// Send already identity-locked `messages` and decode the reply.
    #[tracing::instrument(
        skip(self, messages, request),
        fields(
            provider = PROVIDER,
            operation = "chat_completion",
            model = %self.config.model,
        )
    )]
    pub(super) async fn send(
        &self,
        messages: &[Message],
        request: &GenerationRequest,
    ) -> Result<ProviderReply, EngineError> {
        if let Some(cache) = &request.context.cache {
            debug!(
                cache = %cache.name,
                "Chat completions have no context cache support, ignoring reference"
            );
        }

        let chat_request = ChatCompletionRequest {
            model: &self.config.model,
            messages: convert_messages(messages, request.agent_identity()),
            temperature: request.temperature,
            response_format: request
                .schema
                .as_ref()
                .map(|schema| ResponseFormat::JsonSchema {
                    json_schema: JsonSchemaFormat {
                        name: &schema.name,
                        schema: &schema.schema,
                        strict: schema.strict,
                    },
                }),
        };

        // Pre-serialize before retry loop to avoid repeated serialization
        let body = serde_json::to_vec(&chat_request).unwrap_or_default();
        let url = format!("{}/chat/completions", self.base_url);

        let response: ChatCompletionResponse =
            with_backoff(&self.config.retry, PROVIDER, "chat_completion", || async {
                let http_request = self
                    .build_request(self.client.post(&url))
                    .header(CONTENT_TYPE, "application/json")
                    .body(body.clone());
                let response = send_checked::<OpenAiErrorParser>(PROVIDER, http_request).await?;
                decode_json(PROVIDER, response).await
            })
            .await?;

        let usage = response.usage.as_ref().map(|u| {
            let cached = u.cached_tokens();
            TokenUsage::new(
                u.prompt_tokens.saturating_sub(cached),
                u.completion_tokens,
                cached,
            )
        });

        let Some(choice) = response.choices.into_iter().next() else {
            return Err(EngineError::decode(PROVIDER, "response contained no choices"));
        };
        let message = choice.message;
        if let Some(refusal) = &message.refusal {
            warn!(refusal = %refusal, "Model refused the request");
        }

        Ok(ProviderReply {
            text: message.content.unwrap_or_default(),
            parsed: message.parsed,
            usage,
        })
    }
}

fn extra_headers(headers: &HashMap<String, String>) -> impl Iterator<Item = (&str, &str)> {
    headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
}

impl std::fmt::Debug for OpenAiEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
