//! # Provider engines
//!
//! [`Engine`] is the single entry point for generation. Every call goes
//! through the same pipeline regardless of provider:
//!
//! 1. compile the response schema, if any;
//! 2. append the identity lock to a copy of the messages;
//! 3. translate and send, retrying rate-limit failures;
//! 4. record token usage on the caller's ledger;
//! 5. validate or recover structured output.
//!
//! ## Retry loop pattern
//!
//! Request bodies are serialized once, before the retry loop. The closure
//! passed to [`retry::with_backoff`] only rebuilds the request builder:
//!
//! ```ignore
//! let body = serde_json::to_vec(&request).unwrap_or_default();
//! let reply = with_backoff(&retry, "gemini", "generate_content", || async {
//!     let request = client.post(&url).body(body.clone());
//!     let response = send_checked::<GeminiErrorParser>("gemini", request).await?;
//!     decode_json(PROVIDER, response).await
//! })
//! .await?;
//! ```

use std::{borrow::Cow, sync::Arc};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

mod error;
pub mod gemini;
pub mod identity;
pub mod open_ai;
pub mod retry;

pub use error::{
    EngineError, ErrorKind, GeminiErrorParser, OpenAiErrorParser, ProviderErrorInfo,
    ProviderErrorParser,
};
pub use gemini::{GeminiCacheClient, GeminiEngine};
pub use identity::{IDENTITY_LOCK_MARKER, inject_identity_lock};
pub use open_ai::OpenAiEngine;

use crate::{
    api_types::{GenerationRequest, GenerationResult, Message},
    cache::{CacheError, CacheResult, ContextCacheApi},
    config::ProviderConfig,
    usage::{TokenUsage, UsageLedger},
    validation::{SchemaValidator, recover_structured, scrub_identity_artifacts},
};

/// Provider-neutral result of one HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProviderReply {
    pub text: String,
    /// Structured output already parsed by the provider.
    pub parsed: Option<Value>,
    /// `None` when the provider returned no usage metadata.
    pub usage: Option<TokenUsage>,
}

/// Send `request` and turn a non-success status into an [`EngineError::Api`].
pub(crate) async fn send_checked<P: ProviderErrorParser>(
    provider: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<reqwest::Response, EngineError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.unwrap_or_default();
    Err(EngineError::from_response::<P>(provider, status, &body))
}

pub(crate) async fn decode_json<T: DeserializeOwned>(
    provider: &'static str,
    response: reqwest::Response,
) -> Result<T, EngineError> {
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|e| EngineError::decode(provider, e.to_string()))
}

/// Message content as sent on the wire. Turns spoken by someone other than
/// the current agent are prefixed with `[speaker]: `.
pub(crate) fn attributed_content<'a>(message: &'a Message, agent: Option<&str>) -> Cow<'a, str> {
    match message.speaker_name.as_deref() {
        Some(speaker) if Some(speaker) != agent => {
            Cow::Owned(format!("[{speaker}]: {}", message.content))
        }
        _ => Cow::Borrowed(&message.content),
    }
}

/// A configured provider engine.
#[derive(Debug)]
pub enum Engine {
    OpenAi(OpenAiEngine),
    Gemini(GeminiEngine),
}

impl Engine {
    pub fn from_config(config: &ProviderConfig, client: reqwest::Client) -> Self {
        match config {
            ProviderConfig::OpenAi(c) => Self::OpenAi(OpenAiEngine::new(c.clone(), client)),
            ProviderConfig::Gemini(c) => Self::Gemini(GeminiEngine::new(c.clone(), client)),
        }
    }

    pub fn model(&self) -> &str {
        match self {
            Self::OpenAi(e) => e.model(),
            Self::Gemini(e) => e.model(),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::OpenAi(_) => open_ai::PROVIDER,
            Self::Gemini(_) => gemini::PROVIDER,
        }
    }

    pub fn supports_context_cache(&self) -> bool {
        matches!(self, Self::Gemini(_))
    }

    /// Context cache operations for this engine's provider.
    pub fn cache_api(&self) -> CacheResult<Arc<dyn ContextCacheApi>> {
        match self {
            Self::Gemini(e) => Ok(Arc::new(e.cache_client())),
            Self::OpenAi(_) => Err(CacheError::Unsupported(open_ai::PROVIDER)),
        }
    }

    /// Run one generation and record its usage on `ledger`.
    ///
    /// Structured output that cannot be recovered yields
    /// [`GenerationResult::Unrecoverable`] rather than an error.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
        ledger: &mut UsageLedger,
    ) -> Result<GenerationResult, EngineError> {
        let validator = request
            .schema
            .as_ref()
            .map(SchemaValidator::compile)
            .transpose()?;

        let messages = inject_identity_lock(
            &request.messages,
            request.agent_identity(),
            validator.is_some(),
        );

        let reply = match self {
            Self::OpenAi(e) => e.send(&messages, request).await?,
            Self::Gemini(e) => e.send(&messages, request).await?,
        };

        match reply.usage {
            Some(usage) => {
                ledger.record(
                    self.model(),
                    usage,
                    request.agent_identity(),
                    request.context.turn_index,
                );
            }
            None => debug!(
                provider = self.provider_name(),
                model = self.model(),
                "Provider returned no usage metadata"
            ),
        }

        let Some(validator) = validator else {
            return Ok(GenerationResult::Text(reply.text));
        };

        if let Some(mut parsed) = reply.parsed {
            scrub_identity_artifacts(&mut parsed);
            if validator.is_valid(&parsed) {
                return Ok(GenerationResult::Structured(parsed));
            }
            debug!(
                schema = validator.name(),
                "Pre-parsed output failed validation, recovering from text"
            );
        }

        Ok(match recover_structured(&reply.text, &validator) {
            Some(value) => GenerationResult::Structured(value),
            None => GenerationResult::Unrecoverable,
        })
    }

    /// Generate a value of type `T`, deriving the response schema from it.
    ///
    /// Returns `Ok(None)` when nothing valid could be recovered.
    #[cfg(feature = "json-schema")]
    pub async fn generate_typed<T>(
        &self,
        request: GenerationRequest,
        ledger: &mut UsageLedger,
    ) -> Result<Option<T>, EngineError>
    where
        T: schemars::JsonSchema + DeserializeOwned,
    {
        let request = request.with_schema(crate::api_types::ResponseSchema::for_type::<T>());
        self.generate(&request, ledger)
            .await?
            .into_typed()
            .map_err(|e| EngineError::decode(self.provider_name(), e.to_string()))
    }
}
