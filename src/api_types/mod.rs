//! Engine-neutral request and response types.
//!
//! Callers describe a conversation with [`Message`]s, wrap it in a
//! [`GenerationRequest`] and receive a [`GenerationResult`]. Provider wire
//! shapes live under `providers::*` and never leak out of this module.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Sampling temperature used when the caller does not pick one.
pub const DEFAULT_TEMPERATURE: f64 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// Persona that produced this turn, used for attribution when several
    /// agents share one conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker_name: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            speaker_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker_name = Some(speaker.into());
        self
    }
}

/// Structured output descriptor sent to the provider and used as the final
/// validation gate on the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSchema {
    pub name: String,
    /// JSON Schema document.
    pub schema: Value,
    /// Ask chat-completion providers for strict schema adherence. Strict mode
    /// requires every property to be listed in `required` and
    /// `additionalProperties: false` on every object.
    #[serde(default)]
    pub strict: bool,
}

impl ResponseSchema {
    pub fn new(name: impl Into<String>, schema: Value) -> Self {
        Self {
            name: name.into(),
            schema,
            strict: false,
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Derive the schema from a Rust type.
    #[cfg(feature = "json-schema")]
    pub fn for_type<T: schemars::JsonSchema>() -> Self {
        let root = schemars::schema_for!(T);
        let mut schema = serde_json::to_value(root).unwrap_or_default();
        // Providers reject the meta-schema marker.
        if let Value::Object(map) = &mut schema {
            map.remove("$schema");
        }
        Self::new(T::schema_name(), schema)
    }
}

/// Reference to a live provider-side context cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheReference {
    /// Provider resource name, e.g. `cachedContents/abc123`.
    pub name: String,
    /// Model the cache was created for. A cache can only be used with it.
    pub model: String,
}

/// Per-call context threaded explicitly through the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationContext {
    /// Active context cache, when the caller holds one.
    pub cache: Option<CacheReference>,
    /// Simulation turn, recorded on the usage ledger.
    pub turn_index: Option<u64>,
}

impl GenerationContext {
    pub fn with_cache(mut self, cache: Option<CacheReference>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_turn(mut self, turn_index: u64) -> Self {
        self.turn_index = Some(turn_index);
        self
    }
}

/// Immutable input to a single generation call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub schema: Option<ResponseSchema>,
    /// Persona the model must speak as. Enables the identity lock.
    pub agent_identity: Option<String>,
    pub context: GenerationContext,
}

impl GenerationRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: DEFAULT_TEMPERATURE,
            schema: None,
            agent_identity: None,
            context: GenerationContext::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_schema(mut self, schema: ResponseSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_agent_identity(mut self, agent: impl Into<String>) -> Self {
        self.agent_identity = Some(agent.into());
        self
    }

    pub fn with_context(mut self, context: GenerationContext) -> Self {
        self.context = context;
        self
    }

    pub fn agent_identity(&self) -> Option<&str> {
        self.agent_identity.as_deref()
    }
}

/// Outcome of a generation call.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationResult {
    /// No schema was requested.
    Text(String),
    /// A value that passed schema validation.
    Structured(Value),
    /// A schema was requested but nothing valid could be recovered.
    Unrecoverable,
}

impl GenerationResult {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_structured(&self) -> Option<&Value> {
        match self {
            Self::Structured(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Unrecoverable)
    }

    /// Deserialize a structured result into `T`. Returns `Ok(None)` for text
    /// or unrecoverable results.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<Option<T>, serde_json::Error> {
        match self {
            Self::Structured(value) => serde_json::from_value(value).map(Some),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_defaults() {
        let request = GenerationRequest::new(vec![Message::user("hi")]);
        assert_eq!(request.temperature, DEFAULT_TEMPERATURE);
        assert!(request.schema.is_none());
        assert!(request.agent_identity().is_none());
        assert!(request.context.cache.is_none());
    }

    #[test]
    fn test_message_serde_omits_missing_speaker() {
        let json = serde_json::to_value(Message::assistant("ok")).unwrap();
        assert_eq!(json, json!({"role": "assistant", "content": "ok"}));

        let parsed: Message =
            serde_json::from_value(json!({"role": "user", "content": "x", "speaker_name": "Ana"}))
                .unwrap();
        assert_eq!(parsed.speaker_name.as_deref(), Some("Ana"));
    }

    #[test]
    fn test_into_typed() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Action {
            kind: String,
        }

        let result = GenerationResult::Structured(json!({"kind": "TALK"}));
        let action: Option<Action> = result.into_typed().unwrap();
        assert_eq!(
            action,
            Some(Action {
                kind: "TALK".into()
            })
        );

        let none: Option<Action> = GenerationResult::Unrecoverable.into_typed().unwrap();
        assert!(none.is_none());
    }

    #[cfg(feature = "json-schema")]
    #[test]
    fn test_schema_for_type_strips_meta_schema() {
        #[derive(schemars::JsonSchema)]
        #[allow(dead_code)]
        struct Reply {
            content: String,
        }

        let schema = ResponseSchema::for_type::<Reply>();
        assert_eq!(schema.name, "Reply");
        assert!(schema.schema.get("$schema").is_none());
        assert_eq!(schema.schema["properties"]["content"]["type"], "string");
    }
}
