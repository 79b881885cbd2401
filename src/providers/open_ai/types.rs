//! Chat completions wire types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
pub(super) struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat<'a>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(super) struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(super) enum ResponseFormat<'a> {
    JsonSchema { json_schema: JsonSchemaFormat<'a> },
}

#[derive(Debug, Serialize)]
pub(super) struct JsonSchemaFormat<'a> {
    pub name: &'a str,
    pub schema: &'a Value,
    pub strict: bool,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatChoice {
    pub message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(super) struct ChatResponseMessage {
    pub content: Option<String>,
    /// Pre-parsed structured output, returned by some compatible servers.
    pub parsed: Option<Value>,
    pub refusal: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(super) struct ChatUsage {
    /// Includes cached tokens.
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub(super) struct PromptTokensDetails {
    pub cached_tokens: u64,
}

impl ChatUsage {
    pub fn cached_tokens(&self) -> u64 {
        self.prompt_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_response_format_serialization() {
        let schema = json!({"type": "object"});
        let format = ResponseFormat::JsonSchema {
            json_schema: JsonSchemaFormat {
                name: "action",
                schema: &schema,
                strict: true,
            },
        };
        assert_eq!(
            serde_json::to_value(&format).unwrap(),
            json!({
                "type": "json_schema",
                "json_schema": {"name": "action", "schema": {"type": "object"}, "strict": true}
            })
        );
    }

    #[test]
    fn test_usage_without_details() {
        let usage: ChatUsage =
            serde_json::from_value(json!({"prompt_tokens": 12, "completion_tokens": 3}))
                .unwrap();
        assert_eq!(usage.cached_tokens(), 0);

        let usage: ChatUsage = serde_json::from_value(json!({
            "prompt_tokens": 12,
            "completion_tokens": 3,
            "prompt_tokens_details": {"cached_tokens": 8}
        }))
        .unwrap();
        assert_eq!(usage.cached_tokens(), 8);
    }
}
