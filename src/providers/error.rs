//! Provider error classification.
//!
//! Every provider reports failures in its own body format. Parsers here map
//! them onto one [`ErrorKind`] so the retry policy and callers can reason
//! about failures without knowing which provider produced them.

use reqwest::StatusCode;

use crate::validation::SchemaError;

/// Provider-independent failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Rate limit or quota exhaustion. The only retried kind.
    RateLimited,
    /// Invalid or missing credentials, permission denied.
    Authentication,
    /// Malformed request, unknown model, bad schema.
    InvalidRequest,
    /// Provider-side failure.
    Server,
    /// Connection failure or timeout before a response arrived.
    Transport,
    /// A successful response that could not be decoded.
    Decode,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::Authentication => "authentication",
            Self::InvalidRequest => "invalid_request",
            Self::Server => "server",
            Self::Transport => "transport",
            Self::Decode => "decode",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited)
    }

    /// Classify from the HTTP status alone.
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            429 => Self::RateLimited,
            401 | 403 => Self::Authentication,
            500..=599 => Self::Server,
            _ => Self::InvalidRequest,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error information extracted from a provider's error response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    /// Provider-specific error code.
    pub code: String,
}

impl ProviderErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: code.into(),
        }
    }
}

/// Implement this trait for each provider to extract error information
/// from their specific error format.
pub trait ProviderErrorParser {
    fn parse_error(status: StatusCode, body: &[u8]) -> ProviderErrorInfo;
}

/// Chat-completion style error parser.
///
/// Body format: `{"error": {"message": "...", "type": "...", "code": "..."}}`.
pub struct OpenAiErrorParser;

impl ProviderErrorParser for OpenAiErrorParser {
    fn parse_error(status: StatusCode, body: &[u8]) -> ProviderErrorInfo {
        let error: serde_json::Value =
            serde_json::from_slice(body).unwrap_or_else(|_| serde_json::json!({}));

        let error_obj = &error["error"];
        let error_type = error_obj["type"].as_str();
        let code = error_obj["code"]
            .as_str()
            .or(error_type)
            .unwrap_or("unknown")
            .to_string();
        let message = error_obj["message"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());

        let kind = if status == StatusCode::TOO_MANY_REQUESTS {
            ErrorKind::RateLimited
        } else {
            match (error_type, code.as_str()) {
                (Some("rate_limit_error"), _) | (_, "rate_limit_exceeded") => {
                    ErrorKind::RateLimited
                }
                (Some("authentication_error" | "permission_error"), _)
                | (_, "invalid_api_key") => ErrorKind::Authentication,
                (Some("server_error"), _) => ErrorKind::Server,
                (Some("invalid_request_error"), _) => ErrorKind::InvalidRequest,
                _ => ErrorKind::from_status(status),
            }
        };

        ProviderErrorInfo::new(kind, message, code)
    }
}

/// Gemini error parser.
///
/// Body format: `{"error": {"code": 429, "status": "RESOURCE_EXHAUSTED", "message": "..."}}`.
pub struct GeminiErrorParser;

impl ProviderErrorParser for GeminiErrorParser {
    fn parse_error(status: StatusCode, body: &[u8]) -> ProviderErrorInfo {
        let error: serde_json::Value =
            serde_json::from_slice(body).unwrap_or_else(|_| serde_json::json!({}));

        let error_obj = &error["error"];
        let gemini_status = error_obj["status"].as_str().unwrap_or("UNKNOWN");
        let message = error_obj["message"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());

        let kind = match gemini_status {
            "RESOURCE_EXHAUSTED" => ErrorKind::RateLimited,
            "UNAUTHENTICATED" | "PERMISSION_DENIED" => ErrorKind::Authentication,
            "INVALID_ARGUMENT" | "FAILED_PRECONDITION" | "NOT_FOUND" => ErrorKind::InvalidRequest,
            "INTERNAL" | "UNAVAILABLE" | "DEADLINE_EXCEEDED" => ErrorKind::Server,
            _ => ErrorKind::from_status(status),
        };

        ProviderErrorInfo::new(kind, message, gemini_status)
    }
}

/// Errors returned by [`Engine`](super::Engine) calls.
///
/// Parse failures of structured output are not errors; they surface as
/// [`GenerationResult::Unrecoverable`](crate::api_types::GenerationResult).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{provider} API error ({status}, {}): {}", .info.code, .info.message)]
    Api {
        provider: &'static str,
        status: u16,
        info: ProviderErrorInfo,
    },

    /// Transport failure. The URL is stripped before wrapping.
    #[error("HTTP request failed: {0}")]
    Request(reqwest::Error),

    #[error("Failed to decode {provider} response: {message}")]
    Decode {
        provider: &'static str,
        message: String,
    },

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request(error.without_url())
    }
}

impl EngineError {
    /// Build an API error from a non-success response body.
    pub fn from_response<P: ProviderErrorParser>(
        provider: &'static str,
        status: StatusCode,
        body: &[u8],
    ) -> Self {
        Self::Api {
            provider,
            status: status.as_u16(),
            info: P::parse_error(status, body),
        }
    }

    pub fn decode(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Decode {
            provider,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api { info, .. } => info.kind,
            Self::Request(e) => match e.status() {
                Some(status) => ErrorKind::from_status(status),
                None if e.is_decode() => ErrorKind::Decode,
                None => ErrorKind::Transport,
            },
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Schema(_) => ErrorKind::InvalidRequest,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("RESOURCE_EXHAUSTED", StatusCode::TOO_MANY_REQUESTS, ErrorKind::RateLimited)]
    #[case("UNAUTHENTICATED", StatusCode::UNAUTHORIZED, ErrorKind::Authentication)]
    #[case("PERMISSION_DENIED", StatusCode::FORBIDDEN, ErrorKind::Authentication)]
    #[case("INVALID_ARGUMENT", StatusCode::BAD_REQUEST, ErrorKind::InvalidRequest)]
    #[case("NOT_FOUND", StatusCode::NOT_FOUND, ErrorKind::InvalidRequest)]
    #[case("UNAVAILABLE", StatusCode::SERVICE_UNAVAILABLE, ErrorKind::Server)]
    #[case("SOMETHING_NEW", StatusCode::BAD_GATEWAY, ErrorKind::Server)]
    fn test_gemini_error_parser(
        #[case] gemini_status: &str,
        #[case] status: StatusCode,
        #[case] expected: ErrorKind,
    ) {
        let body = format!(r#"{{"error": {{"status": "{gemini_status}", "message": "boom"}}}}"#);
        let info = GeminiErrorParser::parse_error(status, body.as_bytes());
        assert_eq!(info.kind, expected);
        assert_eq!(info.message, "boom");
        assert_eq!(info.code, gemini_status);
    }

    #[test]
    fn test_gemini_error_parser_unparseable_body() {
        let info = GeminiErrorParser::parse_error(StatusCode::TOO_MANY_REQUESTS, b"slow down");
        assert_eq!(info.kind, ErrorKind::RateLimited);
        assert_eq!(info.message, "slow down");
        assert_eq!(info.code, "UNKNOWN");
    }

    #[rstest]
    #[case(StatusCode::TOO_MANY_REQUESTS, "insufficient_quota", "insufficient_quota", ErrorKind::RateLimited)]
    #[case(StatusCode::BAD_REQUEST, "invalid_request_error", "model_not_found", ErrorKind::InvalidRequest)]
    #[case(StatusCode::UNAUTHORIZED, "invalid_request_error", "invalid_api_key", ErrorKind::Authentication)]
    #[case(StatusCode::FORBIDDEN, "permission_error", "forbidden", ErrorKind::Authentication)]
    #[case(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "internal", ErrorKind::Server)]
    fn test_openai_error_parser(
        #[case] status: StatusCode,
        #[case] error_type: &str,
        #[case] code: &str,
        #[case] expected: ErrorKind,
    ) {
        let body = format!(
            r#"{{"error": {{"message": "nope", "type": "{error_type}", "code": "{code}"}}}}"#
        );
        let info = OpenAiErrorParser::parse_error(status, body.as_bytes());
        assert_eq!(info.kind, expected);
        assert_eq!(info.code, code);
    }

    #[test]
    fn test_openai_error_parser_without_type_uses_status() {
        let info = OpenAiErrorParser::parse_error(StatusCode::FORBIDDEN, b"{}");
        assert_eq!(info.kind, ErrorKind::Authentication);
        assert_eq!(info.code, "unknown");
    }

    #[test]
    fn test_engine_error_kind_and_display() {
        let err = EngineError::from_response::<GeminiErrorParser>(
            "gemini",
            StatusCode::TOO_MANY_REQUESTS,
            br#"{"error": {"status": "RESOURCE_EXHAUSTED", "message": "quota"}}"#,
        );
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.kind().is_retryable());
        assert_eq!(
            err.to_string(),
            "gemini API error (429, RESOURCE_EXHAUSTED): quota"
        );

        assert_eq!(EngineError::decode("gemini", "bad").kind(), ErrorKind::Decode);
        assert!(!ErrorKind::Server.is_retryable());
    }
}
