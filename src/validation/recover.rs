use serde_json::{Deserializer, Value};

use super::schema::SchemaValidator;
use crate::providers::identity::IDENTITY_LOCK_MARKER;

/// Characters of raw text logged when recovery fails.
const DIAGNOSTIC_PREFIX_CHARS: usize = 500;

/// Remove a surrounding Markdown code fence, with or without a `json` tag.
pub fn strip_code_fences(text: &str) -> &str {
    let mut s = text.trim();
    if let Some(rest) = s.strip_prefix("```") {
        s = rest
            .strip_prefix("json")
            .or_else(|| rest.strip_prefix("JSON"))
            .unwrap_or(rest);
    }
    if let Some(rest) = s.strip_suffix("```") {
        s = rest;
    }
    s.trim()
}

/// Truncate every string in `value` that contains the identity lock marker
/// at the marker. Returns true if anything changed.
pub fn scrub_identity_artifacts(value: &mut Value) -> bool {
    match value {
        Value::String(s) => match s.find(IDENTITY_LOCK_MARKER) {
            Some(pos) => {
                *s = s[..pos].trim().to_string();
                true
            }
            None => false,
        },
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |changed, item| scrub_identity_artifacts(item) || changed),
        Value::Object(map) => map
            .values_mut()
            .fold(false, |changed, item| scrub_identity_artifacts(item) || changed),
        _ => false,
    }
}

fn accept(mut value: Value, validator: &SchemaValidator) -> Option<Value> {
    if scrub_identity_artifacts(&mut value) {
        tracing::debug!(schema = validator.name(), "Removed identity lock echo from reply");
    }
    validator.is_valid(&value).then_some(value)
}

/// Recover a schema-valid value from raw model text.
///
/// Tries the whole text (fences removed) first. Failing that, parses the
/// first complete JSON value starting at each `{` in turn, ignoring whatever
/// follows it, and returns the first object that validates. Returns `None`
/// when nothing validates.
pub fn recover_structured(raw: &str, validator: &SchemaValidator) -> Option<Value> {
    let cleaned = strip_code_fences(raw);

    if let Ok(value) = serde_json::from_str::<Value>(cleaned)
        && let Some(value) = accept(value, validator)
    {
        return Some(value);
    }

    for (start, _) in cleaned.match_indices('{') {
        let mut stream = Deserializer::from_str(&cleaned[start..]).into_iter::<Value>();
        if let Some(Ok(value @ Value::Object(_))) = stream.next()
            && let Some(value) = accept(value, validator)
        {
            tracing::debug!(
                schema = validator.name(),
                offset = start,
                "Recovered structured value embedded in reply"
            );
            return Some(value);
        }
    }

    let prefix: String = raw.chars().take(DIAGNOSTIC_PREFIX_CHARS).collect();
    tracing::warn!(
        schema = validator.name(),
        raw_len = raw.len(),
        raw_prefix = %prefix,
        "Could not recover a schema-valid value from model reply"
    );
    None
}
