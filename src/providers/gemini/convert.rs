//! Message translation into Gemini `contents`.
//!
//! Requests that reference a context cache may not carry a
//! `systemInstruction`, so system turns are sent as ordinary user turns with
//! a `System Instruction:` preamble instead.

use super::types::GeminiContent;
use crate::{
    api_types::{Message, Role},
    providers::attributed_content,
};

const SYSTEM_PREAMBLE: &str = "System Instruction:\n";

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::System | Role::User => "user",
        Role::Assistant => "model",
    }
}

pub(super) fn convert_messages(messages: &[Message], agent: Option<&str>) -> Vec<GeminiContent> {
    messages
        .iter()
        .filter_map(|message| {
            if message.role == Role::System && message.content.trim().is_empty() {
                return None;
            }
            let content = attributed_content(message, agent);
            let text = match message.role {
                Role::System => format!("{SYSTEM_PREAMBLE}{content}"),
                Role::User | Role::Assistant => content.into_owned(),
            };
            Some(GeminiContent::text(gemini_role(message.role), text))
        })
        .collect()
}
