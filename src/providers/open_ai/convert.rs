use super::types::ChatMessage;
use crate::{
    api_types::{Message, Role},
    providers::attributed_content,
};

/// Roles pass through unchanged. Empty system turns are dropped.
pub(super) fn convert_messages(messages: &[Message], agent: Option<&str>) -> Vec<ChatMessage> {
    messages
        .iter()
        .filter(|m| !(m.role == Role::System && m.content.trim().is_empty()))
        .map(|m| ChatMessage {
            role: m.role.as_str(),
            content: attributed_content(m, agent).into_owned(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_pass_through_with_attribution() {
        let messages = vec![
            Message::system(""),
            Message::system("Stay in character."),
            Message::assistant("Hello").with_speaker("Bruno"),
            Message::assistant("Hi Bruno").with_speaker("Ana"),
            Message::user("Continue"),
        ];

        let converted = convert_messages(&messages, Some("Ana"));
        assert_eq!(
            converted,
            vec![
                ChatMessage {
                    role: "system",
                    content: "Stay in character.".into()
                },
                ChatMessage {
                    role: "assistant",
                    content: "[Bruno]: Hello".into()
                },
                ChatMessage {
                    role: "assistant",
                    content: "Hi Bruno".into()
                },
                ChatMessage {
                    role: "user",
                    content: "Continue".into()
                },
            ]
        );
    }

    #[test]
    fn test_speaker_without_agent_is_attributed() {
        let messages = vec![Message::user("Ready").with_speaker("Narrator")];
        let converted = convert_messages(&messages, None);
        assert_eq!(converted[0].content, "[Narrator]: Ready");
    }
}
