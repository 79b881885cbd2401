//! Identity lock directive.
//!
//! Long cached contexts and strict schemas make models drift out of the
//! persona they are playing. Each outgoing request gets a short directive
//! naming the persona, appended to the last instruction-bearing message.

use crate::api_types::{Message, Role};

/// Prefix of every directive. Used to detect directives echoed back into
/// model output.
pub const IDENTITY_LOCK_MARKER: &str = "[SYSTEM INSTRUCTION]";

/// Build the directive text for `agent`.
pub fn identity_lock_directive(agent: &str, structured: bool) -> String {
    let mut directive = format!(
        "\n\n{IDENTITY_LOCK_MARKER}: CRITICAL IDENTITY LOCK: You are {agent}. \
         You MUST refer to yourself as {agent}. \
         DO NOT refer to anyone as 'Agent 1', 'Agent 2', etc. \
         Your turn ONLY consists of 1 or 2 actions. \
         If you just used a 'TALK' or 'THINK' action, you MUST immediately output \
         a 'DONE' action next to yield your turn."
    );
    if structured {
        directive.push_str(" Output your response as a strict JSON.");
    }
    directive
}

/// Return a copy of `messages` with the identity lock applied.
///
/// The directive goes on the last `user` or `system` message. When there is
/// none a new `user` message carrying only the directive is appended. The
/// caller's list is never modified.
pub fn inject_identity_lock(
    messages: &[Message],
    agent: Option<&str>,
    structured: bool,
) -> Vec<Message> {
    let mut out = messages.to_vec();
    let Some(agent) = agent.map(str::trim).filter(|a| !a.is_empty()) else {
        return out;
    };

    let directive = identity_lock_directive(agent, structured);
    match out
        .iter_mut()
        .rev()
        .find(|m| matches!(m.role, Role::User | Role::System))
    {
        Some(target) => target.content.push_str(&directive),
        None => out.push(Message::user(directive.trim())),
    }
    out
}
