//! Identifier generation for conversations and tool requests.
//!
//! Ids are prefixed v4 UUIDs. Prefixes keep log lines and transcripts
//! parseable: `conv-…` for conversations, `tc-…` for tool calls.

use uuid::Uuid;

/// Generates process-unique identifiers.
#[derive(Clone, Debug, Default)]
pub struct IdGenerator;

impl IdGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Id for a new conversation.
    #[must_use]
    pub fn conversation_id(&self) -> String {
        format!("conv-{}", Uuid::new_v4())
    }

    /// Id for a logical tool call. Minted exactly once per call; the same
    /// id is reused across every suspend/resume cycle of that call.
    #[must_use]
    pub fn tool_request_id(&self) -> String {
        format!("tc-{}", Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_prefixed_and_unique() {
        let ids = IdGenerator::new();
        let a = ids.tool_request_id();
        let b = ids.tool_request_id();
        assert!(a.starts_with("tc-"));
        assert!(ids.conversation_id().starts_with("conv-"));
        assert_ne!(a, b);
    }
}
