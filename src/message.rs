use serde::{Deserialize, Serialize};

use crate::tools::{ToolRequest, ToolResult};

/// A transcript entry in a conversation.
///
/// Most entries are plain role/content pairs ("user", "assistant",
/// "system"). Tool traffic is recorded with dedicated roles and structured
/// payloads so a persisted transcript can reconstruct the full
/// request/result handshake.
///
/// # Examples
///
/// ```
/// use weftflow::message::Message;
///
/// let user_msg = Message::user("What's the weather like?");
/// let assistant_msg = Message::assistant("Let me check that for you.");
///
/// assert!(user_msg.has_role(Message::USER));
/// assert!(!assistant_msg.has_role(Message::USER));
/// ```
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    /// The role of the entry (see the constants on [`Message`]).
    pub role: String,
    /// Text content; empty for pure tool-traffic entries.
    pub content: String,
    /// Tool requests published for caller execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_requests: Option<Vec<ToolRequest>>,
    /// A tool result submitted by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
}

impl Message {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// Assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction message role.
    pub const SYSTEM: &'static str = "system";
    /// Published tool request awaiting caller execution.
    pub const TOOL_REQUEST: &'static str = "tool_request";
    /// Tool result submitted by the caller.
    pub const TOOL_RESULT: &'static str = "tool_result";

    /// Creates a plain message with the specified role and content.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            tool_requests: None,
            tool_result: None,
        }
    }

    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Creates a transcript entry publishing tool requests to the caller.
    #[must_use]
    pub fn tool_requests(requests: Vec<ToolRequest>) -> Self {
        Self {
            role: Self::TOOL_REQUEST.to_string(),
            content: String::new(),
            tool_requests: Some(requests),
            tool_result: None,
        }
    }

    /// Creates a transcript entry recording a submitted tool result.
    #[must_use]
    pub fn tool_result(result: ToolResult) -> Self {
        Self {
            role: Self::TOOL_RESULT.to_string(),
            content: String::new(),
            tool_requests: None,
            tool_result: Some(result),
        }
    }

    /// Returns true if this message has the specified role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}
