//! The suspend/finish contract returned to callers.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolRequest;

/// Outcome of one `execute()` call on a conversation.
///
/// `Finished` is terminal. Every other variant names the datum the caller
/// must supply before the next `execute()` call can make progress:
///
/// | Variant                    | Resume operation                         |
/// |----------------------------|------------------------------------------|
/// | `AwaitingUserMessage`      | `append_user_message`                    |
/// | `AwaitingToolResult`       | `append_tool_result` (one per request id)|
/// | `AwaitingToolConfirmation` | `confirm_tool_execution` / `reject_tool_execution` |
///
/// Calling `execute()` again before the requirement is met re-surfaces the
/// same status without re-invoking anything.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The flow reached a terminal edge; `outputs` carries a value for
    /// every declared flow output.
    Finished {
        outputs: FxHashMap<String, Value>,
    },
    /// A step needs a user message; `message` is an optional prompt.
    AwaitingUserMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Client-executed tool calls are outstanding; one result per request
    /// id must be submitted before execution proceeds.
    AwaitingToolResult {
        requests: Vec<ToolRequest>,
    },
    /// Tool calls await a confirm/reject decision. A confirmation-gated
    /// tool is never run without a recorded decision, even across retries.
    AwaitingToolConfirmation {
        requests: Vec<ToolRequest>,
    },
}

impl ExecutionStatus {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, ExecutionStatus::Finished { .. })
    }

    /// Finished output values, if this status is terminal.
    #[must_use]
    pub fn output_values(&self) -> Option<&FxHashMap<String, Value>> {
        match self {
            ExecutionStatus::Finished { outputs } => Some(outputs),
            _ => None,
        }
    }

    /// Stable label used in events and logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            ExecutionStatus::Finished { .. } => "finished",
            ExecutionStatus::AwaitingUserMessage { .. } => "awaiting_user_message",
            ExecutionStatus::AwaitingToolResult { .. } => "awaiting_tool_result",
            ExecutionStatus::AwaitingToolConfirmation { .. } => "awaiting_tool_confirmation",
        }
    }
}
