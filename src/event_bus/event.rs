use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Structured event emitted at execution boundaries.
///
/// Events are observability data, not control flow: losing an event never
/// changes what a conversation computes. Sinks attached to the
/// [`EventBus`](super::EventBus) decide how to render or forward them.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Event {
    Step(StepEvent),
    Tool(ToolEvent),
    Diagnostic(DiagnosticEvent),
}

/// Lifecycle phase of a step boundary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum StepPhase {
    Started,
    Completed { branch: String },
    Suspended { status: String },
}

/// Event scoped to a single step invocation.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepEvent {
    pub step_id: String,
    #[serde(flatten)]
    pub phase: StepPhase,
    pub when: DateTime<Utc>,
}

/// Lifecycle phase of a tool handshake.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolPhase {
    Requested,
    Confirmed,
    Rejected,
    Completed,
}

/// Event scoped to one logical tool call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolEvent {
    pub step_id: String,
    pub request_id: String,
    pub tool: String,
    pub phase: ToolPhase,
    pub when: DateTime<Utc>,
}

/// Free-form diagnostic event.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub scope: String,
    pub message: String,
}

impl Event {
    pub fn step_started(step_id: impl Into<String>) -> Self {
        Event::Step(StepEvent {
            step_id: step_id.into(),
            phase: StepPhase::Started,
            when: Utc::now(),
        })
    }

    pub fn step_completed(step_id: impl Into<String>, branch: impl Into<String>) -> Self {
        Event::Step(StepEvent {
            step_id: step_id.into(),
            phase: StepPhase::Completed {
                branch: branch.into(),
            },
            when: Utc::now(),
        })
    }

    pub fn step_suspended(step_id: impl Into<String>, status: impl Into<String>) -> Self {
        Event::Step(StepEvent {
            step_id: step_id.into(),
            phase: StepPhase::Suspended {
                status: status.into(),
            },
            when: Utc::now(),
        })
    }

    pub fn tool(
        step_id: impl Into<String>,
        request_id: impl Into<String>,
        tool: impl Into<String>,
        phase: ToolPhase,
    ) -> Self {
        Event::Tool(ToolEvent {
            step_id: step_id.into(),
            request_id: request_id.into(),
            tool: tool.into(),
            phase,
            when: Utc::now(),
        })
    }

    pub fn diagnostic(scope: impl Into<String>, message: impl Into<String>) -> Self {
        Event::Diagnostic(DiagnosticEvent {
            scope: scope.into(),
            message: message.into(),
        })
    }

    /// Scope label for filtering and rendering.
    pub fn scope_label(&self) -> &str {
        match self {
            Event::Step(e) => &e.step_id,
            Event::Tool(e) => &e.step_id,
            Event::Diagnostic(e) => &e.scope,
        }
    }

    /// Normalized JSON projection for structured sinks.
    pub fn to_json_value(&self) -> Value {
        match self {
            Event::Step(e) => json!({
                "type": "step",
                "step_id": e.step_id,
                "phase": serde_json::to_value(&e.phase).unwrap_or(Value::Null),
                "timestamp": e.when.to_rfc3339(),
            }),
            Event::Tool(e) => json!({
                "type": "tool",
                "step_id": e.step_id,
                "request_id": e.request_id,
                "tool": e.tool,
                "phase": serde_json::to_value(&e.phase).unwrap_or(Value::Null),
                "timestamp": e.when.to_rfc3339(),
            }),
            Event::Diagnostic(e) => json!({
                "type": "diagnostic",
                "scope": e.scope,
                "message": e.message,
            }),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Step(e) => match &e.phase {
                StepPhase::Started => write!(f, "step {} started", e.step_id),
                StepPhase::Completed { branch } => {
                    write!(f, "step {} completed via branch `{}`", e.step_id, branch)
                }
                StepPhase::Suspended { status } => {
                    write!(f, "step {} suspended ({})", e.step_id, status)
                }
            },
            Event::Tool(e) => write!(
                f,
                "tool {} [{}] {:?} at step {}",
                e.tool, e.request_id, e.phase, e.step_id
            ),
            Event::Diagnostic(e) => write!(f, "[{}] {}", e.scope, e.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_projection_has_type_tag() {
        let event = Event::step_completed("lookup", "next");
        let json = event.to_json_value();
        assert_eq!(json["type"], "step");
        assert_eq!(json["step_id"], "lookup");

        let event = Event::diagnostic("budget", "limit reached");
        assert_eq!(event.to_json_value()["type"], "diagnostic");
    }

    #[test]
    fn display_is_human_readable() {
        let event = Event::step_suspended("ask", "awaiting_user_message");
        assert_eq!(event.to_string(), "step ask suspended (awaiting_user_message)");
    }
}
