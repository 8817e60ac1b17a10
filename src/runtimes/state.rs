//! Serializable per-conversation execution state.
//!
//! Everything a suspended conversation needs to resume — transcript,
//! resume queues, IO store, variable store, per-step in-flight contexts,
//! and the resumption cursor — lives in [`ExecutionState`]. The whole
//! structure is serde-serializable at every suspension point, so a
//! persisted conversation deserialized in another process behaves
//! identically to one that never left memory.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::flows::Flow;
use crate::message::Message;
use crate::runtimes::status::ExecutionStatus;
use crate::tools::{ToolRequest, ToolResult};

/// Caller decision on a confirmation-gated tool request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ToolDecision {
    /// Proceed, optionally with caller-modified arguments.
    Approved {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        modified_args: Option<FxHashMap<String, Value>>,
    },
    /// Refuse execution.
    Rejected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

/// Conversation-wide mutable state shared by every nesting level.
///
/// The transcript and the resume queues are root-scoped: a tool step
/// suspended three sub-flows deep still consumes its result from here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SharedState {
    pub transcript: Vec<Message>,
    /// User message supplied via `append_user_message`, not yet consumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_user_message: Option<String>,
    /// Tool results supplied by the caller, keyed by request id.
    #[serde(default)]
    pub tool_results: FxHashMap<String, ToolResult>,
    /// Confirmation decisions recorded by the caller, keyed by request id.
    #[serde(default)]
    pub tool_decisions: FxHashMap<String, ToolDecision>,
}

/// In-flight context a step parked between suspensions.
///
/// A closed union rather than an opaque blob: every variant is
/// serializable, which is what makes nested suspension survive a
/// serialize/deserialize cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InFlight {
    /// A minted tool request that has not completed. Holding the request
    /// here is the mint-once invariant: re-entry reuses it verbatim.
    ToolCall { request: ToolRequest },
    /// A partially-run sub-flow owned by a wrapper step.
    Subflow { frame: Box<FlowFrame> },
}

/// Mutable run state of one flow instance (root or nested).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowFrame {
    /// Step id execution resumes at; `None` means the begin step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Flow-level IO store: conversation inputs under their plain names,
    /// recorded step outputs under `step.output` scoped keys. Distinct
    /// from the transcript.
    #[serde(default)]
    pub io: FxHashMap<String, Value>,
    /// Variable store; a namespace separate from step IO, written only by
    /// variable steps.
    #[serde(default)]
    pub variables: FxHashMap<String, Value>,
    /// Per-step in-flight contexts, keyed by step id.
    #[serde(default)]
    pub inflight: FxHashMap<String, InFlight>,
    /// Completed loop iterations (loop flows only).
    #[serde(default)]
    pub iterations: u64,
}

impl FlowFrame {
    /// Fresh frame for `flow`, seeded with validated input values and the
    /// declared variable defaults.
    #[must_use]
    pub fn for_flow(flow: &Flow, inputs: FxHashMap<String, Value>) -> Self {
        let mut variables = FxHashMap::default();
        for var in flow.variables() {
            if let Some(default) = &var.default {
                variables.insert(var.name.clone(), default.clone());
            }
        }
        Self {
            cursor: None,
            io: inputs,
            variables,
            inflight: FxHashMap::default(),
            iterations: 0,
        }
    }
}

/// Scoped IO-store key for a recorded step output.
#[must_use]
pub fn scoped_output_key(step_id: &str, output: &str) -> String {
    format!("{step_id}.{output}")
}

/// Complete serializable state of one conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub conversation_id: String,
    pub shared: SharedState,
    pub root: FlowFrame,
    /// Status returned by the most recent `execute()` call, re-surfaced
    /// while its requirement is unmet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_status: Option<ExecutionStatus>,
}
