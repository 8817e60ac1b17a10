//! The conversation surface: one stateful run of a compiled flow.
//!
//! A [`Conversation`] owns everything mutable about a run. The flow itself
//! is immutable shared configuration — many conversations execute the same
//! `Arc<Flow>` concurrently with no global lock. `execute` takes
//! `&mut self`, so two concurrent `execute()` calls against one
//! conversation are a compile error rather than a documented foot-gun.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::event_bus::{Event, EventBus, EventEmitter};
use crate::flows::Flow;
use crate::message::Message;
use crate::properties::{PropertyType, cast_value};
use crate::runtimes::executor::{ExecServices, ExecutionError, FlowOutcome, drive_flow};
use crate::runtimes::observer::ExecutionObserver;
use crate::runtimes::state::{ExecutionState, FlowFrame, SharedState, ToolDecision};
use crate::runtimes::status::ExecutionStatus;
use crate::tools::ToolResult;
use crate::utils::ids::IdGenerator;

/// Caller misuse of the resumption protocol — distinct from business and
/// tool errors, which surface as step failures.
#[derive(Debug, Error, Diagnostic)]
pub enum ProtocolError {
    #[error("conversation already finished")]
    #[diagnostic(code(weftflow::protocol::finished))]
    ConversationFinished,

    #[error("missing required conversation input: {name}")]
    #[diagnostic(code(weftflow::protocol::missing_input))]
    MissingConversationInput { name: String },

    #[error("conversation input `{name}` does not fit declared type {expected}")]
    #[diagnostic(code(weftflow::protocol::input_type))]
    InputTypeMismatch {
        name: String,
        expected: PropertyType,
    },

    #[error("no tool results are awaited right now")]
    #[diagnostic(code(weftflow::protocol::not_awaiting_results))]
    NotAwaitingToolResults,

    #[error("no tool confirmation is awaited right now")]
    #[diagnostic(code(weftflow::protocol::not_awaiting_confirmation))]
    NotAwaitingConfirmation,

    #[error("tool request id `{id}` does not correlate with any pending request")]
    #[diagnostic(code(weftflow::protocol::unknown_request))]
    UnknownToolRequest { id: String },

    #[error("a result for tool request `{id}` was already submitted")]
    #[diagnostic(code(weftflow::protocol::duplicate_result))]
    DuplicateToolResult { id: String },

    #[error("tool request `{id}` already has a recorded decision")]
    #[diagnostic(code(weftflow::protocol::already_decided))]
    ConfirmationAlreadyDecided { id: String },
}

impl Flow {
    /// Begin a new conversation on this flow.
    ///
    /// Inputs are validated against the flow's open input descriptors:
    /// required inputs must be present, and values must inhabit (or cast
    /// into) their declared types. Unknown keys are skipped with a
    /// warning.
    pub fn start_conversation(
        self: &Arc<Self>,
        inputs: FxHashMap<String, Value>,
    ) -> Result<Conversation, ProtocolError> {
        let mut seeded = FxHashMap::default();
        let mut inputs = inputs;

        for prop in self.input_descriptors() {
            match inputs.remove(&prop.name) {
                Some(value) => {
                    let value = if prop.ty.matches(&value) {
                        value
                    } else if infer_type(&value).is_castable_to(&prop.ty) {
                        cast_value(&value, &prop.ty)
                    } else {
                        return Err(ProtocolError::InputTypeMismatch {
                            name: prop.name.clone(),
                            expected: prop.ty.clone(),
                        });
                    };
                    seeded.insert(prop.name.clone(), value);
                }
                None => match &prop.default {
                    Some(default) => {
                        seeded.insert(prop.name.clone(), default.clone());
                    }
                    None => {
                        return Err(ProtocolError::MissingConversationInput {
                            name: prop.name.clone(),
                        });
                    }
                },
            }
        }
        for unknown in inputs.keys() {
            tracing::warn!(flow = %self.name(), input = %unknown, "ignoring undeclared conversation input");
        }

        let conversation_id = IdGenerator::new().conversation_id();
        tracing::debug!(flow = %self.name(), conversation = %conversation_id, "conversation started");

        Ok(Conversation {
            flow: Arc::clone(self),
            state: ExecutionState {
                conversation_id,
                shared: SharedState::default(),
                root: FlowFrame::for_flow(self, seeded),
                last_status: None,
            },
            observers: Vec::new(),
            emitter: EventEmitter::noop(),
        })
    }
}

/// Rough type of a JSON value, for validating conversation inputs against
/// the castability relation.
fn infer_type(value: &Value) -> PropertyType {
    match value {
        Value::String(_) => PropertyType::String,
        Value::Bool(_) => PropertyType::Boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => PropertyType::Integer,
        Value::Number(_) => PropertyType::Float,
        Value::Array(_) => PropertyType::List,
        Value::Object(_) => PropertyType::Dict,
        Value::Null => PropertyType::Null,
    }
}

/// One stateful run of a compiled [`Flow`].
///
/// # Lifecycle
///
/// ```text
/// Flow::start_conversation(inputs)
///        │
///        ▼
///   execute() ──► Finished ─────────────────── done
///        │
///        ├──► AwaitingUserMessage ── append_user_message ──► execute()
///        ├──► AwaitingToolResult ─── append_tool_result ───► execute()
///        └──► AwaitingToolConfirmation ── confirm/reject ──► execute()
/// ```
///
/// Calling `execute()` while a requirement is unmet re-surfaces the same
/// status without re-invoking anything. The whole execution state is
/// serializable at every suspension point; see
/// [`snapshot`](Conversation::snapshot) and
/// [`restore`](Conversation::restore).
pub struct Conversation {
    flow: Arc<Flow>,
    state: ExecutionState,
    observers: Vec<Arc<dyn ExecutionObserver>>,
    emitter: EventEmitter,
}

impl Conversation {
    pub(crate) fn from_parts(flow: Arc<Flow>, state: ExecutionState) -> Self {
        Self {
            flow,
            state,
            observers: Vec::new(),
            emitter: EventEmitter::noop(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.state.conversation_id
    }

    #[must_use]
    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }

    /// The conversation transcript, in append order.
    #[must_use]
    pub fn transcript(&self) -> &[Message] {
        &self.state.shared.transcript
    }

    /// Status returned by the most recent `execute()` call.
    #[must_use]
    pub fn status(&self) -> Option<&ExecutionStatus> {
        self.state.last_status.as_ref()
    }

    /// Finished output values, once the conversation has finished.
    #[must_use]
    pub fn output_values(&self) -> Option<&FxHashMap<String, Value>> {
        self.state.last_status.as_ref().and_then(|s| s.output_values())
    }

    /// Full serializable execution state (read-only).
    #[must_use]
    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    /// Attach a boundary observer (soft budgets, cancellation).
    /// Observers are not serialized; re-attach them after a restore.
    pub fn add_observer(&mut self, observer: Arc<dyn ExecutionObserver>) {
        self.observers.push(observer);
    }

    /// Stream execution events to `bus`. Not serialized; re-attach after
    /// a restore.
    pub fn attach_event_bus(&mut self, bus: &EventBus) {
        self.emitter = bus.emitter();
    }

    /// Drive the conversation until it finishes or suspends.
    ///
    /// If the previous status named a requirement the caller has not yet
    /// supplied — a user message, one result per pending request id, or a
    /// decision per pending confirmation — the same status is returned
    /// again and nothing is invoked.
    #[instrument(skip(self), fields(conversation = %self.state.conversation_id))]
    pub async fn execute(&mut self) -> Result<ExecutionStatus, ExecutionError> {
        if let Some(status) = &self.state.last_status {
            match status {
                ExecutionStatus::Finished { .. } => {
                    return Err(ProtocolError::ConversationFinished.into());
                }
                ExecutionStatus::AwaitingUserMessage { .. } => {
                    if self.state.shared.pending_user_message.is_none() {
                        return Ok(status.clone());
                    }
                }
                ExecutionStatus::AwaitingToolResult { requests } => {
                    if requests
                        .iter()
                        .any(|r| !self.state.shared.tool_results.contains_key(&r.id))
                    {
                        return Ok(status.clone());
                    }
                }
                ExecutionStatus::AwaitingToolConfirmation { requests } => {
                    if requests
                        .iter()
                        .any(|r| !self.state.shared.tool_decisions.contains_key(&r.id))
                    {
                        return Ok(status.clone());
                    }
                }
            }
        }

        let flow = Arc::clone(&self.flow);
        let standing = self.state.last_status.clone();
        let services = ExecServices {
            emitter: self.emitter.clone(),
            observers: &self.observers,
            standing_status: standing.as_ref(),
        };

        let outcome = drive_flow(
            &flow,
            &mut self.state.root,
            &mut self.state.shared,
            &services,
        )
        .await?;

        let status = match outcome {
            FlowOutcome::Finished { outputs, exit } => {
                services.emit(Event::diagnostic(
                    "conversation",
                    format!(
                        "conversation {} finished via exit `{exit}`",
                        self.state.conversation_id
                    ),
                ));
                ExecutionStatus::Finished { outputs }
            }
            FlowOutcome::Suspended(status) => status,
        };
        self.state.last_status = Some(status.clone());
        Ok(status)
    }

    /// Drive the conversation from a dedicated current-thread runtime,
    /// for callers without an async context.
    pub fn execute_blocking(&mut self) -> Result<ExecutionStatus, ExecutionError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| ExecutionError::internal(format!("failed to build runtime: {e}")))?;
        runtime.block_on(self.execute())
    }

    /// Append a user message, satisfying a pending `AwaitingUserMessage`.
    pub fn append_user_message(&mut self, text: &str) -> Result<(), ProtocolError> {
        if matches!(
            self.state.last_status,
            Some(ExecutionStatus::Finished { .. })
        ) {
            return Err(ProtocolError::ConversationFinished);
        }
        self.state.shared.transcript.push(Message::user(text));
        self.state.shared.pending_user_message = Some(text.to_string());
        Ok(())
    }

    /// Submit one tool result, matched by request id against the pending
    /// `AwaitingToolResult` status.
    pub fn append_tool_result(&mut self, result: ToolResult) -> Result<(), ProtocolError> {
        let Some(ExecutionStatus::AwaitingToolResult { requests }) = &self.state.last_status
        else {
            return Err(ProtocolError::NotAwaitingToolResults);
        };
        if !requests.iter().any(|r| r.id == result.request_id) {
            return Err(ProtocolError::UnknownToolRequest {
                id: result.request_id,
            });
        }
        if self.state.shared.tool_results.contains_key(&result.request_id) {
            return Err(ProtocolError::DuplicateToolResult {
                id: result.request_id,
            });
        }
        self.state
            .shared
            .tool_results
            .insert(result.request_id.clone(), result);
        Ok(())
    }

    /// Submit several tool results at once (parallel tool calling).
    pub fn submit_tool_results(&mut self, results: Vec<ToolResult>) -> Result<(), ProtocolError> {
        for result in results {
            self.append_tool_result(result)?;
        }
        Ok(())
    }

    /// Approve a pending tool execution, optionally replacing its
    /// arguments.
    pub fn confirm_tool_execution(
        &mut self,
        request_id: &str,
        modified_args: Option<FxHashMap<String, Value>>,
    ) -> Result<(), ProtocolError> {
        self.record_decision(request_id, ToolDecision::Approved { modified_args })
    }

    /// Reject a pending tool execution. The owning step synthesizes a
    /// rejection-message result or raises, per its configuration.
    pub fn reject_tool_execution(
        &mut self,
        request_id: &str,
        reason: Option<String>,
    ) -> Result<(), ProtocolError> {
        self.record_decision(request_id, ToolDecision::Rejected { reason })
    }

    fn record_decision(
        &mut self,
        request_id: &str,
        decision: ToolDecision,
    ) -> Result<(), ProtocolError> {
        let Some(ExecutionStatus::AwaitingToolConfirmation { requests }) =
            &self.state.last_status
        else {
            return Err(ProtocolError::NotAwaitingConfirmation);
        };
        if !requests.iter().any(|r| r.id == request_id) {
            return Err(ProtocolError::UnknownToolRequest {
                id: request_id.to_string(),
            });
        }
        if self.state.shared.tool_decisions.contains_key(request_id) {
            return Err(ProtocolError::ConfirmationAlreadyDecided {
                id: request_id.to_string(),
            });
        }
        self.state
            .shared
            .tool_decisions
            .insert(request_id.to_string(), decision);
        Ok(())
    }
}
