//! Tool invocation with an idempotent request/result/confirmation handshake.
//!
//! Per logical call, keyed by this step's id within the conversation:
//!
//! 1. Look up an in-flight [`ToolRequest`] in the step's context slot; if
//!    absent, mint one from the current inputs. The id is minted exactly
//!    once and survives every suspend/resume/serialize cycle.
//! 2. If the tool requires confirmation and no decision is recorded,
//!    suspend with `AwaitingToolConfirmation`. A rejection synthesizes a
//!    fixed rejection-message result (or raises when configured to, or
//!    when no string-typed output can carry the message); a confirmation
//!    may carry caller-modified arguments.
//! 3. Server tools execute inline. Client tools publish the request on
//!    the transcript and suspend with `AwaitingToolResult`, self-looping
//!    until a correlated result arrives.
//! 4. On completion the in-flight slot and decision are cleared, so a
//!    later pass through the same step (e.g. inside a loop) mints a fresh
//!    request.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};

use crate::event_bus::{Event, ToolPhase};
use crate::message::Message;
use crate::properties::{Property, PropertyType};
use crate::runtimes::observer::ExecutionBoundary;
use crate::runtimes::state::{InFlight, ToolDecision};
use crate::runtimes::status::ExecutionStatus;
use crate::tools::{Tool, ToolError, ToolRequest, ToolResultContent};
use crate::utils::ids::IdGenerator;

use super::{BRANCH_NEXT, Step, StepContext, StepError, StepInputs, StepResult};

/// Executes one [`Tool`] per pass, with at-most-one invocation per logical
/// call guaranteed across arbitrary suspend/resume/serialize cycles.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use weftflow::steps::ToolExecutionStep;
/// use weftflow::tools::FnTool;
/// use weftflow::properties::Property;
/// use serde_json::json;
///
/// let lookup = Arc::new(
///     FnTool::builder("lookup")
///         .input(Property::string("key"))
///         .output(Property::string("value"))
///         .handler(|req| Ok(json!(format!("value-for-{}", req.args["key"].as_str().unwrap()))))
///         .build(),
/// );
/// let step = ToolExecutionStep::new(lookup).with_raise_exceptions(true);
/// ```
pub struct ToolExecutionStep {
    tool: Arc<dyn Tool>,
    raise_exceptions: bool,
    inputs: Vec<Property>,
    outputs: Vec<Property>,
    input_renames: FxHashMap<String, String>,
    output_renames: FxHashMap<String, String>,
    might_yield: bool,
}

impl ToolExecutionStep {
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        let might_yield = tool.requires_confirmation() || tool.client_executed();
        let inputs = tool.input_descriptors().to_vec();
        let outputs = tool.output_descriptors().to_vec();
        Self {
            tool,
            raise_exceptions: false,
            inputs,
            outputs,
            input_renames: FxHashMap::default(),
            output_renames: FxHashMap::default(),
            might_yield,
        }
    }

    /// Choose between propagating tool failures and coercing them into a
    /// string output (the default).
    #[must_use]
    pub fn with_raise_exceptions(mut self, raise: bool) -> Self {
        self.raise_exceptions = raise;
        self
    }

    /// Expose the tool input `tool_name` under `step_name` on this step.
    #[must_use]
    pub fn with_input_renamed(
        mut self,
        tool_name: impl Into<String>,
        step_name: impl Into<String>,
    ) -> Self {
        self.input_renames.insert(tool_name.into(), step_name.into());
        self.inputs = Self::renamed(self.tool.input_descriptors(), &self.input_renames);
        self
    }

    /// Expose the tool output `tool_name` under `step_name` on this step.
    #[must_use]
    pub fn with_output_renamed(
        mut self,
        tool_name: impl Into<String>,
        step_name: impl Into<String>,
    ) -> Self {
        self.output_renames
            .insert(tool_name.into(), step_name.into());
        self.outputs = Self::renamed(self.tool.output_descriptors(), &self.output_renames);
        self
    }

    fn renamed(descriptors: &[Property], renames: &FxHashMap<String, String>) -> Vec<Property> {
        descriptors
            .iter()
            .map(|p| {
                let mut p = p.clone();
                if let Some(external) = renames.get(&p.name) {
                    p.name = external.clone();
                }
                p
            })
            .collect()
    }

    fn external_input_name<'a>(&'a self, tool_name: &'a str) -> &'a str {
        self.input_renames
            .get(tool_name)
            .map(String::as_str)
            .unwrap_or(tool_name)
    }

    fn external_output_name<'a>(&'a self, tool_name: &'a str) -> &'a str {
        self.output_renames
            .get(tool_name)
            .map(String::as_str)
            .unwrap_or(tool_name)
    }

    /// The single output able to carry a coerced string, if any.
    fn string_output_slot(&self) -> Option<&str> {
        match self.tool.output_descriptors() {
            [only] if PropertyType::String.is_castable_to(&only.ty) => {
                Some(self.external_output_name(&only.name))
            }
            _ => None,
        }
    }

    /// Map a raw tool return value onto the declared outputs. Single
    /// output: direct mapping. Multiple outputs: the value must be an
    /// object covering every declared output name.
    fn map_outputs(&self, value: Value) -> Result<FxHashMap<String, Value>, StepError> {
        let descriptors = self.tool.output_descriptors();
        let mut outputs = FxHashMap::default();
        match descriptors {
            [] => {}
            [only] => {
                outputs.insert(self.external_output_name(&only.name).to_string(), value);
            }
            many => {
                let Value::Object(mut map) = value else {
                    return Err(StepError::InvalidOutput {
                        message: format!(
                            "tool `{}` declares {} outputs but returned a non-object value",
                            self.tool.name(),
                            many.len()
                        ),
                    });
                };
                for prop in many {
                    let value = map.remove(&prop.name).ok_or_else(|| StepError::InvalidOutput {
                        message: format!(
                            "tool `{}` returned no value for declared output `{}`",
                            self.tool.name(),
                            prop.name
                        ),
                    })?;
                    outputs.insert(self.external_output_name(&prop.name).to_string(), value);
                }
            }
        }
        Ok(outputs)
    }

    /// Clear the in-flight slot and decision: the logical call is over,
    /// and a later pass mints a fresh request.
    fn clear_call(&self, ctx: &mut StepContext<'_>, request_id: &str) {
        *ctx.inflight = None;
        ctx.shared.tool_decisions.remove(request_id);
    }

    fn complete(
        &self,
        ctx: &mut StepContext<'_>,
        request: &ToolRequest,
        value: Value,
    ) -> Result<StepResult, StepError> {
        let outputs = self.map_outputs(value)?;
        self.clear_call(ctx, &request.id);
        ctx.services.emit(Event::tool(
            ctx.step_id,
            &request.id,
            self.tool.name(),
            ToolPhase::Completed,
        ));
        Ok(StepResult::Normal {
            outputs,
            branch: BRANCH_NEXT.to_string(),
        })
    }

    /// A failed call either propagates or is coerced to string content,
    /// per the `raise_exceptions` flag.
    fn complete_failure(
        &self,
        ctx: &mut StepContext<'_>,
        request: &ToolRequest,
        error: String,
        message: String,
    ) -> Result<StepResult, StepError> {
        self.clear_call(ctx, &request.id);
        if !self.raise_exceptions {
            if let Some(slot) = self.string_output_slot() {
                ctx.services.emit(Event::tool(
                    ctx.step_id,
                    &request.id,
                    self.tool.name(),
                    ToolPhase::Completed,
                ));
                let text = format!("{error}: {message}");
                return Ok(StepResult::Normal {
                    outputs: [(slot.to_string(), json!(text))].into_iter().collect(),
                    branch: BRANCH_NEXT.to_string(),
                });
            }
        }
        Err(StepError::Tool(ToolError::new(error, message)))
    }

    fn rejection(
        &self,
        ctx: &mut StepContext<'_>,
        request: &ToolRequest,
        reason: Option<String>,
    ) -> Result<StepResult, StepError> {
        self.clear_call(ctx, &request.id);
        ctx.services.emit(Event::tool(
            ctx.step_id,
            &request.id,
            self.tool.name(),
            ToolPhase::Rejected,
        ));
        let mut text = String::from("Tool execution was rejected by the caller.");
        if let Some(reason) = reason {
            text.push(' ');
            text.push_str(&reason);
        }
        if !self.raise_exceptions {
            if let Some(slot) = self.string_output_slot() {
                return Ok(StepResult::Normal {
                    outputs: [(slot.to_string(), json!(text))].into_iter().collect(),
                    branch: BRANCH_NEXT.to_string(),
                });
            }
        }
        Err(StepError::raised("ToolExecutionRejected", text))
    }

    /// Whether the request was already published on the transcript.
    fn already_published(&self, ctx: &StepContext<'_>, request_id: &str) -> bool {
        ctx.shared.transcript.iter().any(|m| {
            m.tool_requests
                .as_ref()
                .is_some_and(|requests| requests.iter().any(|r| r.id == request_id))
        })
    }
}

#[async_trait]
impl Step for ToolExecutionStep {
    fn input_descriptors(&self) -> &[Property] {
        &self.inputs
    }

    fn output_descriptors(&self) -> &[Property] {
        &self.outputs
    }

    fn might_yield(&self) -> bool {
        self.might_yield
    }

    async fn invoke(
        &self,
        inputs: StepInputs,
        mut ctx: StepContext<'_>,
    ) -> Result<StepResult, StepError> {
        // Phase 1: locate or mint the request for this logical call.
        let (mut request, fresh) = match ctx.inflight.clone() {
            Some(InFlight::ToolCall { request }) => (request, false),
            Some(InFlight::Subflow { .. }) => {
                return Err(StepError::raised(
                    "StateError",
                    "tool step found a sub-flow context in its slot",
                ));
            }
            None => {
                let mut args = FxHashMap::default();
                for prop in self.tool.input_descriptors() {
                    let external = self.external_input_name(&prop.name);
                    if let Some(value) = inputs.get(external) {
                        args.insert(prop.name.clone(), value.clone());
                    }
                }
                let request = ToolRequest::new(
                    IdGenerator::new().tool_request_id(),
                    self.tool.name(),
                    args,
                );
                *ctx.inflight = Some(InFlight::ToolCall {
                    request: request.clone(),
                });
                (request, true)
            }
        };

        if fresh {
            tracing::debug!(step = %ctx.step_id, request = %request.id, tool = %self.tool.name(), "minted tool request");
            ctx.services.emit(Event::tool(
                ctx.step_id,
                &request.id,
                self.tool.name(),
                ToolPhase::Requested,
            ));
            if let Some(status) = ctx.services.check_boundary(&ExecutionBoundary::ToolRequested {
                step_id: ctx.step_id,
                request: &request,
            }) {
                return Ok(StepResult::Yielding(status));
            }
        }

        // Phase 2: confirmation gate, checked strictly before any
        // invocation attempt. A confirmation-gated tool never runs
        // without a recorded approval, even across retries.
        if self.tool.requires_confirmation() {
            match ctx.shared.tool_decisions.get(&request.id).cloned() {
                None => {
                    return Ok(StepResult::Yielding(
                        ExecutionStatus::AwaitingToolConfirmation {
                            requests: vec![request],
                        },
                    ));
                }
                Some(ToolDecision::Rejected { reason }) => {
                    return self.rejection(&mut ctx, &request, reason);
                }
                Some(ToolDecision::Approved { modified_args }) => {
                    let resumed_from_gate = matches!(
                        ctx.services.standing_status,
                        Some(ExecutionStatus::AwaitingToolConfirmation { requests })
                            if requests.iter().any(|r| r.id == request.id)
                    );
                    if resumed_from_gate {
                        ctx.services.emit(Event::tool(
                            ctx.step_id,
                            &request.id,
                            self.tool.name(),
                            ToolPhase::Confirmed,
                        ));
                    }
                    if let Some(args) = modified_args {
                        request.args = args;
                        *ctx.inflight = Some(InFlight::ToolCall {
                            request: request.clone(),
                        });
                    }
                }
            }
        }

        // Phase 3: execution. Server tools run inline; client tools hand
        // the request to the caller and wait for a correlated result.
        match self.tool.run(&request).await {
            Some(Ok(value)) => self.complete(&mut ctx, &request, value),
            Some(Err(err)) => self.complete_failure(&mut ctx, &request, err.name, err.message),
            None => {
                if let Some(result) = ctx.shared.tool_results.remove(&request.id) {
                    ctx.shared
                        .transcript
                        .push(Message::tool_result(result.clone()));
                    match result.content {
                        ToolResultContent::Value { value } => {
                            self.complete(&mut ctx, &request, value)
                        }
                        ToolResultContent::Failure { error, message } => {
                            self.complete_failure(&mut ctx, &request, error, message)
                        }
                    }
                } else if self.already_published(&ctx, &request.id) {
                    // Still waiting on the caller; no new status to raise.
                    Ok(StepResult::SelfLoop)
                } else {
                    ctx.shared
                        .transcript
                        .push(Message::tool_requests(vec![request.clone()]));
                    Ok(StepResult::Yielding(ExecutionStatus::AwaitingToolResult {
                        requests: vec![request],
                    }))
                }
            }
        }
    }
}
