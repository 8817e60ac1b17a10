//! Exception-to-branch translation around a wrapped flow.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};

use crate::flows::{Flow, FlowBuildError};
use crate::properties::Property;
use crate::runtimes::executor::{ExecutionError, FlowOutcome, drive_flow};
use crate::runtimes::state::{FlowFrame, InFlight};

use super::flow_execution::subflow_branches;
use super::{BRANCH_NEXT, Step, StepContext, StepError, StepInputs, StepResult};

/// Branch taken by unmapped exceptions when catch-all is enabled.
pub const BRANCH_EXCEPTION: &str = "exception";

/// Output carrying the caught exception's class-like name.
pub const OUTPUT_EXCEPTION_NAME: &str = "exception_name";
/// Output carrying the caught exception's stringified payload.
pub const OUTPUT_EXCEPTION_MESSAGE: &str = "exception_message";

/// Runs a wrapped [`Flow`] and translates raised exceptions into normal
/// branches.
///
/// The step exposes the wrapped flow's branches plus one branch per
/// configured exception-name mapping, and — when catch-all is enabled —
/// the [`BRANCH_EXCEPTION`] branch for everything else. On a raised
/// exception the branch is resolved from the mapping, then the catch-all,
/// and re-raised if neither applies.
///
/// The exception path cannot compute the wrapped flow's outputs, so
/// construction requires every wrapped-flow output to carry a default
/// value; caught exceptions yield the exception name, its stringified
/// payload, and every declared output at its default. Partially-run
/// sub-flow state is released on catch.
pub struct CatchExceptionStep {
    flow: Arc<Flow>,
    handlers: FxHashMap<String, String>,
    catch_all: bool,
    inputs: Vec<Property>,
    outputs: Vec<Property>,
    might_yield: bool,
}

impl CatchExceptionStep {
    /// Wrap `flow`. Fails when any wrapped-flow output lacks a default.
    pub fn new(flow: Arc<Flow>) -> Result<Self, FlowBuildError> {
        for output in flow.output_descriptors() {
            if output.default.is_none() {
                return Err(FlowBuildError::MissingOutputDefault {
                    output: output.name.clone(),
                });
            }
        }
        let inputs = flow.input_descriptors().to_vec();
        let mut outputs = flow.output_descriptors().to_vec();
        outputs.push(Property::string(OUTPUT_EXCEPTION_NAME).with_default(json!("")));
        outputs.push(Property::string(OUTPUT_EXCEPTION_MESSAGE).with_default(json!("")));
        let might_yield = flow.might_yield();
        Ok(Self {
            flow,
            handlers: FxHashMap::default(),
            catch_all: false,
            inputs,
            outputs,
            might_yield,
        })
    }

    /// Route exceptions named `exception` to `branch`.
    #[must_use]
    pub fn with_handler(
        mut self,
        exception: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        self.handlers.insert(exception.into(), branch.into());
        self
    }

    /// Route every otherwise-unmapped exception to [`BRANCH_EXCEPTION`].
    #[must_use]
    pub fn with_catch_all(mut self) -> Self {
        self.catch_all = true;
        self
    }

    /// Exception path output values: name, message, and every wrapped
    /// output at its default.
    fn exception_outputs(&self, name: &str, message: &str) -> FxHashMap<String, Value> {
        let mut outputs = FxHashMap::default();
        for prop in self.flow.output_descriptors() {
            // Presence of the default was checked at construction.
            if let Some(default) = &prop.default {
                outputs.insert(prop.name.clone(), default.clone());
            }
        }
        outputs.insert(OUTPUT_EXCEPTION_NAME.to_string(), json!(name));
        outputs.insert(OUTPUT_EXCEPTION_MESSAGE.to_string(), json!(message));
        outputs
    }
}

#[async_trait]
impl Step for CatchExceptionStep {
    fn input_descriptors(&self) -> &[Property] {
        &self.inputs
    }

    fn output_descriptors(&self) -> &[Property] {
        &self.outputs
    }

    fn branches(&self) -> Vec<String> {
        let mut branches = subflow_branches(&self.flow);
        let mut handler_branches: Vec<String> = self.handlers.values().cloned().collect();
        handler_branches.sort();
        handler_branches.dedup();
        for branch in handler_branches {
            if !branches.contains(&branch) {
                branches.push(branch);
            }
        }
        if self.catch_all && !branches.iter().any(|b| b == BRANCH_EXCEPTION) {
            branches.push(BRANCH_EXCEPTION.to_string());
        }
        branches
    }

    fn might_yield(&self) -> bool {
        self.might_yield
    }

    async fn invoke(
        &self,
        inputs: StepInputs,
        ctx: StepContext<'_>,
    ) -> Result<StepResult, StepError> {
        let mut frame = match ctx.inflight.take() {
            Some(InFlight::Subflow { frame }) => *frame,
            Some(InFlight::ToolCall { .. }) => {
                return Err(StepError::raised(
                    "StateError",
                    "catch step found a tool-call context in its slot",
                ));
            }
            None => FlowFrame::for_flow(&self.flow, inputs.into_values()),
        };

        match drive_flow(&self.flow, &mut frame, ctx.shared, ctx.services).await {
            Ok(FlowOutcome::Finished { mut outputs, exit }) => {
                outputs.insert(OUTPUT_EXCEPTION_NAME.to_string(), json!(""));
                outputs.insert(OUTPUT_EXCEPTION_MESSAGE.to_string(), json!(""));
                let branch = if self.flow.exits().len() > 1 {
                    exit
                } else {
                    BRANCH_NEXT.to_string()
                };
                Ok(StepResult::Normal { outputs, branch })
            }
            Ok(FlowOutcome::Suspended(status)) => {
                *ctx.inflight = Some(InFlight::Subflow {
                    frame: Box::new(frame),
                });
                Ok(StepResult::Yielding(status))
            }
            Err(error) => {
                let ExecutionError::Step { ref source, .. } = error else {
                    // Protocol and internal errors are not exceptions;
                    // they always propagate.
                    return Err(StepError::Subflow(Box::new(error)));
                };
                let name = source.exception_name().to_string();
                let message = source.to_string();
                let branch = self
                    .handlers
                    .get(&name)
                    .cloned()
                    .or_else(|| self.catch_all.then(|| BRANCH_EXCEPTION.to_string()));

                match branch {
                    Some(branch) => {
                        // Release the partially-run sub-conversation;
                        // the slot stays empty.
                        tracing::debug!(step = %ctx.step_id, exception = %name, branch = %branch, "caught exception");
                        Ok(StepResult::Normal {
                            outputs: self.exception_outputs(&name, &message),
                            branch,
                        })
                    }
                    None => {
                        *ctx.inflight = Some(InFlight::Subflow {
                            frame: Box::new(frame),
                        });
                        Err(StepError::Subflow(Box::new(error)))
                    }
                }
            }
        }
    }
}
