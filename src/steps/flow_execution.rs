//! Sub-flow nesting: run a whole flow as one step of another.

use std::sync::Arc;

use async_trait::async_trait;

use crate::flows::Flow;
use crate::properties::Property;
use crate::runtimes::executor::{FlowOutcome, drive_flow};
use crate::runtimes::state::{FlowFrame, InFlight};

use super::{BRANCH_NEXT, Step, StepContext, StepError, StepInputs, StepResult};

/// Runs a wrapped [`Flow`] to completion as a single step.
///
/// Inputs are the inner flow's open inputs; outputs are the inner flow's
/// finished output values. For a multi-exit inner flow the selected branch
/// is the exit name the inner flow finished through, letting the outer
/// graph branch on *how* the sub-flow ended.
///
/// When the inner flow suspends, its partially-run frame is parked in this
/// step's context slot; the nesting serializes with the conversation and
/// resumes transparently, arbitrarily deep.
pub struct FlowExecutionStep {
    flow: Arc<Flow>,
    inputs: Vec<Property>,
    outputs: Vec<Property>,
    branches: Vec<String>,
    might_yield: bool,
}

impl FlowExecutionStep {
    pub fn new(flow: Arc<Flow>) -> Self {
        let inputs = flow.input_descriptors().to_vec();
        let outputs = flow.output_descriptors().to_vec();
        let branches = subflow_branches(&flow);
        let might_yield = flow.might_yield();
        Self {
            flow,
            inputs,
            outputs,
            branches,
            might_yield,
        }
    }

    #[must_use]
    pub fn flow(&self) -> &Arc<Flow> {
        &self.flow
    }
}

/// Branch set a sub-flow wrapper exposes: the inner exits when there are
/// several ways to finish, the default branch otherwise.
pub(crate) fn subflow_branches(flow: &Flow) -> Vec<String> {
    if flow.exits().len() > 1 {
        flow.exits().to_vec()
    } else {
        vec![BRANCH_NEXT.to_string()]
    }
}

#[async_trait]
impl Step for FlowExecutionStep {
    fn input_descriptors(&self) -> &[Property] {
        &self.inputs
    }

    fn output_descriptors(&self) -> &[Property] {
        &self.outputs
    }

    fn branches(&self) -> Vec<String> {
        self.branches.clone()
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
                    "sub-flow step found a tool-call context in its slot",
                ));
            }
            None => FlowFrame::for_flow(&self.flow, inputs.into_values()),
        };

        match drive_flow(&self.flow, &mut frame, ctx.shared, ctx.services).await {
            Ok(FlowOutcome::Finished { outputs, exit }) => {
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
                // Keep the partial frame: the cursor is on the failing
                // inner step and a retry re-invokes exactly that step.
                *ctx.inflight = Some(InFlight::Subflow {
                    frame: Box::new(frame),
                });
                Err(StepError::Subflow(Box::new(error)))
            }
        }
    }
}
