//! Structured concurrent fan-out over sub-flows.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::join_all;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::flows::{Flow, FlowBuildError};
use crate::properties::{Property, PropertyType};
use crate::runtimes::executor::{ExecutionError, FlowOutcome, drive_flow};
use crate::runtimes::state::{FlowFrame, SharedState};

use super::{Step, StepContext, StepError, StepInputs, StepResult};

/// Runs several sub-flows concurrently and merges their outputs.
///
/// Construction rejects, before anything ever runs:
/// - a sub-flow whose `might_yield` is true — there is no well-defined
///   way to multiplex N pending statuses;
/// - two sub-flows sharing an output name — the merge would be ambiguous;
/// - two sub-flows declaring the same input name with incompatible types.
///
/// At invoke time all sub-flows run concurrently (structured fan-out,
/// await-all); outputs are the union of their finished output values, and
/// transcript entries produced by the branches are appended in
/// declaration order so merges stay deterministic.
pub struct ParallelFlowExecutionStep {
    flows: Vec<Arc<Flow>>,
    inputs: Vec<Property>,
    outputs: Vec<Property>,
}

impl ParallelFlowExecutionStep {
    pub fn new(flows: Vec<Arc<Flow>>) -> Result<Self, FlowBuildError> {
        let mut outputs: Vec<Property> = Vec::new();
        let mut inputs: Vec<Property> = Vec::new();

        for flow in &flows {
            if flow.might_yield() {
                return Err(FlowBuildError::YieldingParallelBranch {
                    flow: flow.name().to_string(),
                });
            }
            for output in flow.output_descriptors() {
                if outputs.iter().any(|p| p.name == output.name) {
                    return Err(FlowBuildError::ParallelOutputCollision {
                        output: output.name.clone(),
                    });
                }
                outputs.push(output.clone());
            }
            for input in flow.input_descriptors() {
                match inputs.iter_mut().find(|p| p.name == input.name) {
                    None => inputs.push(input.clone()),
                    Some(existing) => {
                        if existing.ty == input.ty || input.ty == PropertyType::Any {
                            // Compatible; keep the existing descriptor.
                        } else if existing.ty == PropertyType::Any
                            || input.ty.is_castable_to(&existing.ty)
                        {
                            existing.ty = input.ty.clone();
                        } else if !existing.ty.is_castable_to(&input.ty) {
                            return Err(FlowBuildError::ParallelInputConflict {
                                input: input.name.clone(),
                            });
                        }
                    }
                }
            }
        }

        Ok(Self {
            flows,
            inputs,
            outputs,
        })
    }
}

#[async_trait]
impl Step for ParallelFlowExecutionStep {
    fn input_descriptors(&self) -> &[Property] {
        &self.inputs
    }

    fn output_descriptors(&self) -> &[Property] {
        &self.outputs
    }

    async fn invoke(
        &self,
        inputs: StepInputs,
        ctx: StepContext<'_>,
    ) -> Result<StepResult, StepError> {
        let services = ctx.services;
        let mut jobs = Vec::with_capacity(self.flows.len());

        for flow in &self.flows {
            let subset: FxHashMap<String, Value> = flow
                .input_descriptors()
                .iter()
                .filter_map(|p| inputs.get(&p.name).map(|v| (p.name.clone(), v.clone())))
                .collect();
            let flow = Arc::clone(flow);
            jobs.push(async move {
                let mut frame = FlowFrame::for_flow(&flow, subset);
                let mut scratch = SharedState::default();
                let outcome = drive_flow(&flow, &mut frame, &mut scratch, services).await;
                (outcome, scratch)
            });
        }

        let mut merged: FxHashMap<String, Value> = FxHashMap::default();
        for (outcome, scratch) in join_all(jobs).await {
            match outcome.map_err(|e| StepError::Subflow(Box::new(e)))? {
                FlowOutcome::Finished { outputs, .. } => {
                    merged.extend(outputs);
                }
                FlowOutcome::Suspended(status) => {
                    // Construction forbids yielding branches; reaching
                    // this means a tool lied about client_executed.
                    return Err(StepError::Subflow(Box::new(ExecutionError::internal(
                        format!("parallel sub-flow suspended with {}", status.label()),
                    ))));
                }
            }
            ctx.shared.transcript.extend(scratch.transcript);
        }

        Ok(StepResult::next(merged))
    }
}
