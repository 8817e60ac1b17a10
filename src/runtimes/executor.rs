//! The flow executor: walks a compiled graph one step at a time.
//!
//! The executor drives exactly one logical execution path per
//! conversation. Each call resumes at the frame's cursor, invokes steps,
//! interprets their results, and either finishes the flow or suspends at a
//! step boundary with an [`ExecutionStatus`]. Sub-flow wrapper steps call
//! back into [`drive_flow`] with their own nested [`FlowFrame`], so the
//! in-memory call stack mirrors the serialized frame nesting.
//!
//! Suspension points exist only at step boundaries: async work *inside*
//! one invocation is intra-call concurrency the executor never observes.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;
use tracing::instrument;

use crate::event_bus::{Event, EventEmitter};
use crate::flows::{Flow, Target};
use crate::properties::cast_value;
use crate::runtimes::conversation::ProtocolError;
use crate::runtimes::observer::{ExecutionBoundary, ExecutionObserver};
use crate::runtimes::state::{FlowFrame, SharedState, scoped_output_key};
use crate::runtimes::status::ExecutionStatus;
use crate::steps::{BRANCH_NEXT, Step, StepContext, StepError, StepInputs, StepResult};
use crate::utils::collections::new_value_map;

/// Errors surfaced by `execute()`.
#[derive(Debug, Error, Diagnostic)]
pub enum ExecutionError {
    /// A step raised; the cursor is left on that step, so the
    /// conversation is safe to retry or inspect.
    #[error("step `{step}` failed: {source}")]
    #[diagnostic(code(weftflow::execute::step))]
    Step {
        step: String,
        #[source]
        source: StepError,
    },

    /// Caller misuse of the resumption protocol.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Protocol(#[from] ProtocolError),

    /// An invariant the flow validator should have enforced was violated.
    #[error("internal execution invariant violated: {message}")]
    #[diagnostic(code(weftflow::execute::internal))]
    Internal { message: String },
}

impl ExecutionError {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ExecutionError::Internal {
            message: message.into(),
        }
    }
}

/// Per-`execute()` services threaded through every nesting level.
pub struct ExecServices<'a> {
    pub emitter: EventEmitter,
    pub observers: &'a [Arc<dyn ExecutionObserver>],
    /// Status returned by the previous `execute()` call, re-surfaced when
    /// a step self-loops.
    pub standing_status: Option<&'a ExecutionStatus>,
}

impl ExecServices<'_> {
    /// Emit an event, tracing (not failing) on a closed bus.
    pub fn emit(&self, event: Event) {
        if let Err(err) = self.emitter.emit(event) {
            tracing::trace!(error = %err, "event emission skipped");
        }
    }

    /// Ask every observer about a boundary; the first synthesized status
    /// wins and forces early suspension.
    pub fn check_boundary(&self, boundary: &ExecutionBoundary<'_>) -> Option<ExecutionStatus> {
        self.observers.iter().find_map(|o| o.on_boundary(boundary))
    }
}

/// Outcome of driving a flow until it finishes or suspends.
pub(crate) enum FlowOutcome {
    /// The flow reached a terminal edge. `exit` names which terminal, so
    /// wrappers around multi-exit flows can branch on *how* it finished.
    Finished {
        outputs: rustc_hash::FxHashMap<String, serde_json::Value>,
        exit: String,
    },
    /// A step (or observer) suspended execution.
    Suspended(ExecutionStatus),
}

/// Drive `flow` from its frame's cursor until it finishes or suspends.
///
/// The cursor is written *before* each invocation, so an error leaves it
/// on the failing step and a retry re-invokes exactly that step. In-flight
/// step contexts are taken out of the frame around the invocation and
/// re-parked afterwards, including on the error path — that is what keeps
/// a minted tool request alive across retries.
#[instrument(skip_all, fields(flow = %flow.name()))]
pub(crate) async fn drive_flow(
    flow: &Flow,
    frame: &mut FlowFrame,
    shared: &mut SharedState,
    services: &ExecServices<'_>,
) -> Result<FlowOutcome, ExecutionError> {
    let mut current = match frame.cursor.clone() {
        Some(step_id) => step_id,
        None => flow.begin().to_string(),
    };

    loop {
        frame.cursor = Some(current.clone());

        if let Some(status) =
            services.check_boundary(&ExecutionBoundary::StepStarted { step_id: &current })
        {
            tracing::debug!(step = %current, status = status.label(), "observer forced suspension");
            return Ok(FlowOutcome::Suspended(status));
        }

        let step = flow
            .step(&current)
            .ok_or_else(|| ExecutionError::internal(format!("unknown step `{current}`")))?
            .clone();

        let inputs = resolve_inputs(flow, frame, &current, step.as_ref())?;
        let mut slot = frame.inflight.remove(&current);

        services.emit(Event::step_started(&current));
        tracing::debug!(step = %current, "invoking step");

        let invocation = {
            let ctx = StepContext {
                step_id: &current,
                shared: &mut *shared,
                inflight: &mut slot,
                variables: &mut frame.variables,
                services,
            };
            step.invoke(inputs, ctx).await
        };

        let result = match invocation {
            Ok(result) => result,
            Err(source) => {
                if let Some(parked) = slot {
                    frame.inflight.insert(current.clone(), parked);
                }
                return Err(ExecutionError::Step {
                    step: current,
                    source,
                });
            }
        };

        let (outputs, branch) = match result {
            StepResult::Yielding(status) => {
                if let Some(parked) = slot {
                    frame.inflight.insert(current.clone(), parked);
                }
                services.emit(Event::step_suspended(&current, status.label()));
                return Ok(FlowOutcome::Suspended(status));
            }
            StepResult::SelfLoop => {
                if let Some(parked) = slot {
                    frame.inflight.insert(current.clone(), parked);
                }
                let status = services.standing_status.cloned().ok_or_else(|| {
                    ExecutionError::internal(format!(
                        "step `{current}` self-looped with no standing status"
                    ))
                })?;
                return Ok(FlowOutcome::Suspended(status));
            }
            StepResult::Normal { outputs, branch } => (outputs, branch),
            StepResult::Passthrough => (Default::default(), BRANCH_NEXT.to_string()),
        };

        if let Some(parked) = slot {
            frame.inflight.insert(current.clone(), parked);
        }
        for (name, value) in outputs {
            frame.io.insert(scoped_output_key(&current, &name), value);
        }
        services.emit(Event::step_completed(&current, &branch));

        let target = flow.control_target(&current, &branch).ok_or_else(|| {
            ExecutionError::internal(format!("no edge wired for `{current}`/`{branch}`"))
        })?;

        match target {
            Target::Step(next) => {
                current = next.clone();
            }
            Target::End { exit } => {
                if flow.is_looping() {
                    frame.iterations += 1;
                    frame.cursor = None;
                    tracing::debug!(iterations = frame.iterations, "loop flow restarting");
                    if let Some(status) =
                        services.check_boundary(&ExecutionBoundary::IterationCompleted {
                            iterations: frame.iterations,
                        })
                    {
                        return Ok(FlowOutcome::Suspended(status));
                    }
                    current = flow.begin().to_string();
                } else {
                    let outputs = flow.collect_outputs(&frame.io);
                    frame.cursor = None;
                    tracing::debug!(exit = %exit, "flow finished");
                    return Ok(FlowOutcome::Finished {
                        outputs,
                        exit: exit.clone(),
                    });
                }
            }
        }
    }
}

/// Resolve a step's declared inputs, in priority order: wired data edge,
/// context binding, flow-level input, property default.
///
/// A wired edge whose source has not produced yet (first iteration of a
/// cycle) falls through to the later sources rather than erroring.
fn resolve_inputs(
    flow: &Flow,
    frame: &FlowFrame,
    step_id: &str,
    step: &dyn Step,
) -> Result<StepInputs, ExecutionError> {
    let mut values = new_value_map();
    let edges = flow.data_edges_into(step_id);

    for prop in step.input_descriptors() {
        let mut resolved: Option<serde_json::Value> = None;

        // Construction rejects two edges targeting one input, so the
        // first match is the only match.
        if let Some(edge) = edges.iter().find(|e| e.input == prop.name) {
            if let Some(value) = frame
                .io
                .get(&scoped_output_key(&edge.source, &edge.output))
            {
                resolved = Some(if edge.source_ty != edge.dest_ty {
                    cast_value(value, &edge.dest_ty)
                } else {
                    value.clone()
                });
            }
        }
        if resolved.is_none() {
            resolved = flow.binding(step_id, &prop.name).cloned();
        }
        if resolved.is_none() {
            resolved = frame.io.get(&prop.name).cloned();
        }
        if resolved.is_none() {
            resolved = prop.default.clone();
        }

        match resolved {
            Some(value) => {
                values.insert(prop.name.clone(), value);
            }
            None => {
                return Err(ExecutionError::Step {
                    step: step_id.to_string(),
                    source: StepError::MissingInput {
                        name: prop.name.clone(),
                    },
                });
            }
        }
    }

    Ok(StepInputs::new(values))
}
