//! Step execution contract for the weftflow workflow runtime.
//!
//! A [`Step`] is an immutable, reusable unit of work in a flow graph. It is
//! created once when a flow is built, never mutated afterwards, and shared
//! by every conversation that runs the flow — all per-run data lives on
//! the conversation's execution state, never on the step itself.
//!
//! # The invoke contract
//!
//! `invoke(inputs, ctx)` returns a [`StepResult`]:
//!
//! - [`StepResult::Normal`] records outputs and selects an outgoing branch.
//! - [`StepResult::Passthrough`] selects the default branch with no outputs.
//! - [`StepResult::Yielding`] halts the executor and surfaces an
//!   [`ExecutionStatus`] to the caller; the cursor stays on this step so
//!   the next `execute()` call re-invokes it.
//! - [`StepResult::SelfLoop`] halts re-surfacing the standing status,
//!   re-entering the same step on the next call without traversing an
//!   edge. Used while a multi-phase handshake is in flight.
//!
//! Unhandled errors propagate to the caller and leave the cursor
//! un-advanced, so a failed conversation is safe to retry or inspect.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::properties::Property;
use crate::runtimes::executor::{ExecServices, ExecutionError};
use crate::runtimes::state::{InFlight, SharedState};
use crate::runtimes::status::ExecutionStatus;
use crate::tools::ToolError;

mod branching;
mod catch_exception;
mod flow_execution;
mod message_steps;
mod parallel_flow;
mod tool_execution;
mod variable_steps;

pub use branching::BranchingStep;
pub use catch_exception::{
    BRANCH_EXCEPTION, CatchExceptionStep, OUTPUT_EXCEPTION_MESSAGE, OUTPUT_EXCEPTION_NAME,
};
pub use flow_execution::FlowExecutionStep;
pub use message_steps::{InputMessageStep, OutputMessageStep};
pub use parallel_flow::ParallelFlowExecutionStep;
pub use tool_execution::ToolExecutionStep;
pub use variable_steps::{VariableReadStep, VariableWriteStep, WriteMode};

/// Default outgoing branch every step exposes.
pub const BRANCH_NEXT: &str = "next";

// ============================================================================
// Core Trait
// ============================================================================

/// Core trait defining executable workflow steps.
///
/// # Design Principles
///
/// - **Immutable**: configuration is fixed at construction; `invoke` takes
///   `&self` and all mutation goes through the [`StepContext`].
/// - **Declared IO**: inputs and outputs are [`Property`] descriptors so
///   flow construction can validate wiring before anything runs.
/// - **Static suspension**: `might_yield` is computed at construction and
///   propagates transitively through steps that wrap sub-flows.
///
/// # Examples
///
/// ```rust
/// use weftflow::steps::{Step, StepContext, StepInputs, StepResult, StepError};
/// use weftflow::properties::Property;
/// use async_trait::async_trait;
/// use serde_json::json;
///
/// struct ShoutStep {
///     inputs: Vec<Property>,
///     outputs: Vec<Property>,
/// }
///
/// impl ShoutStep {
///     fn new() -> Self {
///         Self {
///             inputs: vec![Property::string("text")],
///             outputs: vec![Property::string("shouted")],
///         }
///     }
/// }
///
/// #[async_trait]
/// impl Step for ShoutStep {
///     fn input_descriptors(&self) -> &[Property] { &self.inputs }
///     fn output_descriptors(&self) -> &[Property] { &self.outputs }
///
///     async fn invoke(
///         &self,
///         inputs: StepInputs,
///         _ctx: StepContext<'_>,
///     ) -> Result<StepResult, StepError> {
///         let text = inputs.require_str("text")?.to_uppercase();
///         Ok(StepResult::next([("shouted", json!(text))]))
///     }
/// }
/// ```
#[async_trait]
pub trait Step: Send + Sync {
    fn input_descriptors(&self) -> &[Property];

    fn output_descriptors(&self) -> &[Property];

    /// Branches this step can select. Always includes the default
    /// [`BRANCH_NEXT`]; every listed branch must be wired exactly once at
    /// flow construction.
    fn branches(&self) -> Vec<String> {
        vec![BRANCH_NEXT.to_string()]
    }

    /// Whether an invocation may suspend the conversation. Computed
    /// statically; wrappers propagate it from their inner flows.
    fn might_yield(&self) -> bool {
        false
    }

    /// Execute this step with resolved inputs and the execution context.
    async fn invoke(
        &self,
        inputs: StepInputs,
        ctx: StepContext<'_>,
    ) -> Result<StepResult, StepError>;
}

// ============================================================================
// Inputs & Results
// ============================================================================

/// Resolved input values handed to a step invocation.
///
/// Values were resolved by the executor from wired data-flow edges,
/// context bindings, flow inputs, and property defaults — in that order —
/// with edge casts already applied.
#[derive(Clone, Debug, Default)]
pub struct StepInputs {
    values: FxHashMap<String, Value>,
}

impl StepInputs {
    #[must_use]
    pub fn new(values: FxHashMap<String, Value>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// The value for `name`, or a `MissingInput` error.
    pub fn require(&self, name: &str) -> Result<&Value, StepError> {
        self.values.get(name).ok_or_else(|| StepError::MissingInput {
            name: name.to_string(),
        })
    }

    /// The string value for `name`; non-strings raise a `TypeError`.
    pub fn require_str(&self, name: &str) -> Result<&str, StepError> {
        self.require(name)?.as_str().ok_or_else(|| {
            StepError::raised("TypeError", format!("input `{name}` is not a string"))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    #[must_use]
    pub fn into_values(self) -> FxHashMap<String, Value> {
        self.values
    }
}

/// Result of one step invocation.
#[derive(Debug)]
pub enum StepResult {
    /// Record `outputs` and traverse the control edge wired for `branch`.
    Normal {
        outputs: FxHashMap<String, Value>,
        branch: String,
    },
    /// No outputs; traverse the default branch.
    Passthrough,
    /// Halt the executor and surface `status`. The cursor stays on this
    /// step; the next `execute()` call re-invokes it.
    Yielding(ExecutionStatus),
    /// Halt re-surfacing the standing status without traversing an edge;
    /// the same step re-enters on the next `execute()` call.
    SelfLoop,
}

impl StepResult {
    /// `Normal` result on the default branch.
    pub fn next<I, K>(outputs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::branch(BRANCH_NEXT, outputs)
    }

    /// `Normal` result on a named branch.
    pub fn branch<I, K>(branch: impl Into<String>, outputs: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        StepResult::Normal {
            outputs: outputs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            branch: branch.into(),
        }
    }
}

// ============================================================================
// Execution Context
// ============================================================================

/// Execution context passed to steps during invocation.
///
/// Grants access to the conversation-wide shared state (transcript and
/// resume queues), this step's own in-flight slot, the enclosing flow's
/// variable store, and executor services (event emitter, observers).
pub struct StepContext<'a> {
    /// Stable id of the step being invoked.
    pub step_id: &'a str,
    /// Root-scoped conversation state: transcript plus resume queues.
    pub shared: &'a mut SharedState,
    /// This step's parked in-flight context, if any. Taken out of the
    /// frame for the duration of the invocation; whatever is left here is
    /// re-parked afterwards.
    pub inflight: &'a mut Option<InFlight>,
    /// Variable store of the enclosing flow.
    pub variables: &'a mut FxHashMap<String, Value>,
    /// Emitter, observers, and the standing status for this execute() call.
    pub services: &'a ExecServices<'a>,
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by step execution.
///
/// `exception_name` exposes a stable, exception-class-like name for each
/// error so [`CatchExceptionStep`] can translate whitelisted names into
/// branches.
#[derive(Debug, Error, Diagnostic)]
pub enum StepError {
    /// Expected input value could not be resolved.
    #[error("missing expected input: {name}")]
    #[diagnostic(
        code(weftflow::step::missing_input),
        help("Wire a data edge, bind a value, or give the property a default.")
    )]
    MissingInput { name: String },

    /// Domain exception with a stable class-like name, e.g. `ValueError`.
    #[error("{name}: {message}")]
    #[diagnostic(code(weftflow::step::raised))]
    Raised { name: String, message: String },

    /// Tool invocation failed and the step is configured to propagate.
    #[error(transparent)]
    #[diagnostic(code(weftflow::step::tool))]
    Tool(#[from] ToolError),

    /// The step produced an output shape that violates its declaration.
    #[error("invalid step output: {message}")]
    #[diagnostic(code(weftflow::step::invalid_output))]
    InvalidOutput { message: String },

    /// A wrapped sub-flow failed.
    #[error(transparent)]
    #[diagnostic(code(weftflow::step::subflow))]
    Subflow(Box<ExecutionError>),
}

impl StepError {
    /// Domain exception with a class-like name.
    pub fn raised(name: impl Into<String>, message: impl Into<String>) -> Self {
        StepError::Raised {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Stable exception-class-like name for branch mapping.
    #[must_use]
    pub fn exception_name(&self) -> &str {
        match self {
            StepError::MissingInput { .. } => "MissingInputError",
            StepError::Raised { name, .. } => name,
            StepError::Tool(err) => &err.name,
            StepError::InvalidOutput { .. } => "InvalidOutputError",
            StepError::Subflow(inner) => match inner.as_ref() {
                ExecutionError::Step { source, .. } => source.exception_name(),
                _ => "ExecutionError",
            },
        }
    }
}
