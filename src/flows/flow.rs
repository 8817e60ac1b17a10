//! The compiled, immutable flow graph.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::properties::Property;
use crate::runtimes::state::scoped_output_key;
use crate::steps::Step;
use crate::utils::collections::new_value_map;

use super::edges::{DataFlowEdge, Target};

/// A compiled, validated, immutable step graph.
///
/// Flows are built once through [`FlowBuilder`](super::FlowBuilder) —
/// which raises every structural error at construction, never at run
/// time — and then shared behind an `Arc` by any number of concurrent
/// conversations. All per-run state lives on the conversation, so no lock
/// protects the graph itself.
pub struct Flow {
    pub(crate) name: String,
    pub(crate) begin: String,
    pub(crate) steps: FxHashMap<String, Arc<dyn Step>>,
    pub(crate) control: FxHashMap<(String, String), Target>,
    pub(crate) data_by_dest: FxHashMap<String, Vec<DataFlowEdge>>,
    pub(crate) bindings: FxHashMap<(String, String), Value>,
    pub(crate) variables: Vec<Property>,
    pub(crate) inputs: Vec<Property>,
    pub(crate) outputs: Vec<Property>,
    pub(crate) output_sources: FxHashMap<String, (String, String)>,
    pub(crate) exits: Vec<String>,
    pub(crate) looping: bool,
    pub(crate) might_yield: bool,
}

impl Flow {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id of the step execution starts at.
    #[must_use]
    pub fn begin(&self) -> &str {
        &self.begin
    }

    /// Look up a step by its stable id.
    #[must_use]
    pub fn step(&self, id: &str) -> Option<&Arc<dyn Step>> {
        self.steps.get(id)
    }

    /// Number of steps in the graph.
    #[must_use]
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Target wired for `(step, branch)`. Validation guarantees a hit for
    /// every branch a registered step can produce.
    #[must_use]
    pub fn control_target(&self, step: &str, branch: &str) -> Option<&Target> {
        self.control
            .get(&(step.to_string(), branch.to_string()))
    }

    /// Data edges feeding `step`, at most one per input.
    #[must_use]
    pub fn data_edges_into(&self, step: &str) -> &[DataFlowEdge] {
        self.data_by_dest
            .get(step)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Context value bound to `(step, input)` at construction.
    #[must_use]
    pub fn binding(&self, step: &str, input: &str) -> Option<&Value> {
        self.bindings.get(&(step.to_string(), input.to_string()))
    }

    /// Declared flow variables (seeded into each conversation's variable
    /// store with their defaults).
    #[must_use]
    pub fn variables(&self) -> &[Property] {
        &self.variables
    }

    /// Open inputs: step inputs left unwired and unbound, merged by name.
    #[must_use]
    pub fn input_descriptors(&self) -> &[Property] {
        &self.inputs
    }

    /// Declared flow outputs, exposed from step outputs.
    #[must_use]
    pub fn output_descriptors(&self) -> &[Property] {
        &self.outputs
    }

    /// Names of the terminal exits, in declaration order.
    #[must_use]
    pub fn exits(&self) -> &[String] {
        &self.exits
    }

    /// Whether reaching a terminal edge restarts at the begin step
    /// instead of finishing.
    #[must_use]
    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Whether any step in this flow may suspend a conversation.
    /// Propagates transitively through sub-flow wrappers.
    #[must_use]
    pub fn might_yield(&self) -> bool {
        self.might_yield
    }

    /// Gather the declared flow outputs from an IO store: recorded value,
    /// else declared default, else null.
    #[must_use]
    pub fn collect_outputs(&self, io: &FxHashMap<String, Value>) -> FxHashMap<String, Value> {
        let mut outputs = new_value_map();
        for prop in &self.outputs {
            let value = self
                .output_sources
                .get(&prop.name)
                .and_then(|(step, output)| io.get(&scoped_output_key(step, output)))
                .cloned()
                .or_else(|| prop.default.clone())
                .unwrap_or(Value::Null);
            outputs.insert(prop.name.clone(), value);
        }
        outputs
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("begin", &self.begin)
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .field("looping", &self.looping)
            .field("might_yield", &self.might_yield)
            .finish_non_exhaustive()
    }
}
