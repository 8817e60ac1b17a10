//! FlowBuilder: fluent construction with build-time validation.
//!
//! Every structural error — dangling branches, unknown steps, duplicate
//! wiring, incompatible data-edge types, colliding bindings — is raised by
//! [`FlowBuilder::build`], never at run time. A flow that builds cannot
//! fail on graph structure while executing.

use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use thiserror::Error;

use crate::properties::{Property, PropertyType};
use crate::steps::Step;

use super::edges::{ContextBinding, ControlFlowEdge, DataFlowEdge, Target};
use super::flow::Flow;

/// Exit name used by the plain [`end`](FlowBuilder::end) helper.
pub const DEFAULT_EXIT: &str = "done";

/// Construction-time errors. Always fatal at build, never recoverable at
/// run time.
#[derive(Debug, Error, Diagnostic)]
pub enum FlowBuildError {
    #[error("flow `{flow}` has no begin step")]
    #[diagnostic(
        code(weftflow::flow::missing_begin),
        help("Call FlowBuilder::begin with the id of the entry step.")
    )]
    MissingBeginStep { flow: String },

    #[error("unknown step `{step}` referenced by {referenced_by}")]
    #[diagnostic(code(weftflow::flow::unknown_step))]
    UnknownStep {
        step: String,
        referenced_by: String,
    },

    #[error("invalid step id `{step}`: ids must be non-empty and must not contain `.`")]
    #[diagnostic(
        code(weftflow::flow::invalid_step_id),
        help("Dots are reserved for scoped IO-store keys.")
    )]
    InvalidStepId { step: String },

    #[error("step id `{step}` registered twice")]
    #[diagnostic(code(weftflow::flow::duplicate_step))]
    DuplicateStepId { step: String },

    #[error("branch `{branch}` of step `{step}` is not wired to any edge")]
    #[diagnostic(
        code(weftflow::flow::dangling_branch),
        help("Every branch a step can produce must be wired exactly once.")
    )]
    DanglingBranch { step: String, branch: String },

    #[error("step `{step}` declares no branch named `{branch}`")]
    #[diagnostic(code(weftflow::flow::unknown_branch))]
    UnknownBranch { step: String, branch: String },

    #[error("branch `{branch}` of step `{step}` is wired more than once")]
    #[diagnostic(code(weftflow::flow::duplicate_branch_edge))]
    DuplicateBranchEdge { step: String, branch: String },

    #[error("step `{step}` declares no output named `{output}`")]
    #[diagnostic(code(weftflow::flow::unknown_output))]
    UnknownOutput { step: String, output: String },

    #[error("step `{step}` declares no input named `{input}`")]
    #[diagnostic(code(weftflow::flow::unknown_input))]
    UnknownInput { step: String, input: String },

    #[error(
        "data edge `{source}.{output}` -> `{dest}.{input}` is not castable: {source_ty} does not fit {dest_ty}"
    )]
    #[diagnostic(
        code(weftflow::flow::data_edge_type),
        help("Castability is directed; e.g. boolean fits string but string does not fit boolean.")
    )]
    DataEdgeTypeMismatch {
        source: String,
        output: String,
        dest: String,
        input: String,
        source_ty: PropertyType,
        dest_ty: PropertyType,
    },

    #[error("input `{input}` of step `{step}` is fed by more than one data edge")]
    #[diagnostic(
        code(weftflow::flow::data_edge_collision),
        help("Input collisions are rejected at construction, never resolved dynamically.")
    )]
    DataEdgeCollision { step: String, input: String },

    #[error("input `{input}` of step `{step}` already has a bound or wired source")]
    #[diagnostic(code(weftflow::flow::binding_collision))]
    BindingCollision { step: String, input: String },

    #[error("bound value for `{step}.{input}` does not inhabit type {expected}")]
    #[diagnostic(code(weftflow::flow::binding_type))]
    BindingTypeMismatch {
        step: String,
        input: String,
        expected: PropertyType,
    },

    #[error("open input `{input}` is declared with incompatible types by multiple steps")]
    #[diagnostic(code(weftflow::flow::input_type_conflict))]
    FlowInputTypeConflict { input: String },

    #[error("flow output `{output}` exposed twice")]
    #[diagnostic(code(weftflow::flow::duplicate_output))]
    DuplicateFlowOutput { output: String },

    #[error("output `{step}.{output}` ({found}) is not castable to flow output type {expected}")]
    #[diagnostic(code(weftflow::flow::output_type))]
    OutputTypeMismatch {
        step: String,
        output: String,
        found: PropertyType,
        expected: PropertyType,
    },

    #[error("wrapped flow output `{output}` carries no default value")]
    #[diagnostic(
        code(weftflow::flow::missing_output_default),
        help("Exception branches cannot compute outputs; every wrapped-flow output needs a default.")
    )]
    MissingOutputDefault { output: String },

    #[error("parallel sub-flow `{flow}` contains a step that might yield")]
    #[diagnostic(
        code(weftflow::flow::yielding_parallel_branch),
        help("There is no well-defined way to multiplex pending statuses across parallel branches.")
    )]
    YieldingParallelBranch { flow: String },

    #[error("parallel sub-flows both declare output `{output}`")]
    #[diagnostic(code(weftflow::flow::parallel_output_collision))]
    ParallelOutputCollision { output: String },

    #[error("parallel sub-flows declare input `{input}` with incompatible types")]
    #[diagnostic(code(weftflow::flow::parallel_input_conflict))]
    ParallelInputConflict { input: String },
}

/// Builder for [`Flow`] with a fluent API.
///
/// # Examples
///
/// ```rust
/// use weftflow::flows::FlowBuilder;
/// use weftflow::steps::{BranchingStep, OutputMessageStep};
///
/// let flow = FlowBuilder::new("triage")
///     .add_step("route", BranchingStep::new(
///         [("[OK]", "ok")],
///     ))
///     .add_step("report", OutputMessageStep::new())
///     .begin("route")
///     .edge_on("route", "ok", "report")
///     .end("route")      // unmapped values take the default branch
///     .end("report")
///     .bind_input("report", "message", "all good".into())
///     .build()
///     .expect("valid flow");
///
/// assert_eq!(flow.step_count(), 2);
/// ```
pub struct FlowBuilder {
    name: String,
    begin: Option<String>,
    steps: Vec<(String, Arc<dyn Step>)>,
    control_edges: Vec<ControlFlowEdge>,
    data_edges: Vec<(String, String, String, String)>,
    bindings: Vec<ContextBinding>,
    variables: Vec<Property>,
    exposed: Vec<(Property, String, String)>,
    looping: bool,
}

impl FlowBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            begin: None,
            steps: Vec::new(),
            control_edges: Vec::new(),
            data_edges: Vec::new(),
            bindings: Vec::new(),
            variables: Vec::new(),
            exposed: Vec::new(),
            looping: false,
        }
    }

    /// Register a step under a stable id.
    #[must_use]
    pub fn add_step(mut self, id: impl Into<String>, step: impl Step + 'static) -> Self {
        self.steps.push((id.into(), Arc::new(step)));
        self
    }

    /// Register an already-shared step instance.
    #[must_use]
    pub fn add_shared_step(mut self, id: impl Into<String>, step: Arc<dyn Step>) -> Self {
        self.steps.push((id.into(), step));
        self
    }

    /// Choose the entry step.
    #[must_use]
    pub fn begin(mut self, id: impl Into<String>) -> Self {
        self.begin = Some(id.into());
        self
    }

    /// Wire the default branch of `from` to `to`.
    #[must_use]
    pub fn edge(self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edge_on(from, crate::steps::BRANCH_NEXT, to)
    }

    /// Wire a named branch of `from` to `to`.
    #[must_use]
    pub fn edge_on(
        mut self,
        from: impl Into<String>,
        branch: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.control_edges.push(ControlFlowEdge::to(from, branch, to));
        self
    }

    /// Wire the default branch of `from` to the default terminal exit.
    #[must_use]
    pub fn end(self, from: impl Into<String>) -> Self {
        self.end_on(from, crate::steps::BRANCH_NEXT, DEFAULT_EXIT)
    }

    /// Wire a named branch of `from` to a named terminal exit.
    #[must_use]
    pub fn end_on(
        mut self,
        from: impl Into<String>,
        branch: impl Into<String>,
        exit: impl Into<String>,
    ) -> Self {
        self.control_edges
            .push(ControlFlowEdge::terminal(from, branch, exit));
        self
    }

    /// Feed `source`'s `output` into `dest`'s `input`.
    #[must_use]
    pub fn data_edge(
        mut self,
        source: impl Into<String>,
        output: impl Into<String>,
        dest: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        self.data_edges
            .push((source.into(), output.into(), dest.into(), input.into()));
        self
    }

    /// Bind a constant value to one step input.
    #[must_use]
    pub fn bind_input(
        mut self,
        step: impl Into<String>,
        input: impl Into<String>,
        value: Value,
    ) -> Self {
        self.bindings.push(ContextBinding {
            step: step.into(),
            input: input.into(),
            value,
        });
        self
    }

    /// Declare a flow variable; its default seeds each conversation's
    /// variable store.
    #[must_use]
    pub fn variable(mut self, property: Property) -> Self {
        self.variables.push(property);
        self
    }

    /// Expose a step output as a flow output named by `property`.
    #[must_use]
    pub fn expose_output(
        mut self,
        property: Property,
        step: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        self.exposed.push((property, step.into(), output.into()));
        self
    }

    /// Terminal edges restart at the begin step instead of finishing.
    #[must_use]
    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    /// Validate and compile the flow.
    pub fn build(self) -> Result<Flow, FlowBuildError> {
        let mut steps: FxHashMap<String, Arc<dyn Step>> = FxHashMap::default();
        for (id, step) in self.steps {
            if id.is_empty() || id.contains('.') {
                return Err(FlowBuildError::InvalidStepId { step: id });
            }
            if steps.insert(id.clone(), step).is_some() {
                return Err(FlowBuildError::DuplicateStepId { step: id });
            }
        }

        let begin = self.begin.ok_or_else(|| FlowBuildError::MissingBeginStep {
            flow: self.name.clone(),
        })?;
        if !steps.contains_key(&begin) {
            return Err(FlowBuildError::UnknownStep {
                step: begin,
                referenced_by: "begin".to_string(),
            });
        }

        let control = Self::validate_control_edges(&steps, &self.control_edges)?;
        let data_by_dest = Self::validate_data_edges(&steps, &self.data_edges)?;
        let bindings = Self::validate_bindings(&steps, &data_by_dest, &self.bindings)?;
        let (outputs, output_sources) = Self::validate_exposed(&steps, self.exposed)?;
        let inputs = Self::collect_open_inputs(&steps, &data_by_dest, &bindings)?;

        let mut exits = Vec::new();
        for edge in &self.control_edges {
            if let Target::End { exit } = &edge.target {
                if !exits.contains(exit) {
                    exits.push(exit.clone());
                }
            }
        }
        if exits.is_empty() && !self.looping {
            tracing::warn!(flow = %self.name, "flow has no terminal edge and will never finish");
        }

        let might_yield = steps.values().any(|s| s.might_yield());

        Ok(Flow {
            name: self.name,
            begin,
            steps,
            control,
            data_by_dest,
            bindings,
            variables: self.variables,
            inputs,
            outputs,
            output_sources,
            exits,
            looping: self.looping,
            might_yield,
        })
    }

    fn validate_control_edges(
        steps: &FxHashMap<String, Arc<dyn Step>>,
        edges: &[ControlFlowEdge],
    ) -> Result<FxHashMap<(String, String), Target>, FlowBuildError> {
        let mut control: FxHashMap<(String, String), Target> = FxHashMap::default();

        for edge in edges {
            let source = steps
                .get(&edge.source)
                .ok_or_else(|| FlowBuildError::UnknownStep {
                    step: edge.source.clone(),
                    referenced_by: "a control-flow edge".to_string(),
                })?;
            if !source.branches().contains(&edge.branch) {
                return Err(FlowBuildError::UnknownBranch {
                    step: edge.source.clone(),
                    branch: edge.branch.clone(),
                });
            }
            if let Target::Step(dest) = &edge.target {
                if !steps.contains_key(dest) {
                    return Err(FlowBuildError::UnknownStep {
                        step: dest.clone(),
                        referenced_by: format!("edge from `{}`", edge.source),
                    });
                }
            }
            let key = (edge.source.clone(), edge.branch.clone());
            if control.insert(key, edge.target.clone()).is_some() {
                return Err(FlowBuildError::DuplicateBranchEdge {
                    step: edge.source.clone(),
                    branch: edge.branch.clone(),
                });
            }
        }

        // Every branch every step can produce must be wired.
        let mut ids: Vec<&String> = steps.keys().collect();
        ids.sort();
        for id in ids {
            for branch in steps[id].branches() {
                if !control.contains_key(&(id.clone(), branch.clone())) {
                    return Err(FlowBuildError::DanglingBranch {
                        step: id.clone(),
                        branch,
                    });
                }
            }
        }

        Ok(control)
    }

    fn validate_data_edges(
        steps: &FxHashMap<String, Arc<dyn Step>>,
        edges: &[(String, String, String, String)],
    ) -> Result<FxHashMap<String, Vec<DataFlowEdge>>, FlowBuildError> {
        let mut by_dest: FxHashMap<String, Vec<DataFlowEdge>> = FxHashMap::default();
        let mut seen: FxHashSet<(String, String)> = FxHashSet::default();

        for (source, output, dest, input) in edges {
            let source_step = steps
                .get(source)
                .ok_or_else(|| FlowBuildError::UnknownStep {
                    step: source.clone(),
                    referenced_by: "a data-flow edge".to_string(),
                })?;
            let dest_step = steps.get(dest).ok_or_else(|| FlowBuildError::UnknownStep {
                step: dest.clone(),
                referenced_by: "a data-flow edge".to_string(),
            })?;

            let source_ty = source_step
                .output_descriptors()
                .iter()
                .find(|p| &p.name == output)
                .map(|p| p.ty.clone())
                .ok_or_else(|| FlowBuildError::UnknownOutput {
                    step: source.clone(),
                    output: output.clone(),
                })?;
            let dest_ty = dest_step
                .input_descriptors()
                .iter()
                .find(|p| &p.name == input)
                .map(|p| p.ty.clone())
                .ok_or_else(|| FlowBuildError::UnknownInput {
                    step: dest.clone(),
                    input: input.clone(),
                })?;

            if !source_ty.is_castable_to(&dest_ty) {
                return Err(FlowBuildError::DataEdgeTypeMismatch {
                    source: source.clone(),
                    output: output.clone(),
                    dest: dest.clone(),
                    input: input.clone(),
                    source_ty,
                    dest_ty,
                });
            }
            if !seen.insert((dest.clone(), input.clone())) {
                return Err(FlowBuildError::DataEdgeCollision {
                    step: dest.clone(),
                    input: input.clone(),
                });
            }

            by_dest.entry(dest.clone()).or_default().push(DataFlowEdge {
                source: source.clone(),
                output: output.clone(),
                dest: dest.clone(),
                input: input.clone(),
                source_ty,
                dest_ty,
            });
        }

        Ok(by_dest)
    }

    fn validate_bindings(
        steps: &FxHashMap<String, Arc<dyn Step>>,
        data_by_dest: &FxHashMap<String, Vec<DataFlowEdge>>,
        bindings: &[ContextBinding],
    ) -> Result<FxHashMap<(String, String), Value>, FlowBuildError> {
        let mut bound: FxHashMap<(String, String), Value> = FxHashMap::default();

        for binding in bindings {
            let step = steps
                .get(&binding.step)
                .ok_or_else(|| FlowBuildError::UnknownStep {
                    step: binding.step.clone(),
                    referenced_by: "a context binding".to_string(),
                })?;
            let prop = step
                .input_descriptors()
                .iter()
                .find(|p| p.name == binding.input)
                .ok_or_else(|| FlowBuildError::UnknownInput {
                    step: binding.step.clone(),
                    input: binding.input.clone(),
                })?;
            if !prop.ty.matches(&binding.value) {
                return Err(FlowBuildError::BindingTypeMismatch {
                    step: binding.step.clone(),
                    input: binding.input.clone(),
                    expected: prop.ty.clone(),
                });
            }
            let wired = data_by_dest
                .get(&binding.step)
                .is_some_and(|edges| edges.iter().any(|e| e.input == binding.input));
            let key = (binding.step.clone(), binding.input.clone());
            if wired || bound.insert(key, binding.value.clone()).is_some() {
                return Err(FlowBuildError::BindingCollision {
                    step: binding.step.clone(),
                    input: binding.input.clone(),
                });
            }
        }

        Ok(bound)
    }

    #[allow(clippy::type_complexity)]
    fn validate_exposed(
        steps: &FxHashMap<String, Arc<dyn Step>>,
        exposed: Vec<(Property, String, String)>,
    ) -> Result<(Vec<Property>, FxHashMap<String, (String, String)>), FlowBuildError> {
        let mut outputs = Vec::new();
        let mut sources: FxHashMap<String, (String, String)> = FxHashMap::default();

        for (property, step_id, output) in exposed {
            let step = steps.get(&step_id).ok_or_else(|| FlowBuildError::UnknownStep {
                step: step_id.clone(),
                referenced_by: format!("exposed output `{}`", property.name),
            })?;
            let found = step
                .output_descriptors()
                .iter()
                .find(|p| p.name == output)
                .map(|p| p.ty.clone())
                .ok_or_else(|| FlowBuildError::UnknownOutput {
                    step: step_id.clone(),
                    output: output.clone(),
                })?;
            if !found.is_castable_to(&property.ty) {
                return Err(FlowBuildError::OutputTypeMismatch {
                    step: step_id,
                    output,
                    found,
                    expected: property.ty,
                });
            }
            if sources
                .insert(property.name.clone(), (step_id, output))
                .is_some()
            {
                return Err(FlowBuildError::DuplicateFlowOutput {
                    output: property.name,
                });
            }
            outputs.push(property);
        }

        Ok((outputs, sources))
    }

    /// Open inputs become the flow's own input descriptors, merged by
    /// name across steps. A shared name with incompatible types is a
    /// construction error.
    fn collect_open_inputs(
        steps: &FxHashMap<String, Arc<dyn Step>>,
        data_by_dest: &FxHashMap<String, Vec<DataFlowEdge>>,
        bindings: &FxHashMap<(String, String), Value>,
    ) -> Result<Vec<Property>, FlowBuildError> {
        let mut open: Vec<Property> = Vec::new();
        let mut ids: Vec<&String> = steps.keys().collect();
        ids.sort();

        for id in ids {
            for prop in steps[id].input_descriptors() {
                let wired = data_by_dest
                    .get(id)
                    .is_some_and(|edges| edges.iter().any(|e| e.input == prop.name));
                let bound = bindings.contains_key(&(id.clone(), prop.name.clone()));
                if wired || bound {
                    continue;
                }

                match open.iter_mut().find(|p| p.name == prop.name) {
                    None => open.push(prop.clone()),
                    Some(existing) => {
                        if existing.ty == prop.ty {
                            // A consumer without a default makes the
                            // merged flow input required.
                            if prop.default.is_none() {
                                existing.default = None;
                            }
                        } else if existing.ty == PropertyType::Any {
                            existing.ty = prop.ty.clone();
                        } else if prop.ty == PropertyType::Any
                            || existing.ty.is_castable_to(&prop.ty)
                        {
                            // Keep the stricter existing type.
                        } else if prop.ty.is_castable_to(&existing.ty) {
                            existing.ty = prop.ty.clone();
                        } else {
                            return Err(FlowBuildError::FlowInputTypeConflict {
                                input: prop.name.clone(),
                            });
                        }
                    }
                }
            }
        }

        Ok(open)
    }
}
