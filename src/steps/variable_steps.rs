//! The variable store's only writers and readers.
//!
//! Variables are a namespace distinct from step IO, used for cross-step
//! and cross-iteration accumulation. Declared variables are seeded with
//! their defaults when a conversation starts; reading an undeclared,
//! never-written variable raises `UnknownVariableError`.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::properties::Property;

use super::{Step, StepContext, StepError, StepInputs, StepResult};

/// How [`VariableWriteStep`] combines the incoming value with what is
/// already stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Replace the stored value.
    #[default]
    Overwrite,
    /// Push onto a stored list, creating one if absent. Accumulation
    /// across loop iterations is the typical use.
    Append,
}

/// Writes its `value` input into the enclosing flow's variable store.
pub struct VariableWriteStep {
    variable: String,
    mode: WriteMode,
    inputs: Vec<Property>,
    outputs: Vec<Property>,
}

impl VariableWriteStep {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            mode: WriteMode::Overwrite,
            inputs: vec![Property::any("value")],
            outputs: Vec::new(),
        }
    }

    /// Append to a stored list instead of overwriting.
    #[must_use]
    pub fn appending(mut self) -> Self {
        self.mode = WriteMode::Append;
        self
    }
}

#[async_trait]
impl Step for VariableWriteStep {
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
        let value = inputs.require("value")?.clone();
        match self.mode {
            WriteMode::Overwrite => {
                ctx.variables.insert(self.variable.clone(), value);
            }
            WriteMode::Append => {
                let slot = ctx
                    .variables
                    .entry(self.variable.clone())
                    .or_insert_with(|| json!([]));
                match slot {
                    Value::Array(items) => items.push(value),
                    other => *other = json!([other.clone(), value]),
                }
            }
        }
        Ok(StepResult::Passthrough)
    }
}

/// Reads a variable from the enclosing flow's variable store and exposes
/// it as its `value` output.
pub struct VariableReadStep {
    variable: String,
    inputs: Vec<Property>,
    outputs: Vec<Property>,
}

impl VariableReadStep {
    pub fn new(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            inputs: Vec::new(),
            outputs: vec![Property::any("value")],
        }
    }
}

#[async_trait]
impl Step for VariableReadStep {
    fn input_descriptors(&self) -> &[Property] {
        &self.inputs
    }

    fn output_descriptors(&self) -> &[Property] {
        &self.outputs
    }

    async fn invoke(
        &self,
        _inputs: StepInputs,
        ctx: StepContext<'_>,
    ) -> Result<StepResult, StepError> {
        let value = ctx.variables.get(&self.variable).cloned().ok_or_else(|| {
            StepError::raised(
                "UnknownVariableError",
                format!("variable `{}` was never declared or written", self.variable),
            )
        })?;
        Ok(StepResult::next([("value", value)]))
    }
}
