#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::{Value, json};

use weftflow::properties::Property;
use weftflow::steps::{Step, StepContext, StepError, StepInputs, StepResult};
use weftflow::tools::{ClientTool, FnTool, ToolError};
use weftflow::utils::collections::value_map_from;

/// Build an input map from pairs.
pub fn inputs<I, K>(pairs: I) -> FxHashMap<String, Value>
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    value_map_from(pairs)
}

/// Step producing a constant `value` output.
pub struct ConstStep {
    value: Value,
    inputs: Vec<Property>,
    outputs: Vec<Property>,
}

impl ConstStep {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            inputs: Vec::new(),
            outputs: vec![Property::any("value")],
        }
    }
}

#[async_trait]
impl Step for ConstStep {
    fn input_descriptors(&self) -> &[Property] {
        &self.inputs
    }

    fn output_descriptors(&self) -> &[Property] {
        &self.outputs
    }

    async fn invoke(
        &self,
        _inputs: StepInputs,
        _ctx: StepContext<'_>,
    ) -> Result<StepResult, StepError> {
        Ok(StepResult::next([("value", self.value.clone())]))
    }
}

/// Step doubling its integer input.
pub struct DoubleStep {
    inputs: Vec<Property>,
    outputs: Vec<Property>,
}

impl DoubleStep {
    pub fn new() -> Self {
        Self {
            inputs: vec![Property::integer("n")],
            outputs: vec![Property::integer("doubled")],
        }
    }
}

#[async_trait]
impl Step for DoubleStep {
    fn input_descriptors(&self) -> &[Property] {
        &self.inputs
    }

    fn output_descriptors(&self) -> &[Property] {
        &self.outputs
    }

    async fn invoke(
        &self,
        inputs: StepInputs,
        _ctx: StepContext<'_>,
    ) -> Result<StepResult, StepError> {
        let n = inputs
            .require("n")?
            .as_i64()
            .ok_or_else(|| StepError::raised("TypeError", "n is not an integer"))?;
        Ok(StepResult::next([("doubled", json!(n * 2))]))
    }
}

/// Step adding one to its input.
pub struct IncrementStep {
    inputs: Vec<Property>,
    outputs: Vec<Property>,
}

impl IncrementStep {
    pub fn new() -> Self {
        Self {
            inputs: vec![Property::integer("n")],
            outputs: vec![Property::integer("n")],
        }
    }
}

#[async_trait]
impl Step for IncrementStep {
    fn input_descriptors(&self) -> &[Property] {
        &self.inputs
    }

    fn output_descriptors(&self) -> &[Property] {
        &self.outputs
    }

    async fn invoke(
        &self,
        inputs: StepInputs,
        _ctx: StepContext<'_>,
    ) -> Result<StepResult, StepError> {
        let n = inputs
            .require("n")?
            .as_i64()
            .ok_or_else(|| StepError::raised("TypeError", "n is not an integer"))?;
        Ok(StepResult::next([("n", json!(n + 1))]))
    }
}

/// Step raising `ValueError` for negative input, returning `"ok"`
/// otherwise.
pub struct CheckSignStep {
    inputs: Vec<Property>,
    outputs: Vec<Property>,
}

impl CheckSignStep {
    pub fn new() -> Self {
        Self {
            inputs: vec![Property::integer("x")],
            outputs: vec![Property::string("status")],
        }
    }
}

#[async_trait]
impl Step for CheckSignStep {
    fn input_descriptors(&self) -> &[Property] {
        &self.inputs
    }

    fn output_descriptors(&self) -> &[Property] {
        &self.outputs
    }

    async fn invoke(
        &self,
        inputs: StepInputs,
        _ctx: StepContext<'_>,
    ) -> Result<StepResult, StepError> {
        let x = inputs
            .require("x")?
            .as_i64()
            .ok_or_else(|| StepError::raised("TypeError", "x is not an integer"))?;
        if x < 0 {
            return Err(StepError::raised("ValueError", "negative input"));
        }
        Ok(StepResult::next([("status", json!("ok"))]))
    }
}

/// Step with arbitrary declared IO that echoes output defaults; used to
/// exercise construction-time validation without running anything.
pub struct TypedIoStep {
    inputs: Vec<Property>,
    outputs: Vec<Property>,
}

impl TypedIoStep {
    pub fn new(inputs: Vec<Property>, outputs: Vec<Property>) -> Self {
        Self { inputs, outputs }
    }
}

#[async_trait]
impl Step for TypedIoStep {
    fn input_descriptors(&self) -> &[Property] {
        &self.inputs
    }

    fn output_descriptors(&self) -> &[Property] {
        &self.outputs
    }

    async fn invoke(
        &self,
        _inputs: StepInputs,
        _ctx: StepContext<'_>,
    ) -> Result<StepResult, StepError> {
        let outputs: Vec<(String, Value)> = self
            .outputs
            .iter()
            .map(|p| (p.name.clone(), p.default.clone().unwrap_or(Value::Null)))
            .collect();
        Ok(StepResult::next(outputs))
    }
}

/// Server tool echoing its `text` argument as `echoed`.
pub fn echo_tool() -> Arc<FnTool> {
    Arc::new(
        FnTool::builder("echo")
            .input(Property::string("text"))
            .output(Property::string("echoed"))
            .handler(|req| Ok(req.args.get("text").cloned().unwrap_or(Value::Null)))
            .build(),
    )
}

/// Server tool adding `a` and `b` into `sum`.
pub fn adder_tool() -> Arc<FnTool> {
    Arc::new(
        FnTool::builder("adder")
            .input(Property::integer("a"))
            .input(Property::integer("b"))
            .output(Property::integer("sum"))
            .handler(|req| {
                let a = req.args.get("a").and_then(Value::as_i64).unwrap_or(0);
                let b = req.args.get("b").and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(a + b))
            })
            .build(),
    )
}

/// Confirmation-gated server tool issuing a receipt for an amount.
pub fn transfer_tool() -> Arc<FnTool> {
    Arc::new(
        FnTool::builder("transfer")
            .input(Property::integer("amount"))
            .output(Property::string("receipt"))
            .requires_confirmation()
            .handler(|req| {
                let amount = req.args.get("amount").and_then(Value::as_i64).unwrap_or(0);
                Ok(json!(format!("transferred {amount}")))
            })
            .build(),
    )
}

/// Server tool that always fails with `TimeoutError`.
pub fn failing_tool() -> Arc<FnTool> {
    Arc::new(
        FnTool::builder("flaky")
            .output(Property::string("message"))
            .handler(|_| Err(ToolError::new("TimeoutError", "upstream stalled")))
            .build(),
    )
}

/// Caller-executed tool answering a query.
pub fn remote_tool() -> Arc<ClientTool> {
    Arc::new(ClientTool::new(
        "remote",
        vec![Property::string("query")],
        vec![Property::string("answer")],
    ))
}
