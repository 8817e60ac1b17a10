//! Literal-to-branch routing.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::properties::Property;

use super::{BRANCH_NEXT, Step, StepContext, StepError, StepInputs, StepResult};

/// Pure, stateless routing step: looks its `value` input up in a
/// literal→branch mapping. Unmapped values take the default branch.
/// Never yields.
///
/// # Examples
///
/// ```rust
/// use weftflow::steps::{BranchingStep, Step};
///
/// let step = BranchingStep::new([
///     ("[SUCCESS]", "success"),
///     ("[FAILURE]", "failure"),
/// ]);
/// let mut branches = step.branches();
/// branches.sort();
/// assert_eq!(branches, vec!["failure", "next", "success"]);
/// ```
pub struct BranchingStep {
    mapping: FxHashMap<String, String>,
    branch_order: Vec<String>,
    inputs: Vec<Property>,
    outputs: Vec<Property>,
}

impl BranchingStep {
    pub fn new<I, K, V>(mapping: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mapping: FxHashMap<String, String> = mapping
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let mut branch_order: Vec<String> = mapping.values().cloned().collect();
        branch_order.sort();
        branch_order.dedup();
        Self {
            mapping,
            branch_order,
            inputs: vec![Property::any("value")],
            outputs: Vec::new(),
        }
    }

    fn branch_for(&self, value: &Value) -> String {
        let key = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        self.mapping
            .get(&key)
            .cloned()
            .unwrap_or_else(|| BRANCH_NEXT.to_string())
    }
}

#[async_trait]
impl Step for BranchingStep {
    fn input_descriptors(&self) -> &[Property] {
        &self.inputs
    }

    fn output_descriptors(&self) -> &[Property] {
        &self.outputs
    }

    fn branches(&self) -> Vec<String> {
        let mut branches = self.branch_order.clone();
        if !branches.iter().any(|b| b == BRANCH_NEXT) {
            branches.push(BRANCH_NEXT.to_string());
        }
        branches
    }

    async fn invoke(
        &self,
        inputs: StepInputs,
        _ctx: StepContext<'_>,
    ) -> Result<StepResult, StepError> {
        let value = inputs.require("value")?;
        let branch = self.branch_for(value);
        Ok(StepResult::Normal {
            outputs: FxHashMap::default(),
            branch,
        })
    }
}
