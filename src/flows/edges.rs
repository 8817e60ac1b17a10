//! Edge types wiring steps into a flow graph.

use serde_json::Value;

use crate::properties::PropertyType;

/// Destination of a control-flow edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    /// Another step in the same flow.
    Step(String),
    /// A named terminal exit. Multi-exit flows let wrappers branch on
    /// which exit was reached.
    End { exit: String },
}

/// Control-flow edge: when `source` selects `branch`, execution moves to
/// `target`. Every branch a step can produce must be wired exactly once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlFlowEdge {
    pub source: String,
    pub branch: String,
    pub target: Target,
}

impl ControlFlowEdge {
    /// Edge to another step.
    pub fn to(
        source: impl Into<String>,
        branch: impl Into<String>,
        dest: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            branch: branch.into(),
            target: Target::Step(dest.into()),
        }
    }

    /// Edge to a named terminal exit.
    pub fn terminal(
        source: impl Into<String>,
        branch: impl Into<String>,
        exit: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            branch: branch.into(),
            target: Target::End { exit: exit.into() },
        }
    }
}

/// Data-flow edge: `source`'s `output` feeds `dest`'s `input`.
///
/// Endpoint types are resolved and checked for castability when the flow
/// is built; the stored types let the executor apply the implied cast
/// without consulting the steps again.
#[derive(Clone, Debug, PartialEq)]
pub struct DataFlowEdge {
    pub source: String,
    pub output: String,
    pub dest: String,
    pub input: String,
    pub source_ty: PropertyType,
    pub dest_ty: PropertyType,
}

/// Flow-construction-time constant bound to one step input.
#[derive(Clone, Debug, PartialEq)]
pub struct ContextBinding {
    pub step: String,
    pub input: String,
    pub value: Value,
}
