//! Flow definition and compilation.
//!
//! A [`Flow`] is a compiled, validated, immutable graph of steps wired by
//! control-flow and data-flow edges. Flows are built through
//! [`FlowBuilder`], which raises every structural error at construction —
//! a flow that builds cannot fail on graph structure at run time — and are
//! then shared behind an `Arc` by any number of concurrent conversations.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use weftflow::flows::FlowBuilder;
//! use weftflow::steps::{InputMessageStep, OutputMessageStep};
//!
//! let flow = Arc::new(
//!     FlowBuilder::new("echo")
//!         .add_step("ask", InputMessageStep::new().with_prompt("Say something"))
//!         .add_step("tell", OutputMessageStep::new())
//!         .begin("ask")
//!         .edge("ask", "tell")
//!         .end("tell")
//!         .data_edge("ask", "message", "tell", "message")
//!         .build()
//!         .expect("valid flow"),
//! );
//!
//! assert!(flow.might_yield());
//! ```

mod builder;
mod edges;
mod flow;

pub use builder::{DEFAULT_EXIT, FlowBuildError, FlowBuilder};
pub use edges::{ContextBinding, ControlFlowEdge, DataFlowEdge, Target};
pub use flow::Flow;
