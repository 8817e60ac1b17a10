//! # Weftflow: Suspendable Step-Graph Workflow Runtime
//!
//! Weftflow executes graphs of steps — deterministic transforms, tool
//! calls, sub-flows — on behalf of a caller, pausing at well-defined
//! boundaries (user input needed, client-executed tool result needed,
//! human confirmation needed) and resuming later, including after the
//! in-flight conversation has been serialized, persisted, and reloaded in
//! a different process.
//!
//! ## Core Concepts
//!
//! - **Steps**: Immutable, reusable async units of work with declared,
//!   typed inputs, outputs, and branches
//! - **Flows**: Compiled, validated, immutable step graphs, shared by any
//!   number of concurrent conversations
//! - **Conversations**: Per-run mutable state — transcript, IO store,
//!   variable store, per-step in-flight contexts, resumption cursor
//! - **ExecutionStatus**: The suspend/finish contract; every waiting
//!   state names the datum the caller must supply to proceed
//! - **Tools**: Request/result handshake with at-most-one invocation per
//!   logical call, across arbitrary suspend/resume/serialize cycles
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use rustc_hash::FxHashMap;
//! use serde_json::json;
//! use weftflow::flows::FlowBuilder;
//! use weftflow::properties::Property;
//! use weftflow::runtimes::ExecutionStatus;
//! use weftflow::steps::ToolExecutionStep;
//! use weftflow::tools::FnTool;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let greet = Arc::new(
//!     FnTool::builder("greet")
//!         .input(Property::string("name"))
//!         .output(Property::string("greeting"))
//!         .handler(|req| {
//!             let name = req.args["name"].as_str().unwrap_or("stranger");
//!             Ok(json!(format!("Hello, {name}!")))
//!         })
//!         .build(),
//! );
//!
//! let flow = Arc::new(
//!     FlowBuilder::new("greeter")
//!         .add_step("greet", ToolExecutionStep::new(greet))
//!         .begin("greet")
//!         .end("greet")
//!         .expose_output(Property::string("greeting"), "greet", "greeting")
//!         .build()?,
//! );
//!
//! let mut inputs = FxHashMap::default();
//! inputs.insert("name".to_string(), json!("weft"));
//! let mut conversation = flow.start_conversation(inputs)?;
//!
//! match conversation.execute().await? {
//!     ExecutionStatus::Finished { outputs } => {
//!         assert_eq!(outputs["greeting"], json!("Hello, weft!"));
//!     }
//!     status => panic!("unexpected status: {}", status.label()),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Suspension and Resumption
//!
//! `execute()` returns an [`ExecutionStatus`](runtimes::ExecutionStatus).
//! Non-finished statuses name a requirement; supply it and call
//! `execute()` again:
//!
//! - `AwaitingUserMessage` → `append_user_message(text)`
//! - `AwaitingToolResult` → `append_tool_result(result)` per request id
//! - `AwaitingToolConfirmation` → `confirm_tool_execution` /
//!   `reject_tool_execution`
//!
//! Between those calls the conversation can be snapshotted with
//! [`Conversation::snapshot`](runtimes::Conversation::snapshot),
//! serialized with serde, and later restored against the same compiled
//! flow — the restored run is behaviorally identical.
//!
//! ## Module Guide
//!
//! - [`properties`] - Typed IO descriptors and the castability relation
//! - [`message`] - Transcript entries
//! - [`tools`] - Tool capability boundary and the request/result handshake
//! - [`steps`] - Step contract and the built-in step catalog
//! - [`flows`] - Flow construction and build-time validation
//! - [`runtimes`] - Conversations, the executor, suspension, persistence
//! - [`event_bus`] - Structured events at execution boundaries
//! - [`telemetry`] - Tracing setup and event formatting

pub mod event_bus;
pub mod flows;
pub mod message;
pub mod properties;
pub mod runtimes;
pub mod steps;
pub mod telemetry;
pub mod tools;
pub mod utils;
