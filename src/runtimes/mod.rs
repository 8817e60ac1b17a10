//! Conversation runtime: the executor, suspension contract, and
//! persistence boundary.
//!
//! The runtime drives one logical execution path per conversation.
//! Suspension happens only at step boundaries; everything needed to
//! resume — cursor, IO store, variable store, transcript, resume queues,
//! and per-step in-flight contexts — lives in a serializable
//! [`ExecutionState`], so a suspended conversation can be persisted and
//! picked up in a different process.
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rustc_hash::FxHashMap;
//! use weftflow::runtimes::ExecutionStatus;
//! # async fn example(flow: Arc<weftflow::flows::Flow>) -> miette::Result<()> {
//!
//! let mut conversation = flow.start_conversation(FxHashMap::default())?;
//! match conversation.execute().await? {
//!     ExecutionStatus::AwaitingUserMessage { message } => {
//!         println!("{}", message.unwrap_or_default());
//!         conversation.append_user_message("hello")?;
//!     }
//!     status => println!("{}", status.label()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod conversation;
pub mod executor;
pub mod observer;
pub mod persistence;
pub mod state;
pub mod status;

pub use conversation::{Conversation, ProtocolError};
pub use executor::{ExecServices, ExecutionError};
pub use observer::{ExecutionBoundary, ExecutionObserver, StepBudgetObserver};
pub use persistence::{FORMAT_VERSION, PersistedConversation, PersistenceError};
pub use state::{ExecutionState, FlowFrame, InFlight, SharedState, ToolDecision};
pub use status::ExecutionStatus;
