//! Event bus for observing conversation execution.
//!
//! Executors emit [`Event`]s at step, tool, and diagnostic boundaries; the
//! [`EventBus`] fans them out to pluggable [`EventSink`]s from a background
//! listener task. Event delivery is strictly observational — a dropped or
//! failing sink never affects what a conversation computes.

mod bus;
mod emitter;
mod event;
mod sink;

pub use bus::EventBus;
pub use emitter::{EmitterError, EventEmitter};
pub use event::{DiagnosticEvent, Event, StepEvent, StepPhase, ToolEvent, ToolPhase};
pub use sink::{ChannelSink, EventSink, MemorySink, StdOutSink};
