use thiserror::Error;

use super::event::Event;

/// Errors that can occur when emitting an event.
#[derive(Debug, Error)]
pub enum EmitterError {
    #[error("event bus closed")]
    Closed,
}

/// Cloneable handle producers use to push events onto an [`EventBus`].
///
/// A disabled emitter ([`EventEmitter::noop`]) accepts and discards every
/// event, so executors never need to special-case "no bus attached".
///
/// [`EventBus`]: super::EventBus
#[derive(Clone, Debug, Default)]
pub struct EventEmitter {
    sender: Option<flume::Sender<Event>>,
}

impl EventEmitter {
    pub(crate) fn new(sender: flume::Sender<Event>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Emitter that silently discards everything.
    #[must_use]
    pub fn noop() -> Self {
        Self { sender: None }
    }

    /// Emit an event in a synchronous, non-blocking manner.
    pub fn emit(&self, event: Event) -> Result<(), EmitterError> {
        match &self.sender {
            Some(sender) => sender.send(event).map_err(|_| EmitterError::Closed),
            None => Ok(()),
        }
    }
}
