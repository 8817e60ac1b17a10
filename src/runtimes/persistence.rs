/*!
Persistence primitives for serializing and restoring suspended
conversations.

Design goals:
- Provide an explicit, versioned, serde-friendly envelope decoupled from
  the in-memory `Conversation` (which holds non-serializable attachments:
  the `Arc<Flow>`, observers, and the event emitter).
- Keep conversion logic localized so embedding code stays declarative.
- The behavioral contract: a conversation snapshotted at any suspension
  point, serialized, deserialized, and resumed behaves identically to one
  that never left memory.

This module intentionally does NOT perform I/O. It is pure data
transformation and (de)serialization glue; the surrounding application
chooses where the bytes live.
*/

use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flows::Flow;
use crate::runtimes::conversation::Conversation;
use crate::runtimes::state::ExecutionState;
use crate::utils::json_ext::JsonSerializable;

/// Current envelope format version.
pub const FORMAT_VERSION: u32 = 1;

/// Serialization/restore errors for persisted conversations.
#[derive(Debug, Error, Diagnostic)]
pub enum PersistenceError {
    #[error("unsupported persistence format version {found} (supported: {FORMAT_VERSION})")]
    #[diagnostic(code(weftflow::persistence::version))]
    UnsupportedVersion { found: u32 },

    #[error("snapshot was taken on flow `{found}` but `{expected}` was supplied")]
    #[diagnostic(
        code(weftflow::persistence::flow_mismatch),
        help("Restore a snapshot with the same compiled flow it was taken from.")
    )]
    FlowMismatch { expected: String, found: String },

    #[error("JSON serialization/deserialization failed: {source}")]
    #[diagnostic(code(weftflow::persistence::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },
}

/// Blanket JSON round-trip support for all serde-friendly shapes in this
/// module.
impl<T> JsonSerializable<PersistenceError> for T
where
    T: serde::Serialize + for<'de> serde::de::DeserializeOwned,
{
    fn to_json_string(&self) -> Result<String, PersistenceError> {
        serde_json::to_string(self).map_err(|e| PersistenceError::Serde { source: e })
    }

    fn from_json_str(s: &str) -> Result<Self, PersistenceError> {
        serde_json::from_str(s).map_err(|e| PersistenceError::Serde { source: e })
    }
}

/// Versioned, self-describing snapshot of one conversation.
///
/// The compiled flow is not part of the snapshot — flows contain step
/// implementations, which are code, not data. Restoring requires the same
/// compiled flow; the stored flow name is checked as a sanity guard.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedConversation {
    pub format_version: u32,
    pub flow_name: String,
    /// RFC3339 creation time of the snapshot.
    pub saved_at: String,
    pub state: ExecutionState,
}

impl From<&Conversation> for PersistedConversation {
    fn from(conversation: &Conversation) -> Self {
        PersistedConversation {
            format_version: FORMAT_VERSION,
            flow_name: conversation.flow().name().to_string(),
            saved_at: Utc::now().to_rfc3339(),
            state: conversation.state().clone(),
        }
    }
}

impl Conversation {
    /// Capture a serializable snapshot of this conversation.
    ///
    /// Valid at every suspension point; the snapshot carries the
    /// transcript, IO store, variable store, per-step in-flight contexts,
    /// resume queues, cursor, and last status.
    #[must_use]
    pub fn snapshot(&self) -> PersistedConversation {
        PersistedConversation::from(self)
    }

    /// Rebuild a conversation from a snapshot and its compiled flow.
    ///
    /// Observers and event buses are not part of the snapshot; re-attach
    /// them afterwards. The restored conversation is behaviorally
    /// identical to the one the snapshot was taken from.
    pub fn restore(
        flow: Arc<Flow>,
        persisted: PersistedConversation,
    ) -> Result<Conversation, PersistenceError> {
        if persisted.format_version != FORMAT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: persisted.format_version,
            });
        }
        if persisted.flow_name != flow.name() {
            return Err(PersistenceError::FlowMismatch {
                expected: flow.name().to_string(),
                found: persisted.flow_name,
            });
        }
        Ok(Conversation::from_parts(flow, persisted.state))
    }
}
