//! Transcript-facing steps: ask the user, tell the user.

use async_trait::async_trait;
use serde_json::json;

use crate::message::Message;
use crate::properties::Property;
use crate::runtimes::status::ExecutionStatus;

use super::{Step, StepContext, StepError, StepInputs, StepResult};

/// Suspends the conversation until the caller appends a user message,
/// then exposes that message as its `message` output.
///
/// The optional prompt is surfaced in the `AwaitingUserMessage` status and
/// recorded on the transcript as an assistant message at suspension time.
pub struct InputMessageStep {
    prompt: Option<String>,
    inputs: Vec<Property>,
    outputs: Vec<Property>,
}

impl InputMessageStep {
    pub fn new() -> Self {
        Self {
            prompt: None,
            inputs: Vec::new(),
            outputs: vec![Property::string("message")],
        }
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }
}

impl Default for InputMessageStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Step for InputMessageStep {
    fn input_descriptors(&self) -> &[Property] {
        &self.inputs
    }

    fn output_descriptors(&self) -> &[Property] {
        &self.outputs
    }

    fn might_yield(&self) -> bool {
        true
    }

    async fn invoke(
        &self,
        _inputs: StepInputs,
        ctx: StepContext<'_>,
    ) -> Result<StepResult, StepError> {
        if let Some(text) = ctx.shared.pending_user_message.take() {
            return Ok(StepResult::next([("message", json!(text))]));
        }
        if let Some(prompt) = &self.prompt {
            ctx.shared.transcript.push(Message::assistant(prompt));
        }
        Ok(StepResult::Yielding(ExecutionStatus::AwaitingUserMessage {
            message: self.prompt.clone(),
        }))
    }
}

/// Appends its `message` input to the transcript as an assistant message
/// and echoes it as output.
pub struct OutputMessageStep {
    inputs: Vec<Property>,
    outputs: Vec<Property>,
}

impl OutputMessageStep {
    pub fn new() -> Self {
        Self {
            inputs: vec![Property::string("message")],
            outputs: vec![Property::string("message")],
        }
    }
}

impl Default for OutputMessageStep {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Step for OutputMessageStep {
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
        let text = inputs.require_str("message")?.to_string();
        ctx.shared.transcript.push(Message::assistant(&text));
        Ok(StepResult::next([("message", json!(text))]))
    }
}
