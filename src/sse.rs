//! Foreground streaming: drive one cooperative agent straight onto a client
//! connection, one frame per snapshot.
//!
//! Nothing here touches the registry. The caller already holds the live
//! connection, so there is nothing to poll.

use std::sync::Arc;

use futures::stream::BoxStream;
use serde_json::Value;

use crate::adapters::event_stream::next_state;
use crate::agents::StreamingAgent;

/// Content of the sentinel frame.
pub const DONE: &str = "[DONE]";

/// Client-facing text of the in-band error frame. Internal detail stays in
/// the logs.
pub const ERROR_MESSAGE: &str = "An error occurred while processing your request";

/// One server-sent event.
#[derive(Debug, Clone, PartialEq)]
pub enum SseFrame {
    /// A state snapshot, already rendered as JSON text.
    Data(String),
    /// In-band failure, always followed by `Done`.
    Error,
    /// Terminal sentinel.
    Done,
}

impl SseFrame {
    /// Render a snapshot. Falls back to the JSON string of its text form
    /// when the value cannot be rendered directly.
    pub fn data(state: &Value) -> Self {
        match serde_json::to_string(state) {
            Ok(json) => Self::Data(json),
            Err(e) => {
                tracing::warn!(error = %e, "Snapshot not serializable, sending text rendering");
                Self::Data(Value::String(state.to_string()).to_string())
            }
        }
    }

    /// Payload carried on the `data:` line.
    pub fn payload(&self) -> String {
        match self {
            Self::Data(json) => json.clone(),
            Self::Error => serde_json::json!({
                "type": "error",
                "content": ERROR_MESSAGE,
            })
            .to_string(),
            Self::Done => DONE.to_string(),
        }
    }

    /// Full wire form: `data: <payload>\n\n`.
    pub fn to_wire(&self) -> String {
        format!("data: {}\n\n", self.payload())
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Turns a streaming agent execution into a frame sequence.
pub struct SseMultiplexer {
    agent: Arc<dyn StreamingAgent>,
}

impl SseMultiplexer {
    pub fn new(agent: Arc<dyn StreamingAgent>) -> Self {
        Self { agent }
    }

    /// Start the agent on `input` and return its frames.
    ///
    /// Every snapshot becomes a `Data` frame. A failure (including a panic
    /// inside the agent) yields one `Error` frame. The sequence always ends
    /// with `Done`.
    pub fn frames(&self, input: Value) -> BoxStream<'static, SseFrame> {
        let mut states = self.agent.stream(input);
        Box::pin(async_stream::stream! {
            let mut sent = 0usize;
            while let Some(item) = next_state(&mut states).await {
                match item {
                    Ok(state) => {
                        sent += 1;
                        yield SseFrame::data(&state);
                    }
                    Err(e) => {
                        tracing::error!(error = %e, frames = sent, "Streaming run failed");
                        yield SseFrame::Error;
                        break;
                    }
                }
            }
            tracing::debug!(frames = sent, "Stream finished");
            yield SseFrame::Done;
        })
    }
}
