//! Built-in demonstration agents, one per execution style.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};

use super::{Agent, AgentCatalog, BlockingAgent, ProgressCallback, StateStream, StreamingAgent};
use crate::error::ExecutionError;

/// Register every built-in agent.
pub fn register_all(catalog: &mut AgentCatalog) {
    catalog.register(
        "echo-agent",
        "Streams back the input message one word at a time.",
        Agent::Streaming(Arc::new(EchoAgent::default())),
    );
    catalog.register(
        "batch-agent",
        "Runs a fixed number of blocking steps, reporting each one.",
        Agent::Blocking(Arc::new(BatchAgent::default())),
    );
}

fn opt_u64(input: &Value, key: &str) -> Result<Option<u64>, ExecutionError> {
    match input.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| ExecutionError::failed(format!("{key} must be a non-negative integer"))),
    }
}

// ── EchoAgent ───────────────────────────────────────────────────────────

/// Emits one full state per word of `messages`.
///
/// Input: `{"messages": "text" | ["text", ...], "delay_ms"?: n, "fail_after"?: n}`.
#[derive(Debug, Clone)]
pub struct EchoAgent {
    default_delay: Duration,
}

impl Default for EchoAgent {
    fn default() -> Self {
        Self {
            default_delay: Duration::from_millis(50),
        }
    }
}

impl EchoAgent {
    fn words(input: &Value) -> Vec<String> {
        let text = match input.get("messages") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
            _ => String::new(),
        };
        text.split_whitespace().map(str::to_string).collect()
    }
}

impl StreamingAgent for EchoAgent {
    fn stream(&self, input: Value) -> StateStream {
        let default_delay = self.default_delay;

        Box::pin(async_stream::stream! {
            let settings = opt_u64(&input, "delay_ms")
                .and_then(|delay| Ok((delay, opt_u64(&input, "fail_after")?)));
            let (delay, fail_after) = match settings {
                Ok((delay, fail_after)) => (
                    delay.map(Duration::from_millis).unwrap_or(default_delay),
                    fail_after,
                ),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            let messages = input.get("messages").cloned().unwrap_or(Value::Null);

            let mut seen = Vec::new();
            for (i, word) in Self::words(&input).into_iter().enumerate() {
                if fail_after == Some(i as u64) {
                    yield Err(ExecutionError::failed(format!("echo stopped after {i} words")));
                    return;
                }
                tokio::time::sleep(delay).await;
                seen.push(word);
                yield Ok(json!({
                    "messages": &messages,
                    "words": &seen,
                    "step": i + 1,
                }));
            }
        })
    }
}

// ── BatchAgent ──────────────────────────────────────────────────────────

/// Runs `steps` blocking steps, reporting each through the callback.
///
/// Input: `{"steps"?: n, "delay_ms"?: n, "fail_at"?: n}`.
#[derive(Debug, Clone)]
pub struct BatchAgent {
    default_steps: u64,
    default_delay: Duration,
}

impl Default for BatchAgent {
    fn default() -> Self {
        Self {
            default_steps: 3,
            default_delay: Duration::from_millis(100),
        }
    }
}

impl BlockingAgent for BatchAgent {
    fn run(&self, input: Value, progress: &ProgressCallback) -> Result<Value, ExecutionError> {
        let steps = opt_u64(&input, "steps")?.unwrap_or(self.default_steps);
        let delay = opt_u64(&input, "delay_ms")?
            .map(Duration::from_millis)
            .unwrap_or(self.default_delay);
        let fail_at = opt_u64(&input, "fail_at")?;

        for step in 1..=steps {
            if fail_at == Some(step) {
                return Err(ExecutionError::failed(format!("step {step} of {steps} failed")));
            }
            std::thread::sleep(delay);
            progress.report(format!("step {step}/{steps}"), &json!({"step": step, "of": steps}));
        }

        Ok(json!({"completed_steps": steps}))
    }
}
