//! Adapter for cooperative agents that yield state snapshots.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{AgentAdapter, RunFinisher, panic_message};
use crate::agents::{AgentKind, StateStream, StreamingAgent};
use crate::error::ExecutionError;
use crate::jobs::{JobRegistry, ProgressEvent};

/// Drives a `StreamingAgent` on the runtime, applying each snapshot to the
/// registry in the order it was produced.
pub struct EventStreamAdapter {
    agent: Arc<dyn StreamingAgent>,
    registry: Arc<JobRegistry>,
}

impl EventStreamAdapter {
    pub fn new(agent: Arc<dyn StreamingAgent>, registry: Arc<JobRegistry>) -> Self {
        Self { agent, registry }
    }
}

impl AgentAdapter for EventStreamAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Streaming
    }

    fn start(&self, run_id: Uuid, input: Value) -> JoinHandle<()> {
        let agent = Arc::clone(&self.agent);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            let run = RunFinisher::begin(Arc::clone(&registry), run_id).await;
            let states = agent.stream(input);
            match apply_states(run_id, &registry, states).await {
                Ok(count) => {
                    tracing::debug!(run_id = %run_id, snapshots = count, "Agent stream exhausted");
                    run.complete(None).await;
                }
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "Streaming agent failed");
                    // State stays at the last good snapshot.
                    run.fail(None, Some(ProgressEvent::error(&e))).await;
                }
            }
        })
    }
}

/// Pull the next item, turning a panic inside the agent into an error.
pub(crate) async fn next_state(states: &mut StateStream) -> Option<Result<Value, ExecutionError>> {
    match AssertUnwindSafe(states.next()).catch_unwind().await {
        Ok(item) => item,
        Err(panic) => Some(Err(ExecutionError::Panicked(panic_message(panic.as_ref())))),
    }
}

async fn apply_states(
    run_id: Uuid,
    registry: &JobRegistry,
    mut states: StateStream,
) -> Result<usize, ExecutionError> {
    let mut count = 0;
    while let Some(item) = next_state(&mut states).await {
        let state = item?;
        if let Err(e) = registry.update_state(run_id, state).await {
            tracing::warn!(run_id = %run_id, error = %e, "Dropping snapshot");
            continue;
        }
        count += 1;
        tracing::debug!(run_id = %run_id, snapshot = count, "Applied snapshot");
    }
    Ok(count)
}
