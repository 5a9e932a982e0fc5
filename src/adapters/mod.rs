//! Execution adapters: drive one agent run and report into the registry.
//!
//! - `event_stream`: cooperative agents, advanced on the runtime
//! - `callback_bridge`: blocking agents on the worker pool, progress bridged
//!   back through a bounded channel
//! - `worker_pool`: bounded pool of blocking threads

pub mod callback_bridge;
pub mod event_stream;
pub mod worker_pool;

pub use callback_bridge::CallbackBridgeAdapter;
pub use event_stream::EventStreamAdapter;
pub use worker_pool::WorkerPool;

use std::any::Any;
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::agents::{Agent, AgentKind};
use crate::config::BridgeConfig;
use crate::jobs::{JobRegistry, ProgressEvent, RunStatus};

/// Strategy that executes one run of an agent.
pub trait AgentAdapter: Send + Sync {
    /// Execution style this adapter drives.
    fn kind(&self) -> AgentKind;

    /// Launch run `run_id` in the background and return immediately.
    ///
    /// The run must already be registered. The returned handle can be
    /// dropped; it exists so callers may wait for the terminal status.
    fn start(&self, run_id: Uuid, input: Value) -> JoinHandle<()>;
}

/// Shared pieces every adapter needs.
#[derive(Clone)]
pub struct AdapterContext {
    pub registry: Arc<JobRegistry>,
    pub pool: WorkerPool,
    pub bridge: BridgeConfig,
}

/// Pick the adapter variant matching the agent's execution style.
pub fn adapter_for(agent: &Agent, ctx: &AdapterContext) -> Arc<dyn AgentAdapter> {
    match agent {
        Agent::Streaming(agent) => Arc::new(EventStreamAdapter::new(
            Arc::clone(agent),
            Arc::clone(&ctx.registry),
        )),
        Agent::Blocking(agent) => Arc::new(CallbackBridgeAdapter::new(
            Arc::clone(agent),
            Arc::clone(&ctx.registry),
            ctx.pool.clone(),
            ctx.bridge.clone(),
        )),
    }
}

/// Ownership token for a run's terminal transition.
///
/// `complete` and `fail` consume the token, so each run gets exactly one
/// terminal `set_status`.
pub(crate) struct RunFinisher {
    run_id: Uuid,
    registry: Arc<JobRegistry>,
}

impl RunFinisher {
    /// Take ownership of a registered run and mark it running.
    pub(crate) async fn begin(registry: Arc<JobRegistry>, run_id: Uuid) -> Self {
        if let Err(e) = registry.set_status(run_id, RunStatus::Running).await {
            tracing::warn!(run_id = %run_id, error = %e, "Could not mark run as running");
        }
        Self { run_id, registry }
    }

    /// Record the final state (if any) and mark the run completed.
    pub(crate) async fn complete(self, final_state: Option<Value>) {
        if let Some(state) = final_state
            && let Err(e) = self.registry.update_state(self.run_id, state).await
        {
            tracing::warn!(run_id = %self.run_id, error = %e, "Could not store final state");
        }
        self.finish(RunStatus::Completed).await;
    }

    /// Record the failure and mark the run failed.
    pub(crate) async fn fail(self, failure_state: Option<Value>, event: Option<ProgressEvent>) {
        if let Some(event) = event
            && let Err(e) = self.registry.append_event(self.run_id, event).await
        {
            tracing::warn!(run_id = %self.run_id, error = %e, "Could not record failure event");
        }
        if let Some(state) = failure_state
            && let Err(e) = self.registry.update_state(self.run_id, state).await
        {
            tracing::warn!(run_id = %self.run_id, error = %e, "Could not store failure state");
        }
        self.finish(RunStatus::Failed).await;
    }

    async fn finish(self, status: RunStatus) {
        match self.registry.set_status(self.run_id, status).await {
            Ok(()) => tracing::info!(run_id = %self.run_id, status = %status, "Run finished"),
            Err(e) => {
                tracing::error!(run_id = %self.run_id, error = %e, "Could not record terminal status")
            }
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentCatalog;

    #[test]
    fn panic_message_reads_common_payloads() {
        let s: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(s.as_ref()), "static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(owned.as_ref()), "owned");
        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn adapter_variant_follows_agent_kind() {
        let ctx = AdapterContext {
            registry: Arc::new(JobRegistry::new()),
            pool: WorkerPool::new(2),
            bridge: BridgeConfig::default(),
        };
        let catalog = AgentCatalog::with_builtin("echo-agent");

        for info in catalog.info() {
            let def = catalog.get(&info.key).unwrap();
            assert_eq!(adapter_for(&def.agent, &ctx).kind(), info.kind);
        }
    }

    #[tokio::test]
    async fn finisher_records_exactly_one_terminal_status() {
        let registry = Arc::new(JobRegistry::new());
        let id = Uuid::new_v4();
        registry.register(id, "t").await.unwrap();

        let run = RunFinisher::begin(Arc::clone(&registry), id).await;
        assert_eq!(registry.snapshot(id).await.unwrap().status, RunStatus::Running);

        run.fail(
            Some(Value::String("boom".into())),
            Some(ProgressEvent::error("boom")),
        )
        .await;

        let record = registry.snapshot(id).await.unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.current_state, Value::String("boom".into()));
        assert_eq!(record.status_updates.len(), 1);
    }
}
