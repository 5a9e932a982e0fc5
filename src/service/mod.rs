//! Run service: the operations exposed over HTTP.
//!
//! - `start_run`: register a run and launch it in the background
//! - `run_status`: copy of a run's record
//! - `stream_run`: foreground SSE execution, no registry involvement
//! - `invoke_run`: foreground execution returning only the final value
//! - `list_logs` / `read_log`: the service's own log files

pub mod auth;
pub mod logs;
pub mod routes;

pub use routes::router;

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::adapters::event_stream::next_state;
use crate::adapters::{AdapterContext, AgentAdapter, WorkerPool, adapter_for};
use crate::agents::{Agent, AgentCatalog, AgentDefinition, AgentInfo, AgentKind, ProgressCallback};
use crate::config::ServiceConfig;
use crate::error::{RequestError, Result};
use crate::jobs::{JobRegistry, RunStatus, RunStatusView, SnapshotReader};
use crate::sse::{SseFrame, SseMultiplexer};
use logs::{LogDirectory, LogFile, LogListing};

/// Request body shared by start, stream and invoke.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInput {
    /// Free-text message, passed to the agent as `messages`.
    #[serde(default)]
    pub message: Option<String>,
    /// Full agent input. Takes precedence over `message`.
    #[serde(default)]
    pub state: Option<Value>,
    /// Correlation ID. Generated when absent.
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl UserInput {
    /// Input value handed to the agent.
    pub fn agent_input(&self) -> std::result::Result<Value, RequestError> {
        if let Some(state) = &self.state {
            return Ok(state.clone());
        }
        let Some(message) = &self.message else {
            return Err(RequestError::MalformedInput(
                "either `message` or `state` is required".to_string(),
            ));
        };
        let mut input = Map::new();
        input.insert("messages".to_string(), Value::String(message.clone()));
        if let Some(model) = &self.model {
            input.insert("model".to_string(), Value::String(model.clone()));
        }
        Ok(Value::Object(input))
    }

    /// Caller's thread ID, or a fresh one.
    pub fn thread_id(&self) -> String {
        self.thread_id
            .clone()
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

/// Answer to a start request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartResponse {
    pub run_id: Uuid,
    pub thread_id: String,
    pub status: RunStatus,
    pub agent_kind: AgentKind,
}

/// Answer to an invoke request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvokeResponse {
    pub thread_id: String,
    pub agent_kind: AgentKind,
    pub output: Value,
}

/// Listing returned by `/info`.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub agents: Vec<AgentInfo>,
    pub default_agent: String,
}

/// Shared service state.
pub struct RunService {
    registry: Arc<JobRegistry>,
    reader: SnapshotReader,
    catalog: AgentCatalog,
    adapters: HashMap<String, Arc<dyn AgentAdapter>>,
    pool: WorkerPool,
    logs: LogDirectory,
}

impl RunService {
    /// Build the service over `catalog`, with a fresh registry and worker
    /// pool sized from `config`.
    pub fn new(catalog: AgentCatalog, config: &ServiceConfig) -> Self {
        let registry = Arc::new(JobRegistry::new());
        let pool = WorkerPool::new(config.worker_threads);
        let ctx = AdapterContext {
            registry: Arc::clone(&registry),
            pool: pool.clone(),
            bridge: config.bridge.clone(),
        };

        let adapters = catalog
            .info()
            .into_iter()
            .filter_map(|info| {
                let def = catalog.get(&info.key).ok()?;
                Some((info.key, adapter_for(&def.agent, &ctx)))
            })
            .collect();

        Self {
            reader: SnapshotReader::new(Arc::clone(&registry)),
            registry,
            catalog,
            adapters,
            pool,
            logs: LogDirectory::new(config.log_dir.as_ref().map(Into::into)),
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    /// Stop accepting blocking work. Calls already on the pool finish.
    pub fn shutdown(&self) {
        self.pool.close();
        tracing::info!("Worker pool closed");
    }

    pub async fn list_logs(&self) -> Result<LogListing> {
        self.logs.list().await
    }

    pub async fn read_log(&self, filename: &str) -> Result<LogFile> {
        self.logs.read(filename).await
    }

    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            agents: self.catalog.info(),
            default_agent: self.catalog.default_key().to_string(),
        }
    }

    fn resolve(&self, agent_id: Option<&str>) -> std::result::Result<&AgentDefinition, RequestError> {
        self.catalog
            .get(agent_id.unwrap_or_else(|| self.catalog.default_key()))
    }

    /// Register a run and launch it in the background. Returns as soon as
    /// the run exists; only bad requests fail here.
    pub async fn start_run(&self, agent_id: Option<&str>, request: &UserInput) -> Result<StartResponse> {
        let def = self.resolve(agent_id)?;
        let adapter = self
            .adapters
            .get(&def.key)
            .cloned()
            .ok_or_else(|| RequestError::UnknownAgent {
                key: def.key.clone(),
            })?;
        let input = request.agent_input()?;
        let thread_id = request.thread_id();

        let run_id = Uuid::new_v4();
        self.registry.register(run_id, thread_id.clone()).await?;
        tracing::info!(run_id = %run_id, agent = %def.key, thread_id = %thread_id, "Run started");

        // Detached; the run reports through the registry.
        drop(adapter.start(run_id, input));

        Ok(StartResponse {
            run_id,
            thread_id,
            status: RunStatus::Started,
            agent_kind: adapter.kind(),
        })
    }

    /// Current view of a run.
    pub async fn run_status(&self, run_id: Uuid) -> Result<RunStatusView> {
        Ok(self.reader.snapshot(run_id).await?)
    }

    /// Frames for a foreground streaming run.
    pub fn stream_run(
        &self,
        agent_id: Option<&str>,
        request: &UserInput,
    ) -> Result<BoxStream<'static, SseFrame>> {
        let def = self.resolve(agent_id)?;
        let Agent::Streaming(agent) = &def.agent else {
            return Err(RequestError::MalformedInput(format!(
                "agent {} does not support streaming",
                def.key
            ))
            .into());
        };
        let input = request.agent_input()?;
        tracing::info!(agent = %def.key, "Streaming run");
        Ok(SseMultiplexer::new(Arc::clone(agent)).frames(input))
    }

    /// Run to completion in the foreground and return the final value.
    ///
    /// A streaming agent's final value is its last snapshot. Progress of a
    /// blocking agent is discarded.
    pub async fn invoke_run(&self, agent_id: Option<&str>, request: &UserInput) -> Result<InvokeResponse> {
        let def = self.resolve(agent_id)?;
        let input = request.agent_input()?;
        let thread_id = request.thread_id();
        tracing::info!(agent = %def.key, thread_id = %thread_id, "Invoking agent");

        let output = match &def.agent {
            Agent::Streaming(agent) => {
                let mut states = agent.stream(input);
                let mut last = Value::Null;
                while let Some(item) = next_state(&mut states).await {
                    last = item?;
                }
                last
            }
            Agent::Blocking(agent) => {
                let agent = Arc::clone(agent);
                self.pool
                    .run(move || agent.run(input, &ProgressCallback::discard()))
                    .await
                    .and_then(|result| result)?
            }
        };

        Ok(InvokeResponse {
            thread_id,
            agent_kind: def.agent.kind(),
            output,
        })
    }
}

impl std::fmt::Debug for RunService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunService")
            .field("agents", &self.catalog.len())
            .field("pool", &self.pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ExecutionError, RunError};
    use futures::StreamExt;
    use serde_json::json;
    use std::time::Duration;

    fn service() -> RunService {
        RunService::new(AgentCatalog::with_builtin("echo-agent"), &ServiceConfig::default())
    }

    fn state(value: Value) -> UserInput {
        UserInput {
            state: Some(value),
            ..Default::default()
        }
    }

    async fn wait_terminal(service: &RunService, run_id: Uuid) -> RunStatusView {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let view = service.run_status(run_id).await.unwrap();
                if view.status.is_terminal() {
                    return view;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    #[test]
    fn message_becomes_messages_input() {
        let input = UserInput {
            message: Some("hi there".into()),
            model: Some("small".into()),
            ..Default::default()
        };
        assert_eq!(
            input.agent_input().unwrap(),
            json!({"messages": "hi there", "model": "small"})
        );
    }

    #[test]
    fn state_wins_over_message() {
        let input = UserInput {
            message: Some("ignored".into()),
            state: Some(json!({"steps": 1})),
            ..Default::default()
        };
        assert_eq!(input.agent_input().unwrap(), json!({"steps": 1}));
    }

    #[test]
    fn empty_input_is_malformed() {
        assert!(matches!(
            UserInput::default().agent_input(),
            Err(RequestError::MalformedInput(_))
        ));
    }

    #[test]
    fn thread_id_is_kept_or_generated() {
        let given = UserInput {
            thread_id: Some("t-1".into()),
            ..Default::default()
        };
        assert_eq!(given.thread_id(), "t-1");
        assert!(Uuid::parse_str(&UserInput::default().thread_id()).is_ok());
    }

    #[tokio::test]
    async fn streaming_run_completes_in_background() {
        let service = service();
        let started = service
            .start_run(None, &state(json!({"messages": "one two three", "delay_ms": 1})))
            .await
            .unwrap();
        assert_eq!(started.status, RunStatus::Started);
        assert_eq!(started.agent_kind, AgentKind::Streaming);

        let view = wait_terminal(&service, started.run_id).await;
        assert_eq!(view.status, RunStatus::Completed);
        assert_eq!(view.current_state["words"], json!(["one", "two", "three"]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_run_collects_progress() {
        let service = service();
        let started = service
            .start_run(
                Some("batch-agent"),
                &state(json!({"steps": 3, "delay_ms": 1})),
            )
            .await
            .unwrap();
        assert_eq!(started.agent_kind, AgentKind::Blocking);

        let view = wait_terminal(&service, started.run_id).await;
        assert_eq!(view.status, RunStatus::Completed);
        assert_eq!(view.status_updates.len(), 3);
        assert_eq!(view.current_state, json!({"completed_steps": 3}));
    }

    #[tokio::test]
    async fn unknown_agent_is_rejected_synchronously() {
        let err = service()
            .start_run(Some("ghost"), &state(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Request(RequestError::UnknownAgent { ref key }) if key == "ghost"
        ));
    }

    #[tokio::test]
    async fn unknown_run_is_not_found() {
        let id = Uuid::new_v4();
        let err = service().run_status(id).await.unwrap_err();
        assert!(matches!(err, Error::Run(RunError::NotFound { id: missing }) if missing == id));
    }

    #[tokio::test]
    async fn stream_run_rejects_blocking_agents() {
        let Err(err) = service().stream_run(Some("batch-agent"), &state(json!({}))) else {
            panic!("blocking agent must not stream");
        };
        assert!(matches!(err, Error::Request(RequestError::MalformedInput(_))));
    }

    #[tokio::test]
    async fn stream_run_frames_end_with_sentinel() {
        let frames: Vec<SseFrame> = service()
            .stream_run(None, &state(json!({"messages": "a b", "delay_ms": 1})))
            .unwrap()
            .collect()
            .await;
        assert_eq!(frames.len(), 3);
        assert!(frames[2].is_done());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invoke_returns_final_value() {
        let service = service();

        let echoed = service
            .invoke_run(None, &state(json!({"messages": "x y", "delay_ms": 1})))
            .await
            .unwrap();
        assert_eq!(echoed.output["words"], json!(["x", "y"]));

        let batch = service
            .invoke_run(Some("batch-agent"), &state(json!({"steps": 2, "delay_ms": 1})))
            .await
            .unwrap();
        assert_eq!(batch.output, json!({"completed_steps": 2}));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_rejects_new_blocking_work() {
        let service = service();
        service.shutdown();

        let err = service
            .invoke_run(Some("batch-agent"), &state(json!({"steps": 1, "delay_ms": 1})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Execution(ExecutionError::WorkerPoolClosed)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invoke_surfaces_agent_failure() {
        let err = service()
            .invoke_run(
                Some("batch-agent"),
                &state(json!({"steps": 2, "delay_ms": 1, "fail_at": 2})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Execution(ExecutionError::Failed(_))));
    }
}
