//! Adapter for blocking agents that report progress through a callback.
//!
//! Per run:
//! 1. a bounded mpsc channel carries `ProgressEvent`s from the worker thread,
//! 2. a coordinator task on the runtime applies them to the registry,
//! 3. the agent call runs on the `WorkerPool`,
//! 4. once the call returns, the coordinator drains what is queued (bounded
//!    by the drain deadline) and only then is the terminal status written.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use super::{AgentAdapter, RunFinisher, WorkerPool};
use crate::agents::{AgentKind, BlockingAgent, ProgressCallback};
use crate::config::BridgeConfig;
use crate::jobs::{JobRegistry, ProgressEvent};

/// Runs a `BlockingAgent` on the worker pool and bridges its progress
/// callback back into the registry.
pub struct CallbackBridgeAdapter {
    agent: Arc<dyn BlockingAgent>,
    registry: Arc<JobRegistry>,
    pool: WorkerPool,
    config: BridgeConfig,
}

impl CallbackBridgeAdapter {
    pub fn new(
        agent: Arc<dyn BlockingAgent>,
        registry: Arc<JobRegistry>,
        pool: WorkerPool,
        config: BridgeConfig,
    ) -> Self {
        Self {
            agent,
            registry,
            pool,
            config,
        }
    }
}

impl AgentAdapter for CallbackBridgeAdapter {
    fn kind(&self) -> AgentKind {
        AgentKind::Blocking
    }

    fn start(&self, run_id: Uuid, input: Value) -> JoinHandle<()> {
        let agent = Arc::clone(&self.agent);
        let registry = Arc::clone(&self.registry);
        let pool = self.pool.clone();
        let config = self.config.clone();
        tokio::spawn(bridge_run(run_id, agent, registry, pool, config, input))
    }
}

async fn bridge_run(
    run_id: Uuid,
    agent: Arc<dyn BlockingAgent>,
    registry: Arc<JobRegistry>,
    pool: WorkerPool,
    config: BridgeConfig,
    input: Value,
) {
    let run = RunFinisher::begin(Arc::clone(&registry), run_id).await;

    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let (stop_tx, stop_rx) = oneshot::channel();
    let coordinator = tokio::spawn(coordinate(
        run_id,
        Arc::clone(&registry),
        rx,
        stop_rx,
        config.poll_interval,
        config.drain_deadline,
    ));

    let callback = ProgressCallback::bridged(run_id, tx, config.enqueue_timeout);
    let outcome = pool
        .run(move || {
            let result = agent.run(input, &callback);
            (result, callback.dropped())
        })
        .await;
    let (result, dropped) = match outcome {
        Ok((result, dropped)) => (result, dropped),
        Err(e) => (Err(e), 0),
    };

    // The coordinator may already have exited if every sender is gone.
    let _ = stop_tx.send(());
    let report = match coordinator.await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "Bridge coordinator crashed");
            CoordinatorReport::default()
        }
    };
    tracing::debug!(
        run_id = %run_id,
        applied = report.applied,
        dropped,
        discarded = report.discarded,
        "Bridge drained"
    );

    match result {
        Ok(value) => run.complete(Some(value)).await,
        Err(e) => {
            tracing::error!(run_id = %run_id, error = %e, "Blocking agent failed");
            run.fail(Some(Value::String(e.to_string())), None).await;
        }
    }
}

/// What a coordinator did before it stopped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CoordinatorReport {
    /// Events appended to the record.
    pub applied: usize,
    /// Events still queued when the drain deadline passed.
    pub discarded: usize,
}

/// Consume bridged events until told to stop, then drain the backlog.
///
/// Waits on the channel in `poll_interval` slices so the stop signal is
/// noticed even when no events arrive. After the stop signal the channel is
/// closed, so later enqueues fail fast, and the queued events are applied
/// until `drain_deadline` elapses.
pub(crate) async fn coordinate(
    run_id: Uuid,
    registry: Arc<JobRegistry>,
    mut rx: mpsc::Receiver<ProgressEvent>,
    mut stop: oneshot::Receiver<()>,
    poll_interval: Duration,
    drain_deadline: Duration,
) -> CoordinatorReport {
    let mut report = CoordinatorReport::default();

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            polled = tokio::time::timeout(poll_interval, rx.recv()) => match polled {
                Ok(Some(event)) => {
                    if apply(run_id, &registry, event).await {
                        report.applied += 1;
                    }
                }
                // Every producer is gone and nothing is buffered.
                Ok(None) => return report,
                Err(_) => tracing::trace!(run_id = %run_id, "No bridged events this poll"),
            }
        }
    }

    rx.close();
    let deadline = Instant::now() + drain_deadline;
    while let Ok(event) = rx.try_recv() {
        if Instant::now() >= deadline {
            report.discarded += 1;
            while rx.try_recv().is_ok() {
                report.discarded += 1;
            }
            tracing::warn!(
                run_id = %run_id,
                discarded = report.discarded,
                "Drain deadline passed, discarding remaining events"
            );
            break;
        }
        if apply(run_id, &registry, event).await {
            report.applied += 1;
        }
    }

    report
}

async fn apply(run_id: Uuid, registry: &JobRegistry, event: ProgressEvent) -> bool {
    let state = event.output.clone();
    tracing::debug!(run_id = %run_id, description = %event.description, "Applying bridged event");

    if let Err(e) = registry.append_event(run_id, event).await {
        tracing::warn!(run_id = %run_id, error = %e, "Could not append bridged event");
        return false;
    }
    if let Some(state) = state
        && let Err(e) = registry.update_state(run_id, state).await
    {
        tracing::warn!(run_id = %run_id, error = %e, "Could not apply bridged state");
    }
    true
}
