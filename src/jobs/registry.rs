//! Job registry: the single shared store of run records.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::RunError;
use crate::jobs::record::{JobRecord, ProgressEvent};
use crate::jobs::state::RunStatus;

/// Concurrency-safe map from run ID to its record.
///
/// Every mutation goes through one of the methods below, each holding the
/// lock only for an in-memory update. The map itself is never handed out.
pub struct JobRegistry {
    records: RwLock<HashMap<Uuid, JobRecord>>,
}

impl JobRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Create a `Started` record. Fails if the run ID is already taken.
    pub async fn register(&self, run_id: Uuid, thread_id: impl Into<String>) -> Result<(), RunError> {
        let mut records = self.records.write().await;
        if records.contains_key(&run_id) {
            return Err(RunError::AlreadyExists { id: run_id });
        }
        records.insert(run_id, JobRecord::new(run_id, thread_id));
        Ok(())
    }

    /// Replace the current state wholesale.
    pub async fn update_state(&self, run_id: Uuid, state: Value) -> Result<(), RunError> {
        self.mutate(run_id, |record| record.current_state = state)
            .await
    }

    /// Append a progress event.
    pub async fn append_event(&self, run_id: Uuid, event: ProgressEvent) -> Result<(), RunError> {
        self.mutate(run_id, |record| record.status_updates.push(event))
            .await
    }

    /// Move the run forward in its state machine.
    pub async fn set_status(&self, run_id: Uuid, status: RunStatus) -> Result<(), RunError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&run_id)
            .ok_or(RunError::NotFound { id: run_id })?;

        if record.status.is_terminal() {
            return Err(RunError::Terminal {
                id: run_id,
                status: record.status,
            });
        }
        if !record.status.can_transition_to(status) {
            return Err(RunError::InvalidTransition {
                id: run_id,
                from: record.status,
                to: status,
            });
        }

        record.status = status;
        record.touch();
        Ok(())
    }

    /// Deep copy of one record.
    pub async fn snapshot(&self, run_id: Uuid) -> Result<JobRecord, RunError> {
        self.records
            .read()
            .await
            .get(&run_id)
            .cloned()
            .ok_or(RunError::NotFound { id: run_id })
    }

    /// Remove terminal runs whose last update is older than `ttl`.
    ///
    /// Returns the number of evicted runs.
    pub async fn evict_expired(&self, ttl: Duration) -> usize {
        // A TTL reaching past the representable range keeps everything.
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return 0;
        };

        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.status.is_active() || r.last_update > cutoff);
        before - records.len()
    }

    /// Counts by status.
    pub async fn summary(&self) -> RegistrySummary {
        let records = self.records.read().await;

        let mut summary = RegistrySummary::default();
        for record in records.values() {
            match record.status {
                RunStatus::Started => summary.started += 1,
                RunStatus::Running => summary.running += 1,
                RunStatus::Completed => summary.completed += 1,
                RunStatus::Failed => summary.failed += 1,
            }
        }

        summary.total = records.len();
        summary
    }

    async fn mutate<F>(&self, run_id: Uuid, f: F) -> Result<(), RunError>
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&run_id)
            .ok_or(RunError::NotFound { id: run_id })?;

        if record.status.is_terminal() {
            return Err(RunError::Terminal {
                id: run_id,
                status: record.status,
            });
        }

        f(record);
        record.touch();
        Ok(())
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run counts by status.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistrySummary {
    pub total: usize,
    pub started: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Spawn a background task that periodically evicts expired terminal runs.
pub fn spawn_retention_task(
    registry: Arc<JobRegistry>,
    interval: Duration,
    ttl: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = registry.evict_expired(ttl).await;
            if evicted > 0 {
                tracing::info!(evicted, "Evicted expired runs");
            }
        }
    })
}
