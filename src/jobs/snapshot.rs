//! Copy-then-release read access to run records.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::RunError;
use crate::jobs::record::{JobRecord, ProgressEvent};
use crate::jobs::registry::JobRegistry;
use crate::jobs::state::RunStatus;

/// Status response for one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatusView {
    pub run_id: Uuid,
    pub thread_id: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub current_state: Value,
    pub status_updates: Vec<ProgressEvent>,
    /// Milliseconds between start and last update.
    pub elapsed_ms: i64,
}

impl From<JobRecord> for RunStatusView {
    fn from(record: JobRecord) -> Self {
        let elapsed_ms = (record.last_update - record.start_time)
            .num_milliseconds()
            .max(0);
        Self {
            run_id: record.run_id,
            thread_id: record.thread_id,
            status: record.status,
            start_time: record.start_time,
            last_update: record.last_update,
            current_state: record.current_state,
            status_updates: record.status_updates,
            elapsed_ms,
        }
    }
}

/// Read-only accessor over the registry.
///
/// The registry lock is held only while the record is cloned; building the
/// view happens after it is released, so a slow reader never stalls writers.
#[derive(Clone)]
pub struct SnapshotReader {
    registry: Arc<JobRegistry>,
}

impl SnapshotReader {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    /// Point-in-time view of a run.
    pub async fn snapshot(&self, run_id: Uuid) -> Result<RunStatusView, RunError> {
        let record = self.registry.snapshot(run_id).await?;
        tracing::trace!(run_id = %run_id, updates = record.status_updates.len(), "Run snapshot copied");
        Ok(RunStatusView::from(record))
    }
}
