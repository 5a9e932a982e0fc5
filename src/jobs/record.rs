//! Per-run record and progress events.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::SerializationError;
use crate::jobs::state::RunStatus;

/// One progress report from a running agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// When the event was produced.
    pub timestamp: DateTime<Utc>,
    /// Phase label.
    pub description: String,
    /// Payload attached to the event. When present it also becomes the
    /// run's current state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl ProgressEvent {
    /// Event with a description only.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            description: description.into(),
            output: None,
        }
    }

    /// Event carrying a JSON payload.
    pub fn with_output(description: impl Into<String>, output: Value) -> Self {
        Self {
            output: Some(output),
            ..Self::new(description)
        }
    }

    /// Event carrying any serializable payload, rendered lossily.
    pub fn with_payload<T: Serialize + Debug>(description: impl Into<String>, payload: &T) -> Self {
        Self::with_output(description, to_value_lossy(payload))
    }

    /// Event recording an execution failure.
    pub fn error(reason: impl std::fmt::Display) -> Self {
        Self::new(format!("error: {reason}"))
    }
}

/// Convert a payload to JSON, falling back to its `Debug` rendering.
pub fn to_value_lossy<T: Serialize + Debug>(payload: &T) -> Value {
    match serde_json::to_value(payload).map_err(SerializationError::from) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(error = %e, "Falling back to string rendering");
            Value::String(format!("{payload:?}"))
        }
    }
}

/// The mutable record tracked for one run.
///
/// Owned by `JobRegistry`; everything outside the registry holds clones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    /// Unique run ID.
    pub run_id: Uuid,
    /// Correlation (conversation thread) ID supplied by the caller.
    pub thread_id: String,
    /// Current status.
    pub status: RunStatus,
    /// When the run was registered.
    pub start_time: DateTime<Utc>,
    /// Last mutation time. Never decreases.
    pub last_update: DateTime<Utc>,
    /// Latest full state snapshot.
    pub current_state: Value,
    /// Progress events in emission order.
    pub status_updates: Vec<ProgressEvent>,
}

impl JobRecord {
    /// Create a record in the `Started` status.
    pub fn new(run_id: Uuid, thread_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            thread_id: thread_id.into(),
            status: RunStatus::Started,
            start_time: now,
            last_update: now,
            current_state: Value::Null,
            status_updates: Vec::new(),
        }
    }

    /// Bump `last_update`, keeping it monotonic under clock skew.
    pub(crate) fn touch(&mut self) {
        self.last_update = Utc::now().max(self.last_update);
    }
}
