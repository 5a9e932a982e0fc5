//! Error types for the run service.

use std::time::Duration;

use uuid::Uuid;

use crate::jobs::state::RunStatus;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Job registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RunError {
    #[error("Run {id} not found")]
    NotFound { id: Uuid },

    #[error("Run {id} already exists")]
    AlreadyExists { id: Uuid },

    #[error("Run {id} is {from}, cannot transition to {to}")]
    InvalidTransition {
        id: Uuid,
        from: RunStatus,
        to: RunStatus,
    },

    #[error("Run {id} already reached terminal state {status}")]
    Terminal { id: Uuid, status: RunStatus },
}

/// Failure raised while an agent executes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("agent panicked: {0}")]
    Panicked(String),

    #[error("worker pool is shut down")]
    WorkerPoolClosed,
}

impl ExecutionError {
    /// Convenience constructor for agent implementations.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// A progress event could not be handed to the coordinator.
///
/// Only ever logged; a dropped event never fails its run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("bridge channel full, enqueue timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("bridge channel closed")]
    Closed,
}

/// A payload could not be converted to JSON.
#[derive(Debug, thiserror::Error)]
#[error("Payload not serializable: {0}")]
pub struct SerializationError(#[from] pub serde_json::Error);

/// Synchronous rejections of start/stream/invoke requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("Unknown agent: {key}")]
    UnknownAgent { key: String },

    #[error("Run {id} not found")]
    UnknownRun { id: String },

    #[error("Log file not found: {name}")]
    UnknownLogFile { name: String },

    #[error("Invalid log file name: {0}")]
    InvalidLogFile(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
