//! Agent contracts.
//!
//! The service does not care how an agent reasons. It only knows two shapes:
//! - `StreamingAgent`: a lazy sequence of full state snapshots, advanced on
//!   the runtime and suspending at I/O.
//! - `BlockingAgent`: one opaque synchronous call reporting progress through
//!   a `ProgressCallback` from whatever thread runs it.

pub mod builtin;
pub mod catalog;
pub mod progress;

pub use catalog::{AgentCatalog, AgentDefinition, AgentInfo};
pub use progress::ProgressCallback;

use std::sync::Arc;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExecutionError;

/// Sequence of state snapshots produced by a streaming agent.
pub type StateStream = BoxStream<'static, Result<Value, ExecutionError>>;

/// Agent expressed as a restartable sequence of state snapshots.
pub trait StreamingAgent: Send + Sync {
    /// Start producing snapshots for `input`. Each item replaces the
    /// previous state in full.
    fn stream(&self, input: Value) -> StateStream;
}

/// Agent expressed as one long-running synchronous call.
pub trait BlockingAgent: Send + Sync {
    /// Run to completion, reporting progress through `progress`.
    fn run(&self, input: Value, progress: &ProgressCallback) -> Result<Value, ExecutionError>;
}

/// Execution style of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Streaming,
    Blocking,
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Streaming => "streaming",
            Self::Blocking => "blocking",
        };
        write!(f, "{s}")
    }
}

/// An agent implementation tagged with its execution style.
#[derive(Clone)]
pub enum Agent {
    Streaming(Arc<dyn StreamingAgent>),
    Blocking(Arc<dyn BlockingAgent>),
}

impl Agent {
    pub fn kind(&self) -> AgentKind {
        match self {
            Self::Streaming(_) => AgentKind::Streaming,
            Self::Blocking(_) => AgentKind::Blocking,
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Agent({})", self.kind())
    }
}
