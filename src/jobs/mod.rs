//! Run tracking: records, state machine, registry, and snapshot reads.
//!
//! Core components:
//! - `state`: Run state machine (Started → Running → Completed/Failed)
//! - `record`: `JobRecord` and `ProgressEvent`
//! - `registry`: `JobRegistry`, the only shared mutable store
//! - `snapshot`: `SnapshotReader`, copy-then-release reads

pub mod record;
pub mod registry;
pub mod snapshot;
pub mod state;

pub use record::{JobRecord, ProgressEvent};
pub use registry::{JobRegistry, RegistrySummary};
pub use snapshot::{RunStatusView, SnapshotReader};
pub use state::RunStatus;
