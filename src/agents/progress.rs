//! Progress callback handed to blocking agents.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::error::BridgeError;
use crate::jobs::record::ProgressEvent;

const MIN_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(20);

/// Where emitted events go.
#[derive(Clone)]
enum Sink {
    /// Bounded channel drained by a coordinator task on the runtime.
    Bridge {
        tx: mpsc::Sender<ProgressEvent>,
        enqueue_timeout: Duration,
    },
    /// Events are discarded (synchronous invocations).
    Discard,
}

/// Plain callback a blocking agent uses to report progress.
///
/// Emitting never fails and never panics into the caller: an event that
/// cannot be enqueued within the timeout is logged and dropped. Waiting for
/// room blocks the calling thread, so call it from the thread running the
/// blocking call. From an async task it still works, but a full channel
/// stalls that runtime thread for up to the timeout.
#[derive(Clone)]
pub struct ProgressCallback {
    run_id: Option<Uuid>,
    sink: Sink,
    dropped: Arc<AtomicUsize>,
}

impl ProgressCallback {
    /// Callback feeding a bridge channel owned by `run_id`'s coordinator.
    pub(crate) fn bridged(
        run_id: Uuid,
        tx: mpsc::Sender<ProgressEvent>,
        enqueue_timeout: Duration,
    ) -> Self {
        Self {
            run_id: Some(run_id),
            sink: Sink::Bridge { tx, enqueue_timeout },
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Callback that ignores every event.
    pub fn discard() -> Self {
        Self {
            run_id: None,
            sink: Sink::Discard,
            dropped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Report a phase label without payload.
    pub fn step(&self, description: impl Into<String>) {
        self.emit(ProgressEvent::new(description));
    }

    /// Report a phase label with a payload that also becomes the current state.
    pub fn report<T: Serialize + Debug>(&self, description: impl Into<String>, payload: &T) {
        self.emit(ProgressEvent::with_payload(description, payload));
    }

    /// Hand an event to the coordinator.
    pub fn emit(&self, event: ProgressEvent) {
        if let Err(e) = self.try_enqueue(event) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            match self.run_id {
                Some(run_id) => tracing::warn!(run_id = %run_id, error = %e, "Dropped progress event"),
                None => tracing::warn!(error = %e, "Dropped progress event"),
            }
        }
    }

    /// Number of events dropped so far (shared by all clones).
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    fn try_enqueue(&self, event: ProgressEvent) -> Result<(), BridgeError> {
        let Sink::Bridge { tx, enqueue_timeout } = &self.sink else {
            return Ok(());
        };

        // Channel saturated: retry with backoff until the coordinator makes
        // room or the timeout passes. Plain thread sleeps, so this is safe
        // from any thread, inside the runtime or not.
        let deadline = Instant::now() + *enqueue_timeout;
        let mut backoff = MIN_BACKOFF;
        let mut event = event;
        loop {
            match tx.try_send(event) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => return Err(BridgeError::Closed),
                Err(TrySendError::Full(returned)) => event = returned,
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BridgeError::Timeout {
                    timeout: *enqueue_timeout,
                });
            }
            std::thread::sleep(backoff.min(deadline - now));
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

impl Debug for ProgressCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sink = match self.sink {
            Sink::Bridge { .. } => "bridge",
            Sink::Discard => "discard",
        };
        f.debug_struct("ProgressCallback")
            .field("run_id", &self.run_id)
            .field("sink", &sink)
            .field("dropped", &self.dropped())
            .finish()
    }
}
