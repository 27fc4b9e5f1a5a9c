//! Pool lifecycle events.
//!
//! The pool publishes [`PoolEvent`]s on a bounded channel. Background
//! maintenance has no caller to return errors to, so this channel is where its
//! failures become observable. When the channel is full the oldest event is
//! evicted so recent events always get through, and the pool never blocks.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::core::worker_pool::{LeaseId, WorkerId};
use crate::util::clock::now_ms;

/// Why a worker was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateReason {
    /// Pre-warmed during pool construction.
    Prewarm,
    /// Created to serve an acquire.
    Demand,
    /// Created by maintenance to restore `min_idle`.
    Maintenance,
}

/// Why a worker was destroyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyReason {
    /// Idle count exceeded `max_idle`.
    ExcessIdle,
    /// Cleanup failed or the engine thread died; not safe to recycle.
    Unhealthy,
    /// Pool shutdown.
    Shutdown,
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PoolEventKind {
    /// A worker came up.
    WorkerCreated {
        /// New worker.
        worker: WorkerId,
        /// Trigger.
        reason: CreateReason,
    },
    /// Starting a worker failed.
    WorkerCreationFailed {
        /// Trigger.
        reason: CreateReason,
        /// Rendered engine error.
        error: String,
    },
    /// A worker was torn down.
    WorkerDestroyed {
        /// Destroyed worker.
        worker: WorkerId,
        /// Trigger.
        reason: DestroyReason,
    },
    /// An acquire gave up.
    AcquireTimedOut {
        /// Milliseconds waited.
        waited_ms: u64,
    },
    /// A lease returned its worker.
    LeaseReleased {
        /// Released lease.
        lease: LeaseId,
        /// Its worker.
        worker: WorkerId,
        /// Whether the worker went back to the idle set.
        recycled: bool,
    },
}

/// Timestamped pool event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolEvent {
    /// Milliseconds since the Unix epoch.
    pub created_at_ms: u64,
    /// Event payload.
    #[serde(flatten)]
    pub kind: PoolEventKind,
}

/// Sending half plus a receiver template handed out to subscribers.
pub(crate) struct Diagnostics {
    tx: Sender<PoolEvent>,
    rx: Receiver<PoolEvent>,
}

impl Diagnostics {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    pub(crate) fn subscribe(&self) -> Receiver<PoolEvent> {
        self.rx.clone()
    }

    pub(crate) fn emit(&self, kind: PoolEventKind) {
        let event = PoolEvent {
            created_at_ms: u64::try_from(now_ms()).unwrap_or(u64::MAX),
            kind,
        };
        let mut pending = event;
        loop {
            match self.tx.try_send(pending) {
                Err(TrySendError::Full(event)) => {
                    if let Ok(evicted) = self.rx.try_recv() {
                        trace!(?evicted, "Diagnostics channel full, evicting oldest event");
                    }
                    pending = event;
                }
                Ok(()) | Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}
