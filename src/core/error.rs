//! Error types for pool, lease and render operations.

use std::time::Duration;

use thiserror::Error;

use crate::core::render::RenderState;
use crate::core::worker_pool::{LeaseId, WorkerId};
use crate::engine::{DocumentHandle, EngineError, PageHandle};

/// Errors produced by the worker pool and its leases.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No worker became available before the acquire deadline.
    #[error("capacity timeout: no worker available after {waited:?} (max_total {max_total})")]
    CapacityTimeout {
        /// Time spent waiting.
        waited: Duration,
        /// Configured cap, `usize::MAX` when unbounded.
        max_total: usize,
    },

    /// The pool has been closed.
    #[error("pool closed")]
    PoolClosed,

    /// A new engine instance could not be started.
    #[error("worker creation failed: {source}")]
    WorkerCreationFailed {
        /// Engine error reported by the binding.
        #[source]
        source: EngineError,
    },

    /// The engine rejected the document bytes.
    #[error("document load failed on {worker}: {source}")]
    DocumentLoadFailed {
        /// Worker that attempted the load.
        worker: WorkerId,
        /// Engine error.
        #[source]
        source: EngineError,
    },

    /// A document is already open on this lease.
    #[error("{operation}: {document} is already open on {worker}")]
    DocumentAlreadyOpen {
        /// Operation name.
        operation: &'static str,
        /// Worker holding the document.
        worker: WorkerId,
        /// Currently open document.
        document: DocumentHandle,
    },

    /// The operation needs an open document.
    #[error("{operation}: no active document")]
    NoActiveDocument {
        /// Operation name.
        operation: &'static str,
    },

    /// The lease was already released.
    #[error("{operation}: lease {lease} closed")]
    LeaseClosed {
        /// Operation name.
        operation: &'static str,
        /// Lease identifier.
        lease: LeaseId,
    },

    /// A handle does not belong to this lease's open document.
    #[error("{operation}: unknown handle {handle}")]
    UnknownHandle {
        /// Operation name.
        operation: &'static str,
        /// Handle as displayed (`page#3`, `bitmap#9`, ...).
        handle: String,
    },

    /// Operation invoked outside its valid state.
    #[error("{operation}: invalid in state {state:?}")]
    InvalidState {
        /// Operation name.
        operation: &'static str,
        /// State the render session was in.
        state: RenderState,
    },

    /// The engine reported a render failure.
    #[error("render failed for {page} on {worker}")]
    RenderFailed {
        /// Worker that ran the render.
        worker: WorkerId,
        /// Page being rendered.
        page: PageHandle,
    },

    /// The worker was torn down while the lease still referenced it.
    #[error("{operation}: {worker} destroyed")]
    WorkerDestroyed {
        /// Operation name.
        operation: &'static str,
        /// Destroyed worker.
        worker: WorkerId,
    },

    /// Engine call failed.
    #[error("{operation} on {worker}: {source}")]
    Engine {
        /// Operation name.
        operation: &'static str,
        /// Worker that ran the call.
        worker: WorkerId,
        /// Engine error.
        #[source]
        source: EngineError,
    },

    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Some worker threads panicked during teardown.
    #[error("shutdown incomplete: {panicked} worker thread(s) panicked")]
    ShutdownIncomplete {
        /// Number of panicked workers.
        panicked: usize,
    },
}

impl PoolError {
    /// `true` for errors caused by pool capacity or shutdown rather than by
    /// the document being processed.
    #[must_use]
    pub const fn is_capacity_error(&self) -> bool {
        matches!(self, Self::CapacityTimeout { .. } | Self::PoolClosed)
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
