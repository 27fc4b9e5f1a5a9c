//! Elastic pool of engine workers.
//!
//! A `WorkerPool` keeps between `min_idle` and `max_idle` warm workers, grows
//! on demand up to `max_total`, and hands workers out as exclusive [`Lease`]s.
//! Each worker is a dedicated OS thread owning one engine instance.
//!
//! # Key Features
//!
//! - **Bounded**: idle + leased + in-flight workers never exceed `max_total`
//! - **Fair**: blocked acquirers are served strictly in arrival order
//! - **Hard deadlines**: an acquire past its timeout never receives a worker
//! - **Clean recycling**: engine state is torn down before a worker is reused
//! - **Self-maintaining**: a background loop trims excess idle workers and
//!   restores the warm floor
//!
//! # Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use prometheus_render_pool::config::WorkerPoolConfig;
//! use prometheus_render_pool::core::WorkerPool;
//! use prometheus_render_pool::engine::{synthetic::{self, SyntheticEngine}, AlwaysPause};
//!
//! let pool = WorkerPool::new(
//!     WorkerPoolConfig::new().with_min_idle(1).with_max_idle(2).with_max_total(4),
//!     SyntheticEngine::default(),
//! )?;
//!
//! let mut lease = pool.acquire(Duration::from_secs(30))?;
//! lease.open_document(synthetic::document(2))?;
//! let page = lease.render_page(0, 72, AlwaysPause)?;
//! lease.close()?;
//! pool.close()?;
//! ```
//!
//! [`Lease`]: crate::core::Lease

mod native;
mod worker;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use native::{MaintenanceReport, WorkerPool};
pub(crate) use native::PoolShared;
pub(crate) use worker::Worker;

/// Identifier of a worker, unique within one pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Identifier of a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl LeaseId {
    /// Fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of pool occupancy and lifetime counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Workers waiting in the idle set.
    pub idle: usize,

    /// Workers held by leases.
    pub leased: usize,

    /// Workers being started.
    pub creating: usize,

    /// Workers being torn down.
    pub draining: usize,

    /// Callers blocked in `acquire`.
    pub waiting: usize,

    /// Configured cap (`None` when unbounded).
    pub max_total: Option<usize>,

    /// Workers successfully started over the pool's life.
    pub workers_created: u64,

    /// Workers torn down over the pool's life.
    pub workers_destroyed: u64,

    /// Worker starts that failed.
    pub creation_failures: u64,

    /// Leases granted.
    pub acquisitions: u64,

    /// Leases granted after the caller had to wait.
    pub contended_acquisitions: u64,

    /// Acquires that hit their deadline.
    pub acquire_timeouts: u64,

    /// Leases returned.
    pub releases: u64,
}

impl PoolStats {
    /// Idle plus leased workers.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.idle + self.leased
    }
}

/// Lifetime counters (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub workers_created: AtomicU64,
    pub workers_destroyed: AtomicU64,
    pub creation_failures: AtomicU64,
    pub acquisitions: AtomicU64,
    pub contended_acquisitions: AtomicU64,
    pub acquire_timeouts: AtomicU64,
    pub releases: AtomicU64,
}

impl PoolCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters into `stats`.
    pub fn fill(&self, stats: &mut PoolStats) {
        stats.workers_created = self.workers_created.load(Ordering::Relaxed);
        stats.workers_destroyed = self.workers_destroyed.load(Ordering::Relaxed);
        stats.creation_failures = self.creation_failures.load(Ordering::Relaxed);
        stats.acquisitions = self.acquisitions.load(Ordering::Relaxed);
        stats.contended_acquisitions = self.contended_acquisitions.load(Ordering::Relaxed);
        stats.acquire_timeouts = self.acquire_timeouts.load(Ordering::Relaxed);
        stats.releases = self.releases.load(Ordering::Relaxed);
    }
}
