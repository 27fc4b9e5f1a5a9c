//! Worker pool, leases, render sessions and their error and event types.

pub mod diagnostics;
pub mod error;
pub mod lease;
pub mod render;
pub mod worker_pool;

pub use diagnostics::{CreateReason, DestroyReason, PoolEvent, PoolEventKind};
pub use error::{AppResult, PoolError};
pub use lease::{Lease, RenderedPage};
pub use render::{RenderSession, RenderState};
pub use worker_pool::{LeaseId, MaintenanceReport, PoolStats, WorkerId, WorkerPool};
