//! # Prometheus Render Pool
//!
//! A bounded, self-maintaining pool of document render workers.
//!
//! Rendering engines are expensive to start and not safe to share between
//! threads. This library keeps a small set of warm engine instances, each owned
//! by a dedicated OS thread, and hands them out to callers as exclusive
//! leases.
//!
//! ## Key Features
//!
//! - **Bounded Capacity**: never more than `max_total` workers alive, with
//!   blocked acquirers served in arrival order under a hard deadline
//! - **Warm Floor**: `min_idle` workers are pre-warmed and restored by a
//!   background maintenance loop, which also trims idle workers above
//!   `max_idle`
//! - **Leak-Free Leases**: every document, page, bitmap and render a lease
//!   opens is torn down before the worker is reused
//! - **Incremental Rendering**: a `RenderSession` state machine drives
//!   start/pause/continue renders with a caller-supplied pause policy
//! - **Observable**: structured `tracing` logs, `PoolStats` snapshots and a
//!   diagnostics event channel
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use prometheus_render_pool::config::WorkerPoolConfig;
//! use prometheus_render_pool::core::WorkerPool;
//! use prometheus_render_pool::engine::{synthetic::{self, SyntheticEngine}, NeverPause};
//!
//! let pool = WorkerPool::new(
//!     WorkerPoolConfig::new()
//!         .with_min_idle(1)
//!         .with_max_idle(2)
//!         .with_max_total(4),
//!     SyntheticEngine::default(),
//! )?;
//!
//! let mut lease = pool.acquire(Duration::from_secs(30))?;
//! lease.open_document(synthetic::document(3))?;
//! let rendered = lease.render_page(0, 150, NeverPause)?;
//! assert_eq!(Some(rendered.pixels.len()), rendered.info.buffer_len());
//! lease.close()?;
//! pool.close()?;
//! ```
//!
//! For complete examples, see:
//! - `tests/worker_pool_test.rs` - capacity, fairness and recycling
//! - `demos/concurrent_render.rs` - many callers sharing one pool

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Worker pool, leases and render sessions.
pub mod core;
/// Configuration models for render pools.
pub mod config;
/// Builders to construct pools from configuration.
pub mod builders;
/// Engine binding traits and the synthetic reference engine.
pub mod engine;
/// Shared utilities.
pub mod util;
