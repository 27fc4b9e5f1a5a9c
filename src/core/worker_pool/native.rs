//! Native implementation of `WorkerPool` using one OS thread per worker.
//!
//! # Design Principles
//!
//! - **Single critical section**: every change to the idle/leased sets and the
//!   in-flight counters happens under one `parking_lot::Mutex`
//! - **No polling**: blocked acquirers sleep on a `Condvar`; the maintenance
//!   loop sleeps on a channel `recv_timeout`
//! - **Slow work outside the lock**: worker startup and teardown run with the
//!   lock released, reserved through the `creating`/`draining` counters so the
//!   capacity cap still holds

use std::collections::{HashMap, VecDeque};
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::diagnostics::{CreateReason, Diagnostics, DestroyReason, PoolEvent, PoolEventKind};
use crate::core::error::PoolError;
use crate::core::lease::Lease;
use crate::engine::{EngineBinding, EngineError};

use super::{LeaseId, PoolCounters, PoolStats, Worker, WorkerId};

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Excess idle workers destroyed.
    pub destroyed: usize,
    /// Idle workers created to restore `min_idle`.
    pub created: usize,
    /// Worker starts that failed (retried on the next pass).
    pub failed: usize,
}

struct IdleWorker<I> {
    worker: Worker<I>,
    since: Instant,
}

/// Everything guarded by the pool lock.
struct PoolState<I> {
    /// Oldest at the front; acquisition takes from the back.
    idle: VecDeque<IdleWorker<I>>,
    leased: HashMap<WorkerId, Worker<I>>,
    creating: usize,
    draining: usize,
    /// Tickets of blocked acquirers, in arrival order.
    waiters: VecDeque<u64>,
    next_ticket: u64,
    closed: bool,
}

impl<I> PoolState<I> {
    /// Workers that count against `max_total`.
    fn live(&self) -> usize {
        self.idle.len() + self.leased.len() + self.creating + self.draining
    }

    fn remove_waiter(&mut self, ticket: u64) {
        if let Some(pos) = self.waiters.iter().position(|t| *t == ticket) {
            self.waiters.remove(pos);
        }
    }
}

/// Pool internals shared with leases and the maintenance thread.
pub(crate) struct PoolShared<B: EngineBinding> {
    config: WorkerPoolConfig,
    binding: Arc<B>,
    state: Mutex<PoolState<B::Instance>>,
    /// Signalled whenever a worker may have become available or an in-flight
    /// creation/teardown finished.
    changed: Condvar,
    /// Serializes maintenance passes.
    maintenance: Mutex<()>,
    counters: PoolCounters,
    diagnostics: Diagnostics,
    next_worker_id: AtomicU64,
}

impl<B: EngineBinding> PoolShared<B> {
    fn new(config: WorkerPoolConfig, binding: B) -> Self {
        let diagnostics = Diagnostics::new(config.diagnostics_capacity);
        Self {
            config,
            binding: Arc::new(binding),
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                leased: HashMap::new(),
                creating: 0,
                draining: 0,
                waiters: VecDeque::new(),
                next_ticket: 0,
                closed: false,
            }),
            changed: Condvar::new(),
            maintenance: Mutex::new(()),
            counters: PoolCounters::default(),
            diagnostics,
            next_worker_id: AtomicU64::new(1),
        }
    }

    fn spawn_worker(&self, reason: CreateReason) -> Result<Worker<B::Instance>, PoolError> {
        let id = WorkerId(self.next_worker_id.fetch_add(1, Ordering::Relaxed));
        match Worker::spawn(id, &self.binding, &self.config) {
            Ok(worker) => {
                PoolCounters::bump(&self.counters.workers_created);
                self.diagnostics.emit(PoolEventKind::WorkerCreated { worker: id, reason });
                debug!(worker_id = id.0, ?reason, "Worker created");
                Ok(worker)
            }
            Err(e) => {
                PoolCounters::bump(&self.counters.creation_failures);
                self.diagnostics.emit(PoolEventKind::WorkerCreationFailed {
                    reason,
                    error: e.to_string(),
                });
                warn!(worker_id = id.0, ?reason, error = %e, "Worker creation failed");
                Err(e)
            }
        }
    }

    /// Destroy a worker and record it. Returns `false` if its thread panicked.
    fn retire(&self, worker: &Worker<B::Instance>, reason: DestroyReason) -> bool {
        let clean = worker.destroy();
        PoolCounters::bump(&self.counters.workers_destroyed);
        self.diagnostics.emit(PoolEventKind::WorkerDestroyed {
            worker: worker.id(),
            reason,
        });
        debug!(worker_id = worker.id().0, ?reason, "Worker destroyed");
        clean
    }

    /// Settle a creation reserved through `creating`: place the new worker in
    /// the leased set (demand) or the idle set (prewarm/maintenance).
    fn settle_creation(
        &self,
        result: Result<Worker<B::Instance>, PoolError>,
        reason: CreateReason,
    ) -> Result<Worker<B::Instance>, PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            if let Ok(worker) = &result {
                self.retire(worker, DestroyReason::Shutdown);
            }
            self.state.lock().creating -= 1;
            self.changed.notify_all();
            return Err(PoolError::PoolClosed);
        }

        state.creating -= 1;
        if let Ok(worker) = &result {
            match reason {
                CreateReason::Demand => {
                    state.leased.insert(worker.id(), worker.clone());
                }
                CreateReason::Prewarm | CreateReason::Maintenance => {
                    state.idle.push_back(IdleWorker {
                        worker: worker.clone(),
                        since: Instant::now(),
                    });
                }
            }
        }
        drop(state);
        self.changed.notify_all();
        result
    }

    /// Acquire a worker, blocking up to `timeout`.
    pub(crate) fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<Lease<B>, PoolError> {
        let started = Instant::now();
        let deadline = started.checked_add(timeout);
        let max_total = self.config.max_total_workers();

        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::PoolClosed);
        }
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);
        let mut contended = false;

        loop {
            if state.closed {
                state.remove_waiter(ticket);
                return Err(PoolError::PoolClosed);
            }

            if state.waiters.front() == Some(&ticket) {
                if let Some(idle) = state.idle.pop_back() {
                    state.waiters.pop_front();
                    let worker = idle.worker;
                    state.leased.insert(worker.id(), worker.clone());
                    drop(state);
                    // The next waiter is now at the front.
                    self.changed.notify_all();
                    debug!(
                        worker_id = worker.id().0,
                        idle_for_ms = u64::try_from(idle.since.elapsed().as_millis()).unwrap_or(u64::MAX),
                        "Leased idle worker"
                    );
                    return Ok(self.grant(worker, contended));
                }

                if state.live() < max_total {
                    state.waiters.pop_front();
                    state.creating += 1;
                    drop(state);
                    self.changed.notify_all();
                    let created = self.spawn_worker(CreateReason::Demand);
                    let worker = self.settle_creation(created, CreateReason::Demand)?;
                    return Ok(self.grant(worker, contended));
                }
            }

            if !contended {
                contended = true;
                debug!(ticket, waiting = state.waiters.len(), "Pool saturated, waiting for a worker");
            }

            let timed_out = match deadline {
                // A wake-up that lands past the deadline still counts as a timeout.
                Some(deadline) => {
                    self.changed.wait_until(&mut state, deadline).timed_out() || Instant::now() >= deadline
                }
                None => {
                    self.changed.wait(&mut state);
                    false
                }
            };

            if timed_out {
                state.remove_waiter(ticket);
                drop(state);
                self.changed.notify_all();
                let waited = started.elapsed();
                PoolCounters::bump(&self.counters.acquire_timeouts);
                self.diagnostics.emit(PoolEventKind::AcquireTimedOut {
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                });
                debug!(ticket, ?waited, "Acquire timed out");
                return Err(PoolError::CapacityTimeout { waited, max_total });
            }
        }
    }

    fn grant(self: &Arc<Self>, worker: Worker<B::Instance>, contended: bool) -> Lease<B> {
        PoolCounters::bump(&self.counters.acquisitions);
        if contended {
            PoolCounters::bump(&self.counters.contended_acquisitions);
        }
        Lease::new(Arc::clone(self), worker)
    }

    /// Take a worker back from a lease. Healthy workers return to the idle
    /// set; anything else is destroyed.
    pub(crate) fn release(&self, lease: LeaseId, worker: Worker<B::Instance>, healthy: bool) {
        PoolCounters::bump(&self.counters.releases);
        let worker_id = worker.id();

        let mut state = self.state.lock();
        state.leased.remove(&worker_id);

        if state.closed {
            drop(state);
            // Shutdown already owns the teardown; this only waits for it.
            worker.destroy();
            return;
        }

        let recycled = healthy && !worker.is_destroyed();
        if recycled {
            state.idle.push_back(IdleWorker {
                worker,
                since: Instant::now(),
            });
            drop(state);
            self.changed.notify_all();
        } else {
            state.draining += 1;
            drop(state);
            self.retire(&worker, DestroyReason::Unhealthy);
            self.state.lock().draining -= 1;
            self.changed.notify_all();
            warn!(worker_id = worker_id.0, lease_id = %lease, "Retired unhealthy worker on release");
        }

        self.diagnostics.emit(PoolEventKind::LeaseReleased {
            lease,
            worker: worker_id,
            recycled,
        });
        debug!(worker_id = worker_id.0, lease_id = %lease, recycled, "Lease released");
    }

    /// One maintenance pass: trim idle workers above `max_idle`, then top the
    /// idle set back up to `min_idle` as far as capacity allows.
    pub(crate) fn maintain(&self) -> MaintenanceReport {
        let _pass = self.maintenance.lock();
        let mut report = MaintenanceReport::default();

        let (excess, to_create) = {
            let mut state = self.state.lock();
            if state.closed {
                return report;
            }
            let excess_count = state.idle.len().saturating_sub(self.config.max_idle);
            let excess: Vec<_> = state.idle.drain(..excess_count).map(|idle| idle.worker).collect();
            state.draining += excess.len();

            let headroom = self.config.max_total_workers().saturating_sub(state.live());
            let to_create = self
                .config
                .min_idle
                .saturating_sub(state.idle.len())
                .min(headroom);
            state.creating += to_create;
            (excess, to_create)
        };

        if !excess.is_empty() {
            for worker in &excess {
                self.retire(worker, DestroyReason::ExcessIdle);
            }
            self.state.lock().draining -= excess.len();
            self.changed.notify_all();
            report.destroyed = excess.len();
        }

        for _ in 0..to_create {
            let created = self.spawn_worker(CreateReason::Maintenance);
            match self.settle_creation(created, CreateReason::Maintenance) {
                Ok(_) => report.created += 1,
                Err(PoolError::PoolClosed) => {}
                Err(_) => report.failed += 1,
            }
        }

        if report != MaintenanceReport::default() {
            debug!(
                destroyed = report.destroyed,
                created = report.created,
                failed = report.failed,
                "Maintenance pass"
            );
        }
        report
    }

    /// Mark the pool closed, destroy every worker and wait for in-flight
    /// creations and teardowns to finish.
    fn close(&self) -> Result<(), PoolError> {
        let (idle, leased) = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.waiters.clear();
            (mem::take(&mut state.idle), mem::take(&mut state.leased))
        };
        self.changed.notify_all();

        let idle_count = idle.len();
        let leased_count = leased.len();
        info!(idle = idle_count, leased = leased_count, "Shutting down render worker pool");

        let panicked = idle
            .into_iter()
            .map(|idle| idle.worker)
            .chain(leased.into_values())
            .filter(|worker| !self.retire(worker, DestroyReason::Shutdown))
            .count();

        let mut state = self.state.lock();
        while state.creating > 0 || state.draining > 0 {
            self.changed.wait(&mut state);
        }
        drop(state);

        info!(workers = idle_count + leased_count, "Render worker pool shut down complete");
        if panicked > 0 {
            return Err(PoolError::ShutdownIncomplete { panicked });
        }
        Ok(())
    }

    fn stats(&self) -> PoolStats {
        let mut stats = {
            let state = self.state.lock();
            PoolStats {
                idle: state.idle.len(),
                leased: state.leased.len(),
                creating: state.creating,
                draining: state.draining,
                waiting: state.waiters.len(),
                max_total: self.config.max_total,
                ..PoolStats::default()
            }
        };
        self.counters.fill(&mut stats);
        stats
    }
}

/// Bounded, self-maintaining pool of engine workers.
///
/// Dropping the pool closes it; call [`close`](Self::close) explicitly to
/// observe shutdown errors.
pub struct WorkerPool<B: EngineBinding> {
    shared: Arc<PoolShared<B>>,
    /// Stop signal and handle of the maintenance thread.
    maintenance: Mutex<Option<(Sender<()>, JoinHandle<()>)>>,
}

impl<B: EngineBinding> WorkerPool<B> {
    /// Create a pool, pre-warm `min_idle` workers and start the maintenance
    /// loop.
    ///
    /// # Errors
    ///
    /// - `PoolError::InvalidConfig` if the configuration is invalid
    /// - `PoolError::WorkerCreationFailed` if a pre-warmed worker cannot start
    pub fn new(config: WorkerPoolConfig, binding: B) -> Result<Self, PoolError> {
        config.validate().map_err(PoolError::InvalidConfig)?;

        let shared = Arc::new(PoolShared::new(config, binding));
        for _ in 0..shared.config.min_idle {
            shared.state.lock().creating += 1;
            let created = shared.spawn_worker(CreateReason::Prewarm);
            if let Err(e) = shared.settle_creation(created, CreateReason::Prewarm) {
                let _ = shared.close();
                return Err(e);
            }
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("{}-maintenance", shared.config.thread_name_prefix))
            .spawn(move || run_maintenance_loop(&loop_shared, &stop_rx));
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                let _ = shared.close();
                return Err(PoolError::WorkerCreationFailed {
                    source: EngineError::Startup(format!("failed to spawn maintenance thread: {e}")),
                });
            }
        };

        info!(
            min_idle = shared.config.min_idle,
            max_idle = shared.config.max_idle,
            max_total = ?shared.config.max_total,
            maintenance_interval_ms = shared.config.maintenance_interval_ms,
            "Render worker pool initialized"
        );

        Ok(Self {
            shared,
            maintenance: Mutex::new(Some((stop_tx, handle))),
        })
    }

    /// Acquire a lease, blocking up to `timeout` when the pool is saturated.
    ///
    /// Blocked callers are served in arrival order. A zero timeout never
    /// blocks.
    ///
    /// # Errors
    ///
    /// - `PoolError::CapacityTimeout` if no worker became available in time
    /// - `PoolError::PoolClosed` if the pool is closed (or closes while waiting)
    /// - `PoolError::WorkerCreationFailed` if a new worker had to be started
    ///   and failed
    pub fn acquire(&self, timeout: Duration) -> Result<Lease<B>, PoolError> {
        self.shared.acquire(timeout)
    }

    /// Acquire with the configured default timeout.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub fn acquire_default(&self) -> Result<Lease<B>, PoolError> {
        self.shared.acquire(self.shared.config.default_acquire_timeout())
    }

    /// Acquire without blocking.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire).
    pub fn try_acquire(&self) -> Result<Lease<B>, PoolError> {
        self.shared.acquire(Duration::ZERO)
    }

    /// Acquire from async code.
    ///
    /// The blocking wait runs on tokio's blocking thread pool so the calling
    /// runtime is never parked on the pool's `Condvar`.
    ///
    /// # Errors
    ///
    /// Same as [`acquire`](Self::acquire); `PoolError::PoolClosed` if the
    /// blocking task could not complete.
    #[cfg(feature = "tokio-runtime")]
    pub async fn acquire_async(&self, timeout: Duration) -> Result<Lease<B>, PoolError> {
        let shared = Arc::clone(&self.shared);
        tokio::task::spawn_blocking(move || shared.acquire(timeout))
            .await
            .unwrap_or(Err(PoolError::PoolClosed))
    }

    /// Release a lease. Equivalent to [`Lease::close`]; idempotent.
    ///
    /// # Errors
    ///
    /// Propagates cleanup failures from [`Lease::close`]; the worker is
    /// reclaimed either way.
    pub fn release(&self, lease: &mut Lease<B>) -> Result<(), PoolError> {
        lease.close()
    }

    /// Close the pool.
    ///
    /// Stops maintenance, fails pending and future acquires with
    /// `PoolError::PoolClosed`, destroys every worker (leased ones included)
    /// and returns once all of them are torn down. Idempotent.
    ///
    /// # Errors
    ///
    /// `PoolError::ShutdownIncomplete` if worker threads panicked.
    pub fn close(&self) -> Result<(), PoolError> {
        if let Some((stop_tx, handle)) = self.maintenance.lock().take() {
            let _ = stop_tx.send(());
            if handle.join().is_err() {
                warn!("Maintenance thread panicked");
            }
        }
        self.shared.close()
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Run one maintenance pass now, on the calling thread.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        self.shared.maintain()
    }

    /// Current occupancy and lifetime counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.shared.stats()
    }

    /// Subscribe to pool lifecycle events.
    ///
    /// All subscribers share one bounded queue; each event is delivered to
    /// exactly one of them.
    #[must_use]
    pub fn diagnostics(&self) -> Receiver<PoolEvent> {
        self.shared.diagnostics.subscribe()
    }

    /// Pool configuration.
    #[must_use]
    pub fn config(&self) -> &WorkerPoolConfig {
        &self.shared.config
    }
}

impl<B: EngineBinding> Drop for WorkerPool<B> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(error = %e, "WorkerPool dropped with incomplete shutdown");
        }
    }
}

fn run_maintenance_loop<B: EngineBinding>(shared: &Arc<PoolShared<B>>, stop: &Receiver<()>) {
    let interval = shared.config.maintenance_interval();
    debug!(?interval, "Maintenance loop started");
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                shared.maintain();
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Maintenance loop exiting");
}
