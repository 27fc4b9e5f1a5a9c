//! Worker lifecycle tests
//!
//! Covers worker creation and retirement paths that the happy-path tests do
//! not reach:
//! - Demand creation failures and recovery
//! - Retirement of workers whose cleanup failed or whose engine panicked
//! - Handles whose close failed are retried at lease teardown
//! - Diagnostics events, including eviction when nobody is reading
//! - Pool shutdown via close and drop
//! - Building several pools from one configuration

use prometheus_render_pool::builders::build_pools;
use prometheus_render_pool::config::{RenderPoolsConfig, WorkerPoolConfig};
use prometheus_render_pool::core::{
    CreateReason, DestroyReason, PoolError, PoolEventKind, WorkerPool,
};
use prometheus_render_pool::engine::synthetic::{self, SyntheticEngine, SyntheticInstance};
use prometheus_render_pool::engine::{
    BitmapHandle, BitmapInfo, DocumentHandle, EngineBinding, EngineError, NeverPause, PageHandle,
    PauseDecision, PixelSize, RenderEngine, RenderProgress,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// TEST ENGINE - synthetic engine with injectable faults
// ============================================================================

#[derive(Default)]
struct Faults {
    fail_close_document: AtomicBool,
    fail_close_page: AtomicBool,
    panic_on_page_count: AtomicBool,
}

#[derive(Clone, Default)]
struct FaultyEngine {
    inner: SyntheticEngine,
    faults: Arc<Faults>,
}

struct FaultyInstance {
    inner: SyntheticInstance,
    faults: Arc<Faults>,
}

impl EngineBinding for FaultyEngine {
    type Instance = FaultyInstance;

    fn create_instance(&self) -> Result<Self::Instance, EngineError> {
        Ok(FaultyInstance {
            inner: self.inner.create_instance()?,
            faults: Arc::clone(&self.faults),
        })
    }
}

impl RenderEngine for FaultyInstance {
    fn open_document(&mut self, bytes: &[u8]) -> Result<DocumentHandle, EngineError> {
        self.inner.open_document(bytes)
    }

    fn close_document(&mut self, document: DocumentHandle) -> Result<(), EngineError> {
        if self.faults.fail_close_document.load(Ordering::SeqCst) {
            return Err(EngineError::Failure("close_document refused".into()));
        }
        self.inner.close_document(document)
    }

    fn page_count(&mut self, document: DocumentHandle) -> Result<usize, EngineError> {
        assert!(
            !self.faults.panic_on_page_count.load(Ordering::SeqCst),
            "engine crashed"
        );
        self.inner.page_count(document)
    }

    fn load_page(&mut self, document: DocumentHandle, index: usize) -> Result<PageHandle, EngineError> {
        self.inner.load_page(document, index)
    }

    fn close_page(&mut self, page: PageHandle) -> Result<(), EngineError> {
        if self.faults.fail_close_page.load(Ordering::SeqCst) {
            return Err(EngineError::Failure("close_page refused".into()));
        }
        self.inner.close_page(page)
    }

    fn page_size_in_pixels(&mut self, page: PageHandle, dpi: u32) -> Result<PixelSize, EngineError> {
        self.inner.page_size_in_pixels(page, dpi)
    }

    fn create_bitmap(&mut self, width: u32, height: u32, alpha: bool) -> Result<BitmapHandle, EngineError> {
        self.inner.create_bitmap(width, height, alpha)
    }

    fn destroy_bitmap(&mut self, bitmap: BitmapHandle) -> Result<(), EngineError> {
        self.inner.destroy_bitmap(bitmap)
    }

    fn bitmap_info(&mut self, bitmap: BitmapHandle) -> Result<BitmapInfo, EngineError> {
        self.inner.bitmap_info(bitmap)
    }

    fn bitmap_buffer(&mut self, bitmap: BitmapHandle) -> Result<Vec<u8>, EngineError> {
        self.inner.bitmap_buffer(bitmap)
    }

    fn render_start(
        &mut self,
        bitmap: BitmapHandle,
        page: PageHandle,
        size: PixelSize,
        pause: &mut dyn PauseDecision,
    ) -> Result<RenderProgress, EngineError> {
        self.inner.render_start(bitmap, page, size, pause)
    }

    fn render_continue(
        &mut self,
        page: PageHandle,
        pause: &mut dyn PauseDecision,
    ) -> Result<RenderProgress, EngineError> {
        self.inner.render_continue(page, pause)
    }

    fn render_close(&mut self, page: PageHandle) -> Result<(), EngineError> {
        self.inner.render_close(page)
    }
}

fn config(min_idle: usize, max_idle: usize, max_total: usize) -> WorkerPoolConfig {
    WorkerPoolConfig::new()
        .with_min_idle(min_idle)
        .with_max_idle(max_idle)
        .with_max_total(max_total)
        .with_maintenance_interval(Duration::from_secs(3600))
}

// ============================================================================
// TESTS
// ============================================================================

#[test]
fn test_demand_creation_failure_releases_capacity() {
    let engine = SyntheticEngine::default();
    let pool = WorkerPool::new(config(0, 1, 1), engine.clone()).unwrap();

    engine.fail_next_creations(1);
    let err = pool.try_acquire().unwrap_err();
    println!("Creation failure: {err}");
    assert!(matches!(err, PoolError::WorkerCreationFailed { .. }));

    let stats = pool.stats();
    assert_eq!(stats.creating, 0);
    assert_eq!(stats.creation_failures, 1);

    // The reserved slot was returned, so the next acquire can create.
    let lease = pool.try_acquire().unwrap();
    drop(lease);
    assert_eq!(pool.stats().workers_created, 1);
}

#[test]
fn test_failed_cleanup_retires_worker() {
    let engine = FaultyEngine::default();
    let pool = WorkerPool::new(config(1, 1, 1), engine.clone()).unwrap();
    let events = pool.diagnostics();

    let mut lease = pool.try_acquire().unwrap();
    let first_worker = lease.worker_id();
    lease.open_document(synthetic::document(1)).unwrap();

    engine.faults.fail_close_document.store(true, Ordering::SeqCst);
    let err = lease.close().unwrap_err();
    println!("Cleanup failure: {err}");
    assert!(matches!(err, PoolError::Engine { operation: "close_lease", .. }));
    assert!(lease.is_closed());

    let stats = pool.stats();
    assert_eq!(stats.workers_destroyed, 1);
    assert_eq!(stats.idle, 0);
    assert_eq!(stats.leased, 0);

    let kinds: Vec<_> = events.try_iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&PoolEventKind::WorkerDestroyed {
        worker: first_worker,
        reason: DestroyReason::Unhealthy,
    }));
    assert!(kinds.iter().any(|k| matches!(
        k,
        PoolEventKind::LeaseReleased { recycled: false, .. }
    )));

    engine.faults.fail_close_document.store(false, Ordering::SeqCst);
    let replacement = pool.try_acquire().unwrap();
    assert_ne!(replacement.worker_id(), first_worker);
}

#[test]
fn test_failed_page_close_is_retried_on_teardown() {
    let engine = FaultyEngine::default();
    let pool = WorkerPool::new(config(0, 1, 1), engine.clone()).unwrap();

    let mut lease = pool.try_acquire().unwrap();
    lease.open_document(synthetic::document(1)).unwrap();
    let page = lease.load_page(0).unwrap();

    engine.faults.fail_close_page.store(true, Ordering::SeqCst);
    let err = lease.close_page(page).unwrap_err();
    assert!(matches!(err, PoolError::Engine { operation: "close_page", .. }));

    // Still tracked: teardown hits the same failure and retires the worker.
    let err = lease.close().unwrap_err();
    println!("Teardown failure: {err}");
    assert!(matches!(err, PoolError::Engine { operation: "close_lease", .. }));
    let stats = pool.stats();
    assert_eq!(stats.workers_destroyed, 1);
    assert_eq!(stats.idle, 0);
    assert_eq!(engine.inner.live_instances(), 0);
}

#[test]
fn test_panicking_engine_retires_worker() {
    let engine = FaultyEngine::default();
    let pool = WorkerPool::new(config(0, 1, 1), engine.clone()).unwrap();

    let mut lease = pool.try_acquire().unwrap();
    lease.open_document(synthetic::document(2)).unwrap();

    engine.faults.panic_on_page_count.store(true, Ordering::SeqCst);
    let err = lease.page_count().unwrap_err();
    println!("After panic: {err}");
    assert!(matches!(err, PoolError::WorkerDestroyed { operation: "page_count", .. }));

    lease.close().unwrap();
    let stats = pool.stats();
    assert_eq!(stats.workers_destroyed, 1);
    assert_eq!(stats.total(), 0);
    assert_eq!(engine.inner.live_instances(), 0);

    engine.faults.panic_on_page_count.store(false, Ordering::SeqCst);
    let mut lease = pool.try_acquire().unwrap();
    lease.open_document(synthetic::document(2)).unwrap();
    assert_eq!(lease.page_count().unwrap(), 2);
}

#[test]
fn test_diagnostics_report_lifecycle() {
    let pool = WorkerPool::new(config(1, 1, 2), SyntheticEngine::default()).unwrap();
    let events = pool.diagnostics();

    let a = pool.try_acquire().unwrap();
    let b = pool.try_acquire().unwrap();
    drop((a, b));
    pool.run_maintenance();
    pool.close().unwrap();

    let kinds: Vec<_> = events.try_iter().map(|e| e.kind).collect();
    println!("Events: {kinds:?}");
    let created = |reason| {
        kinds
            .iter()
            .filter(|k| matches!(k, PoolEventKind::WorkerCreated { reason: r, .. } if *r == reason))
            .count()
    };
    let destroyed = |reason| {
        kinds
            .iter()
            .filter(|k| matches!(k, PoolEventKind::WorkerDestroyed { reason: r, .. } if *r == reason))
            .count()
    };
    assert_eq!(created(CreateReason::Prewarm), 1);
    assert_eq!(created(CreateReason::Demand), 1);
    assert_eq!(destroyed(DestroyReason::ExcessIdle), 1);
    assert_eq!(destroyed(DestroyReason::Shutdown), 1);
    assert_eq!(
        kinds
            .iter()
            .filter(|k| matches!(k, PoolEventKind::LeaseReleased { recycled: true, .. }))
            .count(),
        2
    );
}

#[test]
fn test_late_subscriber_sees_maintenance_failure() {
    let engine = FaultyEngine::default();
    let pool = WorkerPool::new(
        config(1, 1, 1).with_diagnostics_capacity(16),
        engine.clone(),
    )
    .unwrap();

    // Fill the channel with lease traffic nobody reads.
    for _ in 0..20 {
        drop(pool.try_acquire().unwrap());
    }

    // Retire the only worker so maintenance has to start a new one.
    let mut lease = pool.try_acquire().unwrap();
    lease.open_document(synthetic::document(1)).unwrap();
    engine.faults.fail_close_document.store(true, Ordering::SeqCst);
    lease.close().unwrap_err();
    engine.faults.fail_close_document.store(false, Ordering::SeqCst);
    assert_eq!(pool.stats().total(), 0);

    let events = pool.diagnostics();
    engine.inner.fail_next_creations(1);
    let report = pool.run_maintenance();
    assert_eq!(report.failed, 1);

    let kinds: Vec<_> = events.try_iter().map(|e| e.kind).collect();
    println!("Events after maintenance: {kinds:?}");
    assert_eq!(kinds.len(), 16);
    assert!(matches!(
        kinds.last(),
        Some(PoolEventKind::WorkerCreationFailed {
            reason: CreateReason::Maintenance,
            ..
        })
    ));
}

#[test]
fn test_close_is_idempotent_and_drop_closes() {
    let engine = SyntheticEngine::default();
    let pool = WorkerPool::new(config(2, 2, 3), engine.clone()).unwrap();
    assert_eq!(engine.live_instances(), 2);
    pool.close().unwrap();
    pool.close().unwrap();
    assert_eq!(engine.live_instances(), 0);

    let pool = WorkerPool::new(config(2, 2, 3), engine.clone()).unwrap();
    let lease = pool.try_acquire().unwrap();
    drop(pool);
    assert_eq!(engine.live_instances(), 0);
    drop(lease);
    assert_eq!(engine.instances_created(), 4);
}

#[test]
fn test_build_pools_from_json() {
    let json = r#"{
        "pools": {
            "thumbnails": { "min_idle": 1, "max_idle": 2, "max_total": 2, "maintenance_interval_ms": 60000 },
            "print": { "min_idle": 0, "max_idle": 1, "max_total": 1, "maintenance_interval_ms": 60000 }
        }
    }"#;
    let cfg = RenderPoolsConfig::from_json_str(json).unwrap();

    let mut seen = Vec::new();
    let pools = build_pools(&cfg, |name, _pool_cfg| {
        seen.push(name.to_string());
        Ok(SyntheticEngine::default())
    })
    .unwrap();
    seen.sort();
    assert_eq!(seen, vec!["print", "thumbnails"]);

    let thumbnails = &pools["thumbnails"];
    assert_eq!(thumbnails.stats().idle, 1);
    assert_eq!(thumbnails.config().thread_name_prefix, "render-worker-thumbnails");

    let mut lease = pools["print"].try_acquire().unwrap();
    lease.open_document(synthetic::document(1)).unwrap();
    let page = lease.render_page(0, 9, NeverPause).unwrap();
    assert_eq!(Some(page.pixels.len()), page.info.buffer_len());
}

#[test]
fn test_build_pools_rejects_invalid_config() {
    let json = r#"{ "pools": { "bad": { "min_idle": 3, "max_idle": 1 } } }"#;
    assert!(RenderPoolsConfig::from_json_str(json).is_err());

    let cfg = RenderPoolsConfig {
        pools: std::collections::HashMap::new(),
    };
    let result = build_pools(&cfg, |_, _| Ok(SyntheticEngine::default()));
    assert!(matches!(result, Err(PoolError::InvalidConfig(_))));
}
