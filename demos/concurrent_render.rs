//! Many callers rendering pages through one small pool.
//!
//! Run with `cargo run --example concurrent_render`. Pool sizing can be
//! overridden with `RENDER_POOL_*` variables (see `WorkerPoolConfig::from_env`);
//! set `RUST_LOG=prometheus_render_pool=debug` to watch workers come and go.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context};
use prometheus_render_pool::config::WorkerPoolConfig;
use prometheus_render_pool::core::{AppResult, WorkerPool};
use prometheus_render_pool::engine::synthetic::{self, SyntheticConfig, SyntheticEngine};
use prometheus_render_pool::util::telemetry::init_tracing_with_default;
use tracing::info;

const CALLERS: usize = 6;
const PAGES: usize = 3;

fn main() -> AppResult<()> {
    init_tracing_with_default("concurrent_render=info,prometheus_render_pool=info");

    let config = if std::env::var_os("RENDER_POOL_MAX_TOTAL").is_some() {
        WorkerPoolConfig::from_env().map_err(|e| anyhow!(e))?
    } else {
        WorkerPoolConfig::new()
            .with_min_idle(1)
            .with_max_idle(2)
            .with_max_total(4)
            .with_maintenance_interval(Duration::from_millis(200))
    };

    let engine = SyntheticEngine::new(
        SyntheticConfig::new()
            .with_render_steps(6)
            .with_step_delay(Duration::from_millis(15)),
    );
    let pool = Arc::new(WorkerPool::new(config, engine).context("starting pool")?);
    let events = pool.diagnostics();
    let document = synthetic::document_with_sizes(&[(612.0, 792.0), (595.0, 842.0), (842.0, 595.0)]);

    let started = Instant::now();
    let handles: Vec<_> = (0..CALLERS)
        .map(|caller| {
            let pool = Arc::clone(&pool);
            let document = document.clone();
            thread::spawn(move || -> AppResult<usize> {
                let mut lease = pool
                    .acquire(Duration::from_secs(30))
                    .with_context(|| format!("caller {caller}: acquire"))?;
                lease.open_document(document)?;

                let mut bytes = 0;
                for index in 0..PAGES {
                    // Yield roughly every other increment.
                    let mut tick = false;
                    let page = lease.render_page(index, 72, move || {
                        tick = !tick;
                        tick
                    })?;
                    info!(
                        caller,
                        worker = %lease.worker_id(),
                        page = index,
                        width = page.info.width,
                        height = page.info.height,
                        "Rendered page"
                    );
                    bytes += page.pixels.len();
                }
                lease.close()?;
                Ok(bytes)
            })
        })
        .collect();

    let mut total = 0;
    for handle in handles {
        total += handle.join().map_err(|_| anyhow!("caller thread panicked"))??;
    }
    info!(callers = CALLERS, bytes = total, elapsed = ?started.elapsed(), "All renders complete");

    // Give maintenance a chance to trim back to max_idle.
    thread::sleep(Duration::from_millis(500));
    let stats = pool.stats();
    info!(?stats, "Pool after burst");

    pool.close()?;
    for event in events.try_iter() {
        let json = serde_json::to_string(&event)?;
        info!(event = %json, "Pool event");
    }
    Ok(())
}
