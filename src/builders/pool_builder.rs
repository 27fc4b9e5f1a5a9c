//! Builders to construct render pools from configuration.

use std::collections::HashMap;

use tracing::info;

use crate::config::{RenderPoolsConfig, WorkerPoolConfig};
use crate::core::{PoolError, WorkerPool};
use crate::engine::EngineBinding;

/// Build one `WorkerPool` per named entry of `cfg`, using `binding_factory`
/// to produce each pool's engine binding.
///
/// Pools built before a failure are closed when the partial map is dropped.
///
/// # Errors
///
/// - `PoolError::InvalidConfig` if `cfg` does not validate
/// - any error from `binding_factory` or from `WorkerPool::new`
pub fn build_pools<B, F>(
    cfg: &RenderPoolsConfig,
    mut binding_factory: F,
) -> Result<HashMap<String, WorkerPool<B>>, PoolError>
where
    B: EngineBinding,
    F: FnMut(&str, &WorkerPoolConfig) -> Result<B, PoolError>,
{
    cfg.validate()
        .map_err(|e| PoolError::InvalidConfig(format!("config invalid: {e}")))?;

    let mut pools = HashMap::new();
    for (name, pool_cfg) in &cfg.pools {
        let binding = binding_factory(name, pool_cfg)?;
        let pool_cfg = pool_cfg
            .clone()
            .with_thread_name_prefix(format!("{}-{name}", pool_cfg.thread_name_prefix));
        let pool = WorkerPool::new(pool_cfg, binding)?;
        info!(pool = %name, "Render pool built");
        pools.insert(name.clone(), pool);
    }

    Ok(pools)
}
