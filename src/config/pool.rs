//! Worker pool configuration structures.

use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix of the environment variables read by [`WorkerPoolConfig::from_env`].
pub const ENV_PREFIX: &str = "RENDER_POOL_";

/// Sizing and timing of one worker pool.
///
/// Invariant enforced by [`validate`](Self::validate):
/// `min_idle <= max_idle <= max_total`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Workers kept warm even when nobody asks for them.
    pub min_idle: usize,
    /// Idle workers above this count are destroyed by maintenance.
    pub max_idle: usize,
    /// Hard cap on idle + leased workers. `None` means unbounded.
    pub max_total: Option<usize>,
    /// Maintenance loop period in milliseconds.
    pub maintenance_interval_ms: u64,
    /// Timeout used by [`crate::core::WorkerPool::acquire_default`].
    pub default_acquire_timeout_ms: u64,
    /// Capacity of the diagnostics event channel.
    pub diagnostics_capacity: usize,
    /// Stack size for worker threads; platform default when `None`.
    pub thread_stack_size: Option<usize>,
    /// Worker thread name prefix.
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 1,
            max_idle: 1,
            max_total: Some(num_cpus::get().max(1)),
            maintenance_interval_ms: 1_000,
            default_acquire_timeout_ms: 30_000,
            diagnostics_capacity: 256,
            thread_stack_size: None,
            thread_name_prefix: "render-worker".into(),
        }
    }
}

impl WorkerPoolConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the warm floor.
    #[must_use]
    pub const fn with_min_idle(mut self, min_idle: usize) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Set the idle ceiling.
    #[must_use]
    pub const fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Set the hard cap on total workers.
    #[must_use]
    pub const fn with_max_total(mut self, max_total: usize) -> Self {
        self.max_total = Some(max_total);
        self
    }

    /// Remove the cap on total workers.
    #[must_use]
    pub const fn unbounded(mut self) -> Self {
        self.max_total = None;
        self
    }

    /// Set the maintenance period.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the default acquire timeout.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_default_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.default_acquire_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the diagnostics channel capacity.
    #[must_use]
    pub const fn with_diagnostics_capacity(mut self, capacity: usize) -> Self {
        self.diagnostics_capacity = capacity;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Effective cap on total workers.
    #[must_use]
    pub fn max_total_workers(&self) -> usize {
        self.max_total.unwrap_or(usize::MAX)
    }

    /// Maintenance period as a `Duration`.
    #[must_use]
    pub const fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms)
    }

    /// Default acquire timeout as a `Duration`.
    #[must_use]
    pub const fn default_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.default_acquire_timeout_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_total == Some(0) {
            return Err("max_total must be greater than 0".into());
        }
        if self.min_idle > self.max_idle {
            return Err(format!(
                "min_idle ({}) must not exceed max_idle ({})",
                self.min_idle, self.max_idle
            ));
        }
        if let Some(max_total) = self.max_total {
            if self.max_idle > max_total {
                return Err(format!(
                    "max_idle ({}) must not exceed max_total ({max_total})",
                    self.max_idle
                ));
            }
        }
        if self.maintenance_interval_ms == 0 {
            return Err("maintenance_interval_ms must be greater than 0".into());
        }
        if self.diagnostics_capacity == 0 {
            return Err("diagnostics_capacity must be greater than 0".into());
        }
        if self.thread_name_prefix.is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        Ok(())
    }

    /// Parse a pool configuration from a JSON string and validate.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns a description of the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build a configuration from `RENDER_POOL_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first when present.
    /// Recognized variables: `MIN_IDLE`, `MAX_IDLE`, `MAX_TOTAL` (`unbounded`
    /// allowed), `MAINTENANCE_INTERVAL_MS`, `ACQUIRE_TIMEOUT_MS`,
    /// `DIAGNOSTICS_CAPACITY`, `THREAD_STACK_SIZE`, `THREAD_NAME_PREFIX`.
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns a description of the first unparsable variable or of the
    /// validation failure.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup (keys carry the
    /// [`ENV_PREFIX`]).
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut cfg = Self::default();

        if let Some(v) = get("MIN_IDLE") {
            cfg.min_idle = parse_var("MIN_IDLE", &v)?;
        }
        if let Some(v) = get("MAX_IDLE") {
            cfg.max_idle = parse_var("MAX_IDLE", &v)?;
        }
        if let Some(v) = get("MAX_TOTAL") {
            cfg.max_total = if v.eq_ignore_ascii_case("unbounded") {
                None
            } else {
                Some(parse_var("MAX_TOTAL", &v)?)
            };
        }
        if let Some(v) = get("MAINTENANCE_INTERVAL_MS") {
            cfg.maintenance_interval_ms = parse_var("MAINTENANCE_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("ACQUIRE_TIMEOUT_MS") {
            cfg.default_acquire_timeout_ms = parse_var("ACQUIRE_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("DIAGNOSTICS_CAPACITY") {
            cfg.diagnostics_capacity = parse_var("DIAGNOSTICS_CAPACITY", &v)?;
        }
        if let Some(v) = get("THREAD_STACK_SIZE") {
            cfg.thread_stack_size = Some(parse_var("THREAD_STACK_SIZE", &v)?);
        }
        if let Some(v) = get("THREAD_NAME_PREFIX") {
            cfg.thread_name_prefix = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| format!("{ENV_PREFIX}{name}={value:?} is invalid: {e}"))
}

/// Configuration for a process owning several named pools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderPoolsConfig {
    /// Map of pool name to configuration.
    pub pools: HashMap<String, WorkerPoolConfig>,
}

impl RenderPoolsConfig {
    /// Validate all pools and ensure at least one pool exists.
    ///
    /// # Errors
    ///
    /// Returns the first failure, prefixed by the pool name.
    pub fn validate(&self) -> Result<(), String> {
        if self.pools.is_empty() {
            return Err("at least one pool must be defined".into());
        }
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse the configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a description of the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
