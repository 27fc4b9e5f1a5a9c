//! Tests for configuration validation

use prometheus_render_pool::config::{RenderPoolsConfig, WorkerPoolConfig, ENV_PREFIX};
use std::collections::HashMap;
use std::time::Duration;

#[test]
fn test_worker_pool_config_builders() {
    let cfg = WorkerPoolConfig::new()
        .with_min_idle(2)
        .with_max_idle(4)
        .with_max_total(8)
        .with_maintenance_interval(Duration::from_millis(250))
        .with_default_acquire_timeout(Duration::from_secs(5))
        .with_diagnostics_capacity(16)
        .with_thread_stack_size(4 * 1024 * 1024)
        .with_thread_name_prefix("pdf");

    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.max_total_workers(), 8);
    assert_eq!(cfg.maintenance_interval(), Duration::from_millis(250));
    assert_eq!(cfg.default_acquire_timeout(), Duration::from_secs(5));
    assert_eq!(cfg.thread_stack_size, Some(4 * 1024 * 1024));
    assert_eq!(cfg.thread_name_prefix, "pdf");
}

#[test]
fn test_unbounded_pool() {
    let cfg = WorkerPoolConfig::new().with_max_idle(64).unbounded();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.max_total, None);
    assert_eq!(cfg.max_total_workers(), usize::MAX);
}

#[test]
fn test_invalid_sizes() {
    let cases = [
        WorkerPoolConfig::new().with_min_idle(3).with_max_idle(2).with_max_total(4),
        WorkerPoolConfig::new().with_min_idle(0).with_max_idle(5).with_max_total(4),
        WorkerPoolConfig::new().with_min_idle(0).with_max_idle(0).with_max_total(0),
        WorkerPoolConfig::new().with_maintenance_interval(Duration::ZERO),
        WorkerPoolConfig::new().with_diagnostics_capacity(0),
        WorkerPoolConfig::new().with_thread_name_prefix(""),
    ];
    for cfg in cases {
        assert!(cfg.validate().is_err(), "should be rejected: {cfg:?}");
    }
}

#[test]
fn test_from_json_defaults_missing_fields() {
    let cfg = WorkerPoolConfig::from_json_str(r#"{ "min_idle": 0, "max_total": 3 }"#).unwrap();
    assert_eq!(cfg.min_idle, 0);
    assert_eq!(cfg.max_idle, 1);
    assert_eq!(cfg.max_total, Some(3));
    assert_eq!(cfg.default_acquire_timeout_ms, 30_000);

    let cfg = WorkerPoolConfig::from_json_str(r#"{ "max_total": null, "max_idle": 100 }"#).unwrap();
    assert_eq!(cfg.max_total, None);

    assert!(WorkerPoolConfig::from_json_str("{ not json").is_err());
}

#[test]
fn test_from_lookup_reports_bad_values() {
    let vars: HashMap<String, String> = [(format!("{ENV_PREFIX}MIN_IDLE"), "many".to_string())]
        .into_iter()
        .collect();
    let err = WorkerPoolConfig::from_lookup(|key| vars.get(key).cloned()).unwrap_err();
    assert!(err.contains("RENDER_POOL_MIN_IDLE"), "{err}");

    let vars: HashMap<String, String> = [
        (format!("{ENV_PREFIX}MIN_IDLE"), "0".to_string()),
        (format!("{ENV_PREFIX}MAX_TOTAL"), " 6 ".to_string()),
        (format!("{ENV_PREFIX}THREAD_NAME_PREFIX"), "raster".to_string()),
    ]
    .into_iter()
    .collect();
    let cfg = WorkerPoolConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();
    assert_eq!(cfg.min_idle, 0);
    assert_eq!(cfg.max_total, Some(6));
    assert_eq!(cfg.thread_name_prefix, "raster");
}

#[test]
fn test_render_pools_config_validation() {
    let empty = RenderPoolsConfig {
        pools: HashMap::new(),
    };
    assert!(empty.validate().is_err());

    let mut pools = HashMap::new();
    pools.insert("default".to_string(), WorkerPoolConfig::default());
    pools.insert(
        "broken".to_string(),
        WorkerPoolConfig::new().with_min_idle(5).with_max_idle(1),
    );
    let err = RenderPoolsConfig { pools }.validate().unwrap_err();
    assert!(err.contains("broken"), "{err}");
}
