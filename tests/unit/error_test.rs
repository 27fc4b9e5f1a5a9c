//! Tests for error types

use prometheus_render_pool::core::{AppResult, LeaseId, PoolError, RenderState, WorkerId};
use prometheus_render_pool::engine::{EngineError, PageHandle};
use std::error::Error;
use std::time::Duration;

#[test]
fn test_capacity_timeout_error() {
    let err = PoolError::CapacityTimeout {
        waited: Duration::from_millis(250),
        max_total: 4,
    };
    assert_eq!(
        format!("{err}"),
        "capacity timeout: no worker available after 250ms (max_total 4)"
    );
    assert!(err.is_capacity_error());
}

#[test]
fn test_pool_closed_error() {
    assert_eq!(format!("{}", PoolError::PoolClosed), "pool closed");
    assert!(PoolError::PoolClosed.is_capacity_error());
}

#[test]
fn test_worker_destroyed_error() {
    let err = PoolError::WorkerDestroyed {
        operation: "page_count",
        worker: WorkerId(4),
    };
    assert_eq!(format!("{err}"), "page_count: worker-4 destroyed");
    assert!(!err.is_capacity_error());
}

#[test]
fn test_invalid_state_error() {
    let err = PoolError::InvalidState {
        operation: "render_continue",
        state: RenderState::Done,
    };
    assert_eq!(format!("{err}"), "render_continue: invalid in state Done");
}

#[test]
fn test_render_failed_error() {
    let err = PoolError::RenderFailed {
        worker: WorkerId(2),
        page: PageHandle(9),
    };
    assert_eq!(format!("{err}"), "render failed for page#9 on worker-2");
}

#[test]
fn test_engine_error_source_chain() {
    let err = PoolError::DocumentLoadFailed {
        worker: WorkerId(1),
        source: EngineError::InvalidDocument("missing %PDF- header".into()),
    };
    let source = err.source().expect("engine error is the source");
    assert_eq!(source.to_string(), "invalid document: missing %PDF- header");
}

#[test]
fn test_lease_closed_mentions_lease() {
    let lease = LeaseId::new();
    let err = PoolError::LeaseClosed {
        operation: "load_page",
        lease,
    };
    assert!(err.to_string().contains(&lease.to_string()));
}

#[test]
fn test_app_result_wraps_pool_error() {
    fn validate(max_total: usize) -> Result<usize, PoolError> {
        if max_total == 0 {
            return Err(PoolError::InvalidConfig("max_total must be greater than 0".into()));
        }
        Ok(max_total)
    }
    fn run() -> AppResult<()> {
        validate(0)?;
        Ok(())
    }
    let err = run().unwrap_err();
    assert!(err.downcast_ref::<PoolError>().is_some());
    assert_eq!(
        err.to_string(),
        "invalid configuration: max_total must be greater than 0"
    );
}
