//! Tests for utility functions

use prometheus_render_pool::util::{init_tracing, now_ms};
use prometheus_render_pool::util::telemetry::init_tracing_with_default;

#[test]
fn test_now_ms_is_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(b >= a);
    // After 2020-01-01.
    assert!(a > 1_577_836_800_000);
}

#[test]
fn test_init_tracing_is_repeatable() {
    init_tracing_with_default("prometheus_render_pool=debug");
    init_tracing();
    tracing::debug!("tracing initialized twice without panicking");
}
