//! Unit tests for individual components

mod config_test;
mod engine_test;
mod error_test;
mod util_test;
