//! Configuration models for worker pools.

pub mod pool;

pub use pool::{RenderPoolsConfig, WorkerPoolConfig, ENV_PREFIX};
