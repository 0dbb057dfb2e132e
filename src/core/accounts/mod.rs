//! Credential pool: per-provider API key scheduling and health tracking

pub mod pool;
pub mod status;

pub use pool::{AccountPool, PoolConfig};
