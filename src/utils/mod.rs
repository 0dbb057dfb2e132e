//! Shared utilities: error types, crypto, logging, token estimation

pub mod crypto;
pub mod error;
pub mod logging;
pub mod tokens;

pub use error::{GatewayError, Result};
