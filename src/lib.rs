//! # unigate
//!
//! Routing and orchestration core for a multi-tenant AI serving gateway.
//!
//! unigate accepts chat, embedding, image, and video generation work, selects
//! the best backend model and API credential for each request, and supervises
//! long-running asynchronous generation tasks to completion.
//!
//! ## Features
//!
//! - **Provider/Model Registry**: in-memory, periodically refreshed catalog of
//!   upstream providers, models, capabilities, costs, and context windows
//! - **Routing Pipeline**: staged filter/score strategy chain producing a
//!   deterministic, explainable `(provider, model, credential)` choice
//! - **Health Monitoring**: per-provider circuit breakers and periodic probes
//!   feeding the routing health filter
//! - **Credential Pooling**: per-provider API key sets with round-robin,
//!   weighted, and priority scheduling plus encrypted at-rest storage
//! - **Async Task Supervision**: bounded worker pool, external-job polling,
//!   restart recovery, and non-blocking progress pub/sub
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use unigate::config::Config;
//! use unigate::gateway::Gateway;
//! use unigate::storage::memory::MemoryStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config/gateway.yaml").await?;
//!     let storage = MemoryStorage::new();
//!     let gateway = Gateway::new(config, storage.repositories()).await?;
//!
//!     let response = gateway
//!         .chat(Default::default(), unigate::types::ChatRequest::user("hello"))
//!         .await?;
//!     println!("{}", response.first_text().unwrap_or_default());
//!     Ok(())
//! }
//! ```
//!
//! The HTTP surface, authentication, and durable persistence backends are
//! external collaborators; this crate exposes the repository ports they
//! implement and ships an in-memory reference backend for tests and
//! development.

pub mod config;
pub mod core;
pub mod gateway;
pub mod storage;
pub mod utils;

pub use crate::core::types;
pub use crate::gateway::Gateway;
pub use crate::utils::error::{GatewayError, Result};
