//! payload-tier: multi-tenant resource manager.
//!
//! Keeps hot payloads (model layers, embedding blobs) in the fastest of three
//! storage tiers:
//!   Memory (hot) → SSD (warm) → Cold storage (origin)
//!
//! and admits requests into a priority queue with per-tenant quotas,
//! starvation boosting and load-based throttling.

pub mod blob;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod server;
pub mod service;
pub mod telemetry;
pub mod tenant;

pub use error::{Error, Result};
pub use service::ResourceManager;
