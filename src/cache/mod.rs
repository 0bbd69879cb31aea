//! Tiered payload cache.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`payload`]: PayloadEntry and Tier definitions
//! - [`tier_manager`]: Tier manager that orchestrates promotion/eviction
//! - [`evictor`]: Eviction policy (frequency × recency decay × tenant weight)
//! - [`preload`]: Preload planning for proactive tier promotion

pub mod evictor;
pub mod payload;
pub mod preload;
pub mod tier_manager;
