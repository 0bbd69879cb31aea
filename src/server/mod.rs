//! HTTP server exposing the resource manager.
//!
//! - [`api`]: Request/response types, error mapping and route handlers

pub mod api;

pub use api::build_router;
