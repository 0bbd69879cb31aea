//! Priority admission queue.
//!
//! - [`request`]: RequestItem, queue classes and statuses
//! - [`admission`]: Quota checks and admission priority
//! - [`scheduler`]: Ready queues, atomic dequeue, boost and reaper
//! - [`throttle`]: Load monitor and throttle gate

pub mod admission;
pub mod request;
pub mod scheduler;
pub mod throttle;
