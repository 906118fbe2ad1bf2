//! botgrid-health — per-workload health tracking across the fleet.
//!
//! Each process keeps a [`HealthRegistry`] of counters for the workloads it
//! runs. A [`HealthPublisher`] periodically writes that map to the shared
//! store under `health:{server_id}` with a short TTL, and a [`HealthReader`]
//! merges every live snapshot. Processes that stop publishing simply age out.

pub mod publisher;
pub mod reader;
pub mod registry;

pub use publisher::{HealthPublisher, health_key};
pub use reader::HealthReader;
pub use registry::HealthRegistry;
