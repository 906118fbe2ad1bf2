//! botgrid — the workload lifecycle and deployment pipeline, assembled.
//!
//! [`Grid`] wires one fleet process together from a [`GridConfig`]:
//!
//! - State store (redb): workload trees, revision archives
//! - Shared store: TTL'd health snapshots of every process
//! - Lifecycle manager behind a cluster dispatcher
//! - Health publisher and fleet reader
//! - Revisions, import/export, workload management, promotion pipeline
//!
//! Embedders supply the pieces that live outside this crate (runtime
//! loaders, hooks, workspace service, dispatcher) through [`GridBuilder`].

pub mod grid;
pub mod telemetry;

pub use botgrid_state::GridConfig;
pub use grid::{Grid, GridBuilder};
