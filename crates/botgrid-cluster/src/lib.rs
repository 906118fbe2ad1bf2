//! botgrid-cluster — fan-out of workload operations to every live process.
//!
//! A [`ClusterDispatcher`] turns a local operation into a fleet-wide one:
//!
//! ```text
//! let mount: FleetFn = dispatcher.broadcast("mount", local_mount);
//! mount(FleetCall::new("s1", "node-a")).await   // runs local_mount on every node
//! ```
//!
//! The wrapped and unwrapped functions share one signature, so lifecycle
//! code can be tested against either. Delivery may replay, so wrapped
//! operations must be idempotent.

pub mod dispatcher;
pub mod fleet;

pub use dispatcher::{BoxFuture, ClusterDispatcher, FleetCall, FleetFn, LocalDispatcher, fleet_fn};
pub use fleet::{FleetMember, InProcessFleet};
