//! The compute scheduler at the heart of driftwave.
//!
//! User code registers modules (typed producers and consumers of tensor
//! buffers bound to a device) and the scheduler turns the raw wiring into
//! executable sub-graphs: ports are pruned, modules are ordered
//! topologically with device-affine grouping, weakly-connected clusters are
//! split into per-device executors, and a compute thread and a present
//! thread drive the result without ever observing a half-mutated pipeline.
//!
//! Device backends implement the [`Graph`] contract; the reference
//! executors live in `driftwave_cpu` and `driftwave_stream`.

mod debug;
mod graph;
mod module_state;
mod rebuild;
mod scheduler;
mod sync;

pub use debug::SchedulerSnapshot;
pub use graph::{Graph, GraphFactory, GraphRegistry};
pub use scheduler::{InplacePolicy, Scheduler, SchedulerSettings};

pub mod prelude {
    pub use crate::{Graph, GraphRegistry, InplacePolicy, Scheduler, SchedulerSettings};
}
