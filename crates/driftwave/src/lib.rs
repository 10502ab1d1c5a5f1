//! driftwave is a framework for building real-time signal-processing
//! pipelines out of device-bound modules.
//!
//! This crate re-exports the member crates and wires the reference device
//! backends together. Most hosts start with [`default_registry`] and a
//! [`graph::Scheduler`]:
//!
//! ```
//! use driftwave::prelude::*;
//!
//! let scheduler = Scheduler::new(driftwave::default_registry(), SchedulerSettings::default());
//! assert!(scheduler.is_running());
//! ```

pub use driftwave_core as core;
pub use driftwave_cpu as cpu;
pub use driftwave_graph as graph;
pub use driftwave_stream as stream;

use driftwave_core::Device;
use driftwave_cpu::CpuGraph;
use driftwave_graph::{Graph, GraphRegistry};
use driftwave_stream::StreamGraph;

/// Registry wiring the reference executors: `Cpu` runs inline, the queued
/// device tags go through a stream worker.
pub fn default_registry() -> GraphRegistry {
    let mut registry = GraphRegistry::new();
    registry.register(Device::Cpu, |device| {
        Ok(Box::new(CpuGraph::new(device)) as Box<dyn Graph>)
    });
    for device in [Device::Cuda, Device::Metal, Device::Vulkan] {
        registry.register(device, |device| {
            Ok(Box::new(StreamGraph::new(device)) as Box<dyn Graph>)
        });
    }
    registry
}

pub mod prelude {
    pub use crate::default_registry;
    pub use driftwave_core::prelude::*;
    pub use driftwave_graph::prelude::*;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_covers_every_real_device() {
        let registry = default_registry();
        for device in [Device::Cpu, Device::Cuda, Device::Metal, Device::Vulkan] {
            assert!(registry.supports(device));
        }
        assert!(!registry.supports(Device::None));
    }
}
