use crate::{Device, Flow, FlowResult};
use downcast_rs::{impl_downcast, Downcast};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Per-executor context handed to every compute callback.
///
/// The externally-wired sets name the ports (by locale hash) that cross
/// this executor's boundary and therefore need synchronization with another
/// device before or after the run.
#[derive(Debug, Clone, Default)]
pub struct RuntimeMetadata {
    pub device: Device,
    pub externally_wired_inputs: HashSet<u64>,
    pub externally_wired_outputs: HashSet<u64>,
}

/// A unit of work with typed input and output ports bound to a device.
///
/// A module is a single owning value. Its optional capabilities are
/// obtained by projection: [`Module::as_compute`] for the heavy path and
/// [`Module::as_present`] for the render-side path. The scheduler holds the
/// one [`SharedModule`] handle and borrows whichever view a pass needs.
pub trait Module: Downcast + Send {
    fn device(&self) -> Device;

    /// Human-readable `(label, value)` lines, surfaced through the host
    /// logger when the module is registered.
    fn info(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    fn as_compute(&mut self) -> Option<&mut dyn Compute> {
        None
    }

    fn as_present(&mut self) -> Option<&mut dyn Present> {
        None
    }
}
impl_downcast!(Module);

/// Heavy-work capability of a module.
pub trait Compute {
    /// Non-blocking readiness probe. `Timeout` asks the executor to poll
    /// again without surfacing an error.
    fn compute_ready(&mut self) -> FlowResult {
        Ok(Flow::Success)
    }

    fn compute(&mut self, metadata: &RuntimeMetadata) -> FlowResult;
}

/// Render-side capability of a module. Present modules are self-contained;
/// they exchange no data through the scheduler.
pub trait Present {
    fn present(&mut self) -> FlowResult;
}

/// The single shared handle to a registered module.
///
/// The scheduler's coordinator guarantees that the compute pass, the
/// present pass and mutations never overlap, so this lock is uncontended in
/// steady state; it exists to make the sharing sound, not to arbitrate.
pub type SharedModule = Arc<Mutex<Box<dyn Module>>>;

/// Wraps a module value into the shared handle the scheduler consumes.
pub fn share_module(module: impl Module) -> SharedModule {
    Arc::new(Mutex::new(Box::new(module)))
}
