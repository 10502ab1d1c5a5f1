use driftwave_core::{Device, FlowError, FlowResult, SharedModule};
use std::collections::{HashMap, HashSet};

/// Contract between the scheduler and a device-specific graph executor.
///
/// An executor owns one contiguous run of modules sharing a device and a
/// cluster. The scheduler accumulates wiring through the `set_*` sinks,
/// appends modules in execution order, then calls [`Graph::create`] exactly
/// once. `externally wired` ports are the subset of wired ports whose
/// tensors cross an executor boundary and must be synchronized with another
/// device (a CUDA to CPU readback, for example).
pub trait Graph: Send {
    fn device(&self) -> Device;

    fn set_wired_input(&mut self, locale_hash: u64);

    fn set_wired_output(&mut self, locale_hash: u64);

    fn set_externally_wired_input(&mut self, locale_hash: u64);

    fn set_externally_wired_output(&mut self, locale_hash: u64);

    /// Appends a module to the executor's ordered run. `name` is the
    /// module's locale rendering, carried for logging.
    fn set_module(&mut self, name: &str, module: SharedModule);

    fn wired_inputs(&self) -> &HashSet<u64>;

    fn wired_outputs(&self) -> &HashSet<u64>;

    /// Finalizes the executor. Called once, after all wiring is set.
    fn create(&mut self) -> FlowResult<()>;

    /// Tears the executor down. Called before every rebuild.
    fn destroy(&mut self) -> FlowResult<()>;

    /// Non-blocking readiness probe: `Success` to proceed, `Timeout` to ask
    /// the scheduler to re-poll, an error to abort the pass.
    fn compute_ready(&mut self) -> FlowResult;

    /// Invokes each module's compute callback in run order on the
    /// executor's device context and returns the worst status observed.
    fn compute(&mut self) -> FlowResult;
}

/// Produces a fresh executor for one device tag.
pub type GraphFactory = Box<dyn Fn(Device) -> FlowResult<Box<dyn Graph>> + Send + Sync>;

/// Maps device tags to executor factories.
///
/// Hosts register one factory per device they can drive; the umbrella crate
/// wires the two reference executors in `default_registry`.
#[derive(Default)]
pub struct GraphRegistry {
    factories: HashMap<Device, GraphFactory>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, device: Device, factory: F) -> &mut Self
    where
        F: Fn(Device) -> FlowResult<Box<dyn Graph>> + Send + Sync + 'static,
    {
        self.factories.insert(device, Box::new(factory));
        self
    }

    pub fn supports(&self, device: Device) -> bool {
        self.factories.contains_key(&device)
    }

    pub(crate) fn create(&self, device: Device) -> FlowResult<Box<dyn Graph>> {
        let factory = self
            .factories
            .get(&device)
            .ok_or(FlowError::UnsupportedDevice(device))?;
        factory(device)
    }
}
