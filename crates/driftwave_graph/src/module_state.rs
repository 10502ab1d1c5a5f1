use driftwave_core::{Device, Locale, RecordMap, SharedModule};
use log::debug;

/// Internal record the scheduler keeps per registered module.
///
/// One entry carries both sides of the module: the shared handle, the
/// declared wiring, the active subsets left after pruning, and the cluster
/// assignment. The compute and present passes borrow the capability views
/// they need through the handle; there is no second owner.
pub(crate) struct ModuleState {
    pub name: String,
    pub shash: u64,
    pub locale: Locale,
    pub module: SharedModule,
    pub device: Device,
    pub input_map: RecordMap,
    pub output_map: RecordMap,
    /// Inputs whose content hash is referenced by at least one other port.
    pub active_inputs: RecordMap,
    /// Outputs whose content hash is referenced by at least one other port.
    pub active_outputs: RecordMap,
    /// Weakly-connected component the module belongs to. Valid after a
    /// rebuild; stale modules keep the default.
    pub cluster_id: u64,
    /// No active ports after pruning: excluded from both loops.
    pub stale: bool,
    pub has_compute: bool,
    pub has_present: bool,
}

impl ModuleState {
    pub fn new(
        locale: Locale,
        module: SharedModule,
        input_map: RecordMap,
        output_map: RecordMap,
    ) -> Self {
        let name = locale.to_string();
        let shash = locale.shash();

        let (device, has_compute, has_present) = {
            let mut guard = module.lock();
            let device = guard.device();
            let has_compute = guard.as_compute().is_some();
            let has_present = guard.as_present().is_some();
            for (label, value) in guard.info() {
                debug!("[{name}] {label}: {value}");
            }
            (device, has_compute, has_present)
        };

        ModuleState {
            name,
            shash,
            locale,
            module,
            device,
            input_map,
            output_map,
            active_inputs: RecordMap::new(),
            active_outputs: RecordMap::new(),
            cluster_id: 0,
            stale: false,
            has_compute,
            has_present,
        }
    }

    /// Valid for the compute path: prune kept at least one port and the
    /// module exposes the compute capability.
    pub fn is_compute(&self) -> bool {
        !self.stale && self.has_compute
    }

    /// Valid for the present path.
    pub fn is_present(&self) -> bool {
        !self.stale && self.has_present
    }
}
