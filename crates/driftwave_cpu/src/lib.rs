//! Reference executor for `Device::Cpu`: the module run executes inline on
//! the compute thread, in order, with no device queue in between.

use driftwave_core::{Device, Flow, FlowResult, RuntimeMetadata, SharedModule};
use driftwave_graph::Graph;
use log::trace;
use std::collections::HashSet;

pub struct CpuGraph {
    device: Device,
    modules: Vec<(String, SharedModule)>,
    wired_inputs: HashSet<u64>,
    wired_outputs: HashSet<u64>,
    externally_wired_inputs: HashSet<u64>,
    externally_wired_outputs: HashSet<u64>,
    metadata: RuntimeMetadata,
}

impl CpuGraph {
    pub fn new(device: Device) -> Self {
        CpuGraph {
            device,
            modules: Vec::new(),
            wired_inputs: HashSet::new(),
            wired_outputs: HashSet::new(),
            externally_wired_inputs: HashSet::new(),
            externally_wired_outputs: HashSet::new(),
            metadata: RuntimeMetadata::default(),
        }
    }
}

impl Graph for CpuGraph {
    fn device(&self) -> Device {
        self.device
    }

    fn set_wired_input(&mut self, locale_hash: u64) {
        self.wired_inputs.insert(locale_hash);
    }

    fn set_wired_output(&mut self, locale_hash: u64) {
        self.wired_outputs.insert(locale_hash);
    }

    fn set_externally_wired_input(&mut self, locale_hash: u64) {
        self.externally_wired_inputs.insert(locale_hash);
    }

    fn set_externally_wired_output(&mut self, locale_hash: u64) {
        self.externally_wired_outputs.insert(locale_hash);
    }

    fn set_module(&mut self, name: &str, module: SharedModule) {
        self.modules.push((name.to_string(), module));
    }

    fn wired_inputs(&self) -> &HashSet<u64> {
        &self.wired_inputs
    }

    fn wired_outputs(&self) -> &HashSet<u64> {
        &self.wired_outputs
    }

    fn create(&mut self) -> FlowResult<()> {
        self.metadata = RuntimeMetadata {
            device: self.device,
            externally_wired_inputs: self.externally_wired_inputs.clone(),
            externally_wired_outputs: self.externally_wired_outputs.clone(),
        };
        trace!(
            "cpu executor created: {} modules, {} boundary ports",
            self.modules.len(),
            self.externally_wired_inputs.len() + self.externally_wired_outputs.len()
        );
        Ok(())
    }

    fn destroy(&mut self) -> FlowResult<()> {
        self.modules.clear();
        Ok(())
    }

    fn compute_ready(&mut self) -> FlowResult {
        let mut status = Flow::Success;
        for (name, module) in &self.modules {
            let mut guard = module.lock();
            let Some(compute) = guard.as_compute() else {
                continue;
            };
            match compute.compute_ready()? {
                Flow::Success => {}
                other => {
                    trace!("module `{name}` not ready: {other:?}");
                    status = status.worst(other);
                }
            }
        }
        Ok(status)
    }

    fn compute(&mut self) -> FlowResult {
        let mut status = Flow::Success;
        for (name, module) in &self.modules {
            let mut guard = module.lock();
            let Some(compute) = guard.as_compute() else {
                continue;
            };
            match compute.compute(&self.metadata)? {
                Flow::Success => {}
                other => {
                    trace!("module `{name}` reported {other:?}");
                    status = status.worst(other);
                }
            }
        }
        Ok(status)
    }
}
