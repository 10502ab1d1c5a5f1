//! Shared harness for the scheduler integration tests: a configurable test
//! module, record builders and a registry wired with the reference
//! executors.
#![allow(dead_code)]

use driftwave_core::{
    share_module, Compute, Device, Flow, FlowError, FlowResult, Locale, Module, Present, Record,
    RecordMap, RuntimeMetadata, Shape, SharedModule,
};
use driftwave_cpu::CpuGraph;
use driftwave_graph::{Graph, GraphRegistry, Scheduler, SchedulerSettings};
use driftwave_stream::StreamGraph;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Observation point shared by every module of one test.
#[derive(Clone, Default)]
pub struct Probe {
    log: Arc<Mutex<Vec<String>>>,
    presents: Arc<AtomicUsize>,
}

impl Probe {
    pub fn computed(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn presented(&self) -> usize {
        self.presents.load(std::sync::atomic::Ordering::SeqCst)
    }
}

pub struct TestModule {
    name: String,
    device: Device,
    compute: bool,
    present: bool,
    status: Flow,
    fatal: bool,
    delay: Duration,
    probe: Probe,
    metadata: Arc<Mutex<Option<RuntimeMetadata>>>,
}

impl TestModule {
    pub fn new(name: &str, device: Device, probe: &Probe) -> Self {
        TestModule {
            name: name.to_string(),
            device,
            compute: true,
            present: false,
            status: Flow::Success,
            fatal: false,
            delay: Duration::ZERO,
            probe: probe.clone(),
            metadata: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_present(mut self) -> Self {
        self.present = true;
        self
    }

    pub fn present_only(mut self) -> Self {
        self.compute = false;
        self.present = true;
        self
    }

    pub fn with_status(mut self, status: Flow) -> Self {
        self.status = status;
        self
    }

    pub fn with_fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The metadata the module saw on its last compute call.
    pub fn metadata_handle(&self) -> Arc<Mutex<Option<RuntimeMetadata>>> {
        Arc::clone(&self.metadata)
    }
}

impl Module for TestModule {
    fn device(&self) -> Device {
        self.device
    }

    fn info(&self) -> Vec<(&'static str, String)> {
        vec![("device", self.device.to_string())]
    }

    fn as_compute(&mut self) -> Option<&mut dyn Compute> {
        if self.compute {
            Some(self)
        } else {
            None
        }
    }

    fn as_present(&mut self) -> Option<&mut dyn Present> {
        if self.present {
            Some(self)
        } else {
            None
        }
    }
}

impl Compute for TestModule {
    fn compute(&mut self, metadata: &RuntimeMetadata) -> FlowResult {
        if self.fatal {
            return Err(FlowError::Fatal(format!("{} exploded", self.name)));
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        *self.metadata.lock().unwrap() = Some(metadata.clone());
        self.probe.log.lock().unwrap().push(self.name.clone());
        Ok(self.status)
    }
}

impl Present for TestModule {
    fn present(&mut self) -> FlowResult {
        self.probe
            .presents
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(Flow::Success)
    }
}

pub fn record(hash: u64, locale: Locale) -> Record {
    Record {
        data_type: "CF32".into(),
        shape: Shape::from_slice(&[2048]),
        device: Device::Cpu,
        data_ptr: 0,
        hash,
        locale,
    }
}

pub fn map(pairs: Vec<(&str, Record)>) -> RecordMap {
    pairs
        .into_iter()
        .map(|(pin, record)| (pin.to_string(), record))
        .collect()
}

/// Reference registry: inline CPU plus stream workers for the queued tags.
pub fn registry() -> GraphRegistry {
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

/// Captured logging for the threaded tests; repeated calls are fine.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Scheduler with a short idle wait so empty-pipeline passes do not slow
/// the suite down.
pub fn scheduler() -> Scheduler {
    Scheduler::new(
        registry(),
        SchedulerSettings {
            idle_wait: Duration::from_millis(5),
            ..Default::default()
        },
    )
}

pub fn add(
    scheduler: &Scheduler,
    name: &str,
    module: TestModule,
    inputs: Vec<(&str, Record)>,
    outputs: Vec<(&str, Record)>,
) -> FlowResult<()> {
    add_shared(scheduler, name, share_module(module), inputs, outputs)
}

pub fn add_shared(
    scheduler: &Scheduler,
    name: &str,
    module: SharedModule,
    inputs: Vec<(&str, Record)>,
    outputs: Vec<(&str, Record)>,
) -> FlowResult<()> {
    scheduler.add_module(Locale::block(name), module, map(inputs), map(outputs))
}
