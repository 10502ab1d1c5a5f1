//! Reference executor for the queued device tags (CUDA, Metal, Vulkan).
//!
//! The module run is submitted to a dedicated worker thread that stands in
//! for the device queue. A submission that overruns the frame budget is
//! reported as `Timeout` and keeps cooking; the readiness barrier then
//! holds the next pass back until the queue drains.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use driftwave_core::{Device, Flow, FlowError, FlowResult, RuntimeMetadata, SharedModule};
use driftwave_graph::Graph;
use log::{trace, warn};
use std::collections::HashSet;
use std::thread::JoinHandle;
use std::time::Duration;

const DEFAULT_BUDGET: Duration = Duration::from_millis(100);

struct Worker {
    submit: Sender<()>,
    results: Receiver<FlowResult>,
    thread: JoinHandle<()>,
}

pub struct StreamGraph {
    device: Device,
    budget: Duration,
    modules: Vec<(String, SharedModule)>,
    wired_inputs: HashSet<u64>,
    wired_outputs: HashSet<u64>,
    externally_wired_inputs: HashSet<u64>,
    externally_wired_outputs: HashSet<u64>,
    worker: Option<Worker>,
    in_flight: bool,
}

impl StreamGraph {
    pub fn new(device: Device) -> Self {
        StreamGraph {
            device,
            budget: DEFAULT_BUDGET,
            modules: Vec::new(),
            wired_inputs: HashSet::new(),
            wired_outputs: HashSet::new(),
            externally_wired_inputs: HashSet::new(),
            externally_wired_outputs: HashSet::new(),
            worker: None,
            in_flight: false,
        }
    }

    /// How long a submission may take before the frame is dropped.
    pub fn with_budget(mut self, budget: Duration) -> Self {
        self.budget = budget;
        self
    }

    /// Collects the result of a finished submission, if one is pending.
    fn drain_result(&mut self) -> FlowResult {
        let Some(worker) = &self.worker else {
            return Ok(Flow::Success);
        };
        if !self.in_flight {
            return Ok(Flow::Success);
        }
        match worker.results.try_recv() {
            Ok(result) => {
                self.in_flight = false;
                match result {
                    Ok(status) => {
                        if !status.is_success() {
                            trace!("late submission on {} ended with {status:?}", self.device);
                        }
                        Ok(Flow::Success)
                    }
                    Err(err) => Err(err),
                }
            }
            Err(TryRecvError::Empty) => Ok(Flow::Timeout),
            Err(TryRecvError::Disconnected) => {
                Err(FlowError::Fatal(format!("{} worker died", self.device)))
            }
        }
    }
}

impl Graph for StreamGraph {
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
        let metadata = RuntimeMetadata {
            device: self.device,
            externally_wired_inputs: self.externally_wired_inputs.clone(),
            externally_wired_outputs: self.externally_wired_outputs.clone(),
        };
        let run: Vec<(String, SharedModule)> = self.modules.clone();
        let (submit_tx, submit_rx) = bounded::<()>(1);
        let (results_tx, results_rx) = bounded::<FlowResult>(1);

        let thread = std::thread::Builder::new()
            .name(format!("driftwave-{}", self.device))
            .spawn(move || {
                while submit_rx.recv().is_ok() {
                    let mut status = Flow::Success;
                    let mut outcome = Ok(Flow::Success);
                    for (name, module) in &run {
                        let mut guard = module.lock();
                        let Some(compute) = guard.as_compute() else {
                            continue;
                        };
                        match compute.compute(&metadata) {
                            Ok(Flow::Success) => {}
                            Ok(other) => {
                                trace!("module `{name}` reported {other:?}");
                                status = status.worst(other);
                            }
                            Err(err) => {
                                outcome = Err(err);
                                break;
                            }
                        }
                    }
                    let outcome = outcome.map(|_| status);
                    if results_tx.send(outcome).is_err() {
                        break;
                    }
                }
            })
            .map_err(|err| FlowError::Fatal(format!("worker spawn failed: {err}")))?;

        self.worker = Some(Worker {
            submit: submit_tx,
            results: results_rx,
            thread,
        });
        trace!(
            "{} executor created: {} modules, {} boundary ports",
            self.device,
            self.modules.len(),
            self.externally_wired_inputs.len() + self.externally_wired_outputs.len()
        );
        Ok(())
    }

    fn destroy(&mut self) -> FlowResult<()> {
        if let Some(worker) = self.worker.take() {
            // Dropping the submit side stops the loop; joining waits out an
            // in-flight submission so teardown is quiescent.
            drop(worker.submit);
            drop(worker.results);
            if worker.thread.join().is_err() {
                warn!("{} worker terminated abnormally", self.device);
            }
        }
        self.modules.clear();
        self.in_flight = false;
        Ok(())
    }

    fn compute_ready(&mut self) -> FlowResult {
        if self.in_flight {
            // The queue is still busy; do not touch the modules, the worker
            // owns them right now.
            return self.drain_result();
        }
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
        let budget = self.budget;

        // A previous overrun may still be in flight; give it the rest of
        // this frame before dropping another one.
        if self.in_flight {
            let Some(worker) = &self.worker else {
                return Err(FlowError::Fatal("stream executor used before create".into()));
            };
            match worker.results.recv_timeout(budget) {
                Ok(result) => {
                    self.in_flight = false;
                    if let Err(err) = result {
                        warn!("late submission on {} failed", self.device);
                        return Err(err);
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(Flow::Timeout),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(FlowError::Fatal(format!("{} worker died", self.device)));
                }
            }
        }

        let Some(worker) = &self.worker else {
            return Err(FlowError::Fatal("stream executor used before create".into()));
        };
        worker
            .submit
            .send(())
            .map_err(|_| FlowError::Fatal(format!("{} worker died", self.device)))?;
        self.in_flight = true;

        match worker.results.recv_timeout(budget) {
            Ok(result) => {
                self.in_flight = false;
                result
            }
            Err(RecvTimeoutError::Timeout) => Ok(Flow::Timeout),
            Err(RecvTimeoutError::Disconnected) => {
                Err(FlowError::Fatal(format!("{} worker died", self.device)))
            }
        }
    }
}

impl Drop for StreamGraph {
    fn drop(&mut self) {
        let _ = self.destroy();
    }
}
