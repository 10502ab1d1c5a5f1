use crate::debug::SchedulerSnapshot;
use crate::graph::{Graph, GraphRegistry};
use crate::module_state::ModuleState;
use crate::rebuild::{prune, solve};
use crate::sync::Coordinator;
use driftwave_core::{Device, Flow, FlowError, FlowResult, Locale, RecordMap, SharedModule};
use log::{debug, error, trace, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// How a rebuild treats an in-place module consuming a branched tensor.
///
/// `Warn` keeps the historical behavior; `Reject` turns the condition into
/// a structural failure. A future copy-injection pass would retire both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InplacePolicy {
    #[default]
    Warn,
    Reject,
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Sleep applied by [`Scheduler::compute`] while the pipeline is empty.
    pub idle_wait: Duration,
    pub inplace_policy: InplacePolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        SchedulerSettings {
            idle_wait: Duration::from_millis(200),
            inplace_policy: InplacePolicy::Warn,
        }
    }
}

struct Pipeline {
    modules: Vec<ModuleState>,
    graphs: Vec<Box<dyn Graph>>,
    /// Device and block names per executor, kept for the debug snapshot.
    runs: Vec<(Device, Vec<String>)>,
}

/// Owns every registered module, builds the execution graphs and
/// coordinates the compute and present threads.
///
/// All methods take `&self`; the scheduler is shared by the application
/// thread (mutations), a compute thread driving [`Scheduler::compute`] and
/// a present thread driving [`Scheduler::present`].
pub struct Scheduler {
    registry: GraphRegistry,
    settings: SchedulerSettings,
    coordinator: Coordinator,
    pipeline: Mutex<Pipeline>,
    present_modules: Mutex<Vec<(String, SharedModule)>>,
    snapshot: Mutex<SchedulerSnapshot>,
    graph_count: AtomicUsize,
    present_count: AtomicUsize,
    running: AtomicBool,
}

impl Scheduler {
    pub fn new(registry: GraphRegistry, settings: SchedulerSettings) -> Self {
        Scheduler {
            registry,
            settings,
            coordinator: Coordinator::new(),
            pipeline: Mutex::new(Pipeline {
                modules: Vec::new(),
                graphs: Vec::new(),
                runs: Vec::new(),
            }),
            present_modules: Mutex::new(Vec::new()),
            snapshot: Mutex::new(SchedulerSnapshot::default()),
            graph_count: AtomicUsize::new(0),
            present_count: AtomicUsize::new(0),
            running: AtomicBool::new(true),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Registers a module and rebuilds the pipeline.
    ///
    /// The rebuild destroys every existing executor first; when it fails
    /// (cycle, unsupported device, rejected aliasing) the error is returned
    /// and the scheduler is left empty but consistent.
    pub fn add_module(
        &self,
        locale: Locale,
        module: SharedModule,
        input_map: RecordMap,
        output_map: RecordMap,
    ) -> FlowResult<()> {
        if !self.is_running() {
            return Err(FlowError::Destroyed);
        }
        self.lock_state(|| {
            // A destroy may have won the race to the fence.
            if !self.is_running() {
                return Err(FlowError::Destroyed);
            }
            let mut pipeline = self.pipeline.lock();
            if pipeline
                .modules
                .iter()
                .any(|state| state.shash == locale.shash())
            {
                return Err(FlowError::DuplicateModule(locale));
            }
            debug!("adding module `{locale}`");
            let state = ModuleState::new(locale, module, input_map, output_map);
            pipeline.modules.push(state);
            self.rebuild(&mut pipeline)
        })
    }

    /// Unregisters a module and rebuilds. No-op when the scheduler is not
    /// running or the locale is unknown.
    pub fn remove_module(&self, locale: &Locale) -> FlowResult<()> {
        if !self.is_running() {
            return Ok(());
        }
        let shash = locale.shash();
        self.lock_state(|| {
            if !self.is_running() {
                return Ok(());
            }
            let mut pipeline = self.pipeline.lock();
            let Some(position) = pipeline
                .modules
                .iter()
                .position(|state| state.shash == shash)
            else {
                debug!("remove of unknown module `{locale}` ignored");
                return Ok(());
            };
            debug!("removing module `{locale}`");
            pipeline.modules.remove(position);
            self.rebuild(&mut pipeline)
        })
    }

    /// Quiesces both worker threads, tears every executor down and clears
    /// all state. Idempotent; later mutations fail with `Destroyed`.
    pub fn destroy(&self) -> FlowResult<()> {
        if !self.is_running() {
            return Ok(());
        }
        self.lock_state(|| {
            self.running.store(false, Ordering::SeqCst);
            let mut pipeline = self.pipeline.lock();
            Self::teardown(&mut pipeline.graphs);
            pipeline.modules.clear();
            pipeline.runs.clear();
            self.present_modules.lock().clear();
            self.graph_count.store(0, Ordering::SeqCst);
            self.present_count.store(0, Ordering::SeqCst);
            *self.snapshot.lock() = SchedulerSnapshot::default();
        });
        debug!("scheduler destroyed");
        Ok(())
    }

    /// One pass of the compute loop: readiness barrier over every executor,
    /// then the ordered compute phase. Underruns are absorbed; any real
    /// error is returned verbatim and the caller must tear down.
    pub fn compute(&self) -> FlowResult {
        if !self.is_running() {
            return Ok(Flow::Success);
        }
        if self.graph_count.load(Ordering::SeqCst) == 0 {
            thread::sleep(self.settings.idle_wait);
            return Ok(Flow::Success);
        }

        // The wait flag goes up before the halt check: a pending mutation
        // either observes the barrier and waits for it to drain, or the
        // barrier observes the halt and backs out.
        self.coordinator.enter_barrier();
        if self.coordinator.compute_halted() {
            self.coordinator.leave_barrier();
            self.coordinator.wait_compute_resume();
            return Ok(Flow::Success);
        }

        let mut halted = false;
        let mut barrier_error = None;
        {
            let mut pipeline = self.pipeline.lock();
            'ready: loop {
                if self.coordinator.compute_halted() {
                    halted = true;
                    break;
                }
                for graph in pipeline.graphs.iter_mut() {
                    match graph.compute_ready() {
                        Ok(Flow::Timeout) => {
                            trace!("executor on {} not ready, re-polling", graph.device());
                            thread::yield_now();
                            continue 'ready;
                        }
                        Ok(_) => {}
                        Err(err) => {
                            barrier_error = Some(err);
                            break 'ready;
                        }
                    }
                }
                break;
            }
        }
        self.coordinator.leave_barrier();
        if let Some(err) = barrier_error {
            error!("Fatal error: {err}");
            return Err(err);
        }
        if halted {
            self.coordinator.wait_compute_resume();
            return Ok(Flow::Success);
        }

        let shared = self.coordinator.begin_compute();
        let mut status = Flow::Success;
        let mut failure = None;
        {
            let mut pipeline = self.pipeline.lock();
            for graph in pipeline.graphs.iter_mut() {
                match graph.compute() {
                    Ok(Flow::Success) => {}
                    Ok(other) => {
                        status = status.worst(other);
                        break;
                    }
                    Err(err) => {
                        failure = Some(err);
                        break;
                    }
                }
            }
        }
        self.coordinator.end_compute(shared);

        match failure {
            Some(err) => {
                error!("Fatal error: {err}");
                Err(err)
            }
            None if status.is_success() => Ok(Flow::Success),
            None => {
                warn!("Graph underrun. Skipping frame.");
                Ok(Flow::Success)
            }
        }
    }

    /// One pass of the present loop. Runs every present-capable module in
    /// registration order; returns immediately while a mutation is pending.
    pub fn present(&self) -> FlowResult {
        if !self.is_running() {
            return Ok(Flow::Success);
        }
        if self.present_count.load(Ordering::SeqCst) == 0 {
            return Ok(Flow::Success);
        }
        if self.coordinator.present_halted() {
            return Ok(Flow::Success);
        }

        let shared = self.coordinator.begin_present();
        let mut result = Ok(Flow::Success);
        {
            let present = self.present_modules.lock();
            for (name, module) in present.iter() {
                let mut guard = module.lock();
                let Some(view) = guard.as_present() else {
                    continue;
                };
                match view.present() {
                    Ok(Flow::Success) => {}
                    Ok(other) => {
                        trace!("present pass stopped at `{name}`: {other:?}");
                        result = Ok(other);
                        break;
                    }
                    Err(err) => {
                        error!("present failed at `{name}`: {err}");
                        result = Err(err);
                        break;
                    }
                }
            }
        }
        self.coordinator.end_present(shared);
        result
    }

    /// Debug surface: a clone of the last rebuilt counters and executor
    /// listing. Never touches the worker coordination.
    pub fn snapshot(&self) -> SchedulerSnapshot {
        self.snapshot.lock().clone()
    }

    /// Runs `f` with both worker threads quiesced. Every mutation path goes
    /// through here.
    fn lock_state<R>(&self, f: impl FnOnce() -> R) -> R {
        self.coordinator.fence(f)
    }

    fn teardown(graphs: &mut Vec<Box<dyn Graph>>) {
        for mut graph in graphs.drain(..) {
            if let Err(err) = graph.destroy() {
                warn!("executor teardown failed: {err}");
            }
        }
    }

    /// Rebuilds executors from the module table. Called under the fence by
    /// every mutation. On failure all executors are gone and the error is
    /// surfaced to the mutating caller.
    fn rebuild(&self, pipeline: &mut Pipeline) -> FlowResult<()> {
        Self::teardown(&mut pipeline.graphs);
        pipeline.runs.clear();
        self.graph_count.store(0, Ordering::SeqCst);

        prune(&mut pipeline.modules);

        let present: Vec<(String, SharedModule)> = pipeline
            .modules
            .iter()
            .filter(|state| state.is_present())
            .map(|state| (state.name.clone(), state.module.clone()))
            .collect();
        self.present_count.store(present.len(), Ordering::SeqCst);
        *self.present_modules.lock() = present;

        let result = self.assemble(pipeline);
        if let Err(err) = &result {
            Self::teardown(&mut pipeline.graphs);
            pipeline.runs.clear();
            self.graph_count.store(0, Ordering::SeqCst);
            error!("pipeline rebuild failed: {err}");
        }
        self.refresh_snapshot(pipeline);
        result
    }

    fn assemble(&self, pipeline: &mut Pipeline) -> FlowResult<()> {
        let plan = solve(&pipeline.modules)?;

        for (&index, &cluster) in &plan.clusters {
            pipeline.modules[index].cluster_id = cluster;
        }

        for &hash in &plan.conflicts {
            match self.settings.inplace_policy {
                InplacePolicy::Warn => warn!(
                    "Vector {hash:#018x} is being shared by at least two modules after a \
                     branch and at least one of them is an in-place module."
                ),
                InplacePolicy::Reject => return Err(FlowError::InplaceAliasing(hash)),
            }
        }

        if plan.execution_order.is_empty() {
            return Ok(());
        }
        debug!(
            "execution order: [{}]",
            plan.execution_order
                .iter()
                .map(|&index| pipeline.modules[index].name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let mut graphs: Vec<Box<dyn Graph>> = Vec::with_capacity(plan.device_runs.len());
        let mut runs: Vec<(Device, Vec<String>)> = Vec::with_capacity(plan.device_runs.len());
        for (device, run) in &plan.device_runs {
            let mut graph = self.registry.create(*device)?;
            let mut names = Vec::with_capacity(run.len());
            for &index in run {
                let state = &pipeline.modules[index];
                for record in state.active_inputs.values() {
                    graph.set_wired_input(record.locale_hash());
                }
                for record in state.active_outputs.values() {
                    graph.set_wired_output(record.locale_hash());
                }
                graph.set_module(&state.name, state.module.clone());
                names.push(state.name.clone());
            }
            graphs.push(graph);
            runs.push((*device, names));
        }

        // Ports crossing an executor boundary must be synchronized by the
        // device backends on both sides.
        for index in 1..graphs.len() {
            let (head, tail) = graphs.split_at_mut(index);
            let previous = &mut head[index - 1];
            let current = &mut tail[0];
            let crossing: Vec<u64> = previous
                .wired_outputs()
                .intersection(current.wired_inputs())
                .copied()
                .collect();
            for hash in crossing {
                previous.set_externally_wired_output(hash);
                current.set_externally_wired_input(hash);
            }
        }

        pipeline.graphs = graphs;
        pipeline.runs = runs;
        for graph in pipeline.graphs.iter_mut() {
            graph.create()?;
        }
        self.graph_count
            .store(pipeline.graphs.len(), Ordering::SeqCst);
        Ok(())
    }

    fn refresh_snapshot(&self, pipeline: &Pipeline) {
        let snapshot = SchedulerSnapshot {
            pipeline: pipeline.modules.len(),
            stale: pipeline.modules.iter().filter(|m| m.stale).count(),
            present: pipeline.modules.iter().filter(|m| m.is_present()).count(),
            compute: pipeline.modules.iter().filter(|m| m.is_compute()).count(),
            graphs: pipeline.runs.clone(),
        };
        *self.snapshot.lock() = snapshot;
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.destroy();
        }
    }
}
